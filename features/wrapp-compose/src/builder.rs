use std::time::Duration;

use crate::{
    registry::BindingRegistry,
    resolver::{session::Session, Resolver},
};

/// Configures a [Resolver] session
///
/// ```
/// use std::time::Duration;
/// use wrapp_compose::{registry::BindingRegistry, resolver::Resolver};
///
/// let defaults = BindingRegistry::new().add_value("port", 8080_u16);
/// let resolver = Resolver::builder(BindingRegistry::new().add_value("host", "localhost"))
///     .with_defaults(defaults)
///     .timeout(Duration::from_secs(5))
///     .build();
/// assert!(resolver.is_bound("port"));
/// ```
pub struct ResolverBuilder {
    registry: BindingRegistry,
    /// Consulted for every name the registry doesn't bind
    defaults: Option<BindingRegistry>,
    timeout: Option<Duration>,
}

impl ResolverBuilder {
    pub fn new(registry: BindingRegistry) -> Self {
        ResolverBuilder {
            registry,
            defaults: None,
            timeout: None,
        }
    }

    pub fn with_defaults(mut self, defaults: BindingRegistry) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Fails every root resolution taking longer than `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Resolver {
        tracing::debug!(
            "Building resolver over {} bindings{}",
            self.registry.len(),
            match &self.defaults {
                Some(defaults) => format!(" with {} defaults", defaults.len()),
                None => String::new(),
            }
        );
        Resolver::from_parts(Session::new(self.registry, self.defaults), self.timeout)
    }
}
