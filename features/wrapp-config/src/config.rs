use std::{ops::Deref, sync::Arc};

use wrapp_compose::{Expr, Injectable, ResolveError, Resolver};

use crate::{errors::GetConfigError, provider::ConfigProvider};

/// A wrapper type to allow for config injections
///
/// Configs registered with a [ConfigProvider] are bound by name, so a [Config] can be
/// taken from the provider directly, resolved from a [Resolver], or composed as an [Expr].
///
/// # Example
/// ```rust
/// use futures::executor::block_on;
/// use wrapp_compose::Resolver;
/// use wrapp_config::{config::Config, provider::ConfigProvider};
///
/// #[derive(Clone)]
/// pub struct MyModuleConfig {
///     enabled: bool,
/// }
///
/// let mut config_provider = ConfigProvider::new();
/// config_provider
///     .add_config("my_module", MyModuleConfig { enabled: true })
///     .unwrap();
///
/// let resolver = Resolver::new(config_provider.to_registry());
/// let enabled = Config::<MyModuleConfig>::expr("my_module").map(|config| config.enabled);
/// assert!(*block_on(resolver.eval(&enabled)).unwrap());
///
/// let config = block_on(Config::<MyModuleConfig>::resolve(&resolver, "my_module")).unwrap();
/// assert!(config.enabled);
/// ```
#[derive(Debug)]
pub struct Config<T> {
    inner: Arc<T>,
}
impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Config {
            inner: self.inner.clone(),
        }
    }
}
impl<T> Deref for Config<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
impl<T> Config<T> {
    pub fn inner(&self) -> Arc<T> {
        self.inner.clone()
    }

    pub fn into_inner(self) -> Arc<T> {
        self.inner
    }
}

impl<T: Injectable> Config<T> {
    /// The config bound under `name`, for composition
    pub fn expr(name: impl Into<String>) -> Expr<T> {
        Expr::inject(name)
    }

    /// Resolves the config bound under `name`
    pub async fn resolve(resolver: &Resolver, name: &str) -> Result<Self, ResolveError> {
        let inner = resolver.get::<T>(name).await?;
        Ok(Config { inner })
    }

    /// Takes the config straight from the provider, None if it isn't registered
    pub fn from_provider(provider: &ConfigProvider, name: &str) -> Result<Option<Self>, GetConfigError> {
        Ok(provider
            .get_config::<T>(name)?
            .map(|inner| Config { inner }))
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use wrapp_compose::BindingRegistry;

    use super::*;

    #[derive(Debug, Clone)]
    struct Server {
        port: u16,
    }

    #[test]
    fn configs_resolve_alongside_other_bindings() {
        let mut provider = ConfigProvider::new();
        provider.add_config("server", Server { port: 8080 }).unwrap();

        let registry = provider.to_registry().merge(&BindingRegistry::new().add_value("offset", 1_u16));
        let resolver = Resolver::new(registry);

        let next_port = Config::<Server>::expr("server").map(|server| server.port) + Expr::<u16>::inject("offset");
        assert_eq!(*block_on(resolver.eval(&next_port)).unwrap(), 8081);
    }

    #[test]
    fn missing_config_fails_resolution() {
        let resolver = Resolver::new(ConfigProvider::new().into_registry());
        assert!(matches!(
            block_on(Config::<Server>::resolve(&resolver, "server")),
            Err(ResolveError::UnresolvedDependency { .. })
        ));
    }

    #[test]
    fn taken_from_provider() {
        let mut provider = ConfigProvider::new();
        provider.add_config("server", Server { port: 1 }).unwrap();

        let server = Config::<Server>::from_provider(&provider, "server").unwrap().unwrap();
        assert_eq!(server.port, 1);
        assert!(Config::<Server>::from_provider(&provider, "other").unwrap().is_none());
    }
}
