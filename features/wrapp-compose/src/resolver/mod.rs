use std::{pin::pin, rc::Rc, sync::Arc, time::Duration};

use futures::future::{self, Either};

use crate::{
    builder::ResolverBuilder,
    descriptor::Descriptor,
    errors::ResolveError,
    expr::Expr,
    registry::BindingRegistry,
    types::{Injectable, Value},
};

mod blocking;
mod group;
mod offload;
pub(crate) mod session;
mod timer;

pub use blocking::{in_async_context, BlockingResolver};
pub use offload::BlockingPool;

use blocking::Active;
use session::{Chain, Session};
use timer::Timer;

/// Anything a [Resolver] can produce a value for
pub trait Resolvable {
    fn into_descriptor(self) -> Descriptor;
}

impl Resolvable for &str {
    fn into_descriptor(self) -> Descriptor {
        Descriptor::inject(self)
    }
}

impl Resolvable for String {
    fn into_descriptor(self) -> Descriptor {
        Descriptor::inject(self)
    }
}

impl Resolvable for &String {
    fn into_descriptor(self) -> Descriptor {
        Descriptor::inject(self.as_str())
    }
}

impl Resolvable for Descriptor {
    fn into_descriptor(self) -> Descriptor {
        self
    }
}

impl Resolvable for &Descriptor {
    fn into_descriptor(self) -> Descriptor {
        self.clone()
    }
}

impl<T> Resolvable for Expr<T> {
    fn into_descriptor(self) -> Descriptor {
        self.into()
    }
}

impl<T> Resolvable for &Expr<T> {
    fn into_descriptor(self) -> Descriptor {
        self.descriptor().clone()
    }
}

/// A resolution session over a [BindingRegistry]
///
/// Every name is resolved at most once per session, concurrent requests share one
/// in-flight resolution. Values of session scoped providers are owned by the resolver
/// and released by [Resolver::destruct].
///
/// The resolver schedules cooperatively on the thread driving it, it is neither `Send` nor `Sync`.
///
/// # Example
/// ```
/// use std::{convert::Infallible, sync::Arc};
/// use futures::executor::block_on;
/// use wrapp_compose::{provider::Provider, registry::BindingRegistry, resolver::Resolver};
///
/// let registry = BindingRegistry::new()
///     .add_value("a", 1_i64)
///     .add_value("b", 2_i64)
///     .add_provider("sum", Provider::new(["a", "b"], |a: Arc<i64>, b: Arc<i64>| async move {
///         Ok::<_, Infallible>(*a + *b)
///     }));
///
/// let resolver = Resolver::new(registry);
/// assert_eq!(*block_on(resolver.get::<i64>("sum")).unwrap(), 3);
/// ```
pub struct Resolver {
    session: Rc<Session>,
    timeout: Option<Duration>,
}

impl Resolver {
    pub fn new(registry: BindingRegistry) -> Self {
        ResolverBuilder::new(registry).build()
    }

    pub fn builder(registry: BindingRegistry) -> ResolverBuilder {
        ResolverBuilder::new(registry)
    }

    pub(crate) fn from_parts(session: Rc<Session>, timeout: Option<Duration>) -> Self {
        Resolver { session, timeout }
    }

    /// Resolves a name, descriptor or expression
    pub async fn resolve(&self, target: impl Resolvable) -> Result<Value, ResolveError> {
        self.session.ensure_open()?;

        let descriptor = target.into_descriptor();
        tracing::debug!("Resolving {descriptor:?}");

        let resolution = Active::new(self.session.evaluate(&descriptor, &Chain::root()));
        match self.timeout {
            Some(timeout) => with_timeout(resolution, timeout).await,
            None => resolution.await,
        }
    }

    /// Resolves `target` and downcasts the result
    pub async fn get<T: Injectable>(&self, target: impl Resolvable) -> Result<Arc<T>, ResolveError> {
        self.resolve(target).await?.downcast::<T>()
    }

    /// Resolves a typed expression
    pub async fn eval<T: Injectable>(&self, expr: &Expr<T>) -> Result<Arc<T>, ResolveError> {
        self.get::<T>(expr).await
    }

    /// Whether `name` is bound in the registry or the default registry
    pub fn is_bound(&self, name: &str) -> bool {
        self.session.is_bound(name)
    }

    pub fn registry(&self) -> &BindingRegistry {
        self.session.registry()
    }

    pub fn defaults(&self) -> Option<&BindingRegistry> {
        self.session.defaults()
    }

    /// Number of values currently owned by the session
    pub fn owned_resources(&self) -> usize {
        self.session.resource_count()
    }

    /// Closes the session and tears down every owned value, newest first
    ///
    /// All teardowns run even if some fail, their failures are returned together.
    /// Afterwards every resolution fails with [ResolveError::SessionClosed].
    pub async fn destruct(&self) -> Result<(), ResolveError> {
        Active::new(self.session.destruct()).await
    }

    /// Synchronous facade for code running outside of any executor
    pub fn to_blocking(self) -> BlockingResolver {
        BlockingResolver::new(self)
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        // In-flight entries reference the session
        self.session.clear();
    }
}

async fn with_timeout<F>(resolution: F, timeout: Duration) -> Result<Value, ResolveError>
where
    F: std::future::Future<Output = Result<Value, ResolveError>>,
{
    let Some(timer) = Timer::shared() else {
        return resolution.await;
    };

    // Dropped with this future, which cancels the alarm
    let expired = timer.delay(timeout);
    match future::select(pin!(resolution), expired).await {
        Either::Left((result, _)) => result,
        Either::Right((Ok(()), _)) => {
            tracing::error!("Resolution timed out after {timeout:?}");
            Err(ResolveError::Timeout)
        }
        Either::Right((Err(_), resolution)) => resolution.await,
    }
}
