use std::{
    cell::Cell,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::executor::block_on;
use pin_project_lite::pin_project;

use crate::{
    errors::ResolveError,
    resolver::{Resolvable, Resolver},
    types::{Injectable, Value},
};

thread_local! {
    /// Number of resolutions currently being polled on this thread
    static ACTIVE_RESOLUTIONS: Cell<usize> = const { Cell::new(0) };
}

pin_project! {
    /// Marks the thread as running a resolution while `inner` is polled
    pub(crate) struct Active<F> {
        #[pin]
        inner: F,
    }
}

impl<F> Active<F> {
    pub(crate) fn new(inner: F) -> Self {
        Active { inner }
    }
}

impl<F: Future> Future for Active<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _marker = ActiveMarker::enter();
        this.inner.poll(cx)
    }
}

struct ActiveMarker;

impl ActiveMarker {
    fn enter() -> Self {
        ACTIVE_RESOLUTIONS.with(|active| active.set(active.get() + 1));
        ActiveMarker
    }
}

impl Drop for ActiveMarker {
    fn drop(&mut self) {
        ACTIVE_RESOLUTIONS.with(|active| active.set(active.get().saturating_sub(1)));
    }
}

/// True if the current thread is inside a resolution or an executor
pub fn in_async_context() -> bool {
    ACTIVE_RESOLUTIONS.with(Cell::get) > 0 || futures::executor::enter().is_err()
}

/// Synchronous facade over a [Resolver]
///
/// Every call drives the resolution to completion on the current thread.
/// Calling it from inside a running resolution or executor fails with
/// [ResolveError::BlockingBridgeMisuse], it never nests an event loop.
///
/// # Example
/// ```
/// use wrapp_compose::{registry::BindingRegistry, resolver::Resolver};
///
/// let resolver = Resolver::new(BindingRegistry::new().add_value("answer", 42_u32)).to_blocking();
/// assert_eq!(*resolver.get::<u32>("answer").unwrap(), 42);
/// ```
pub struct BlockingResolver {
    resolver: Resolver,
}

impl BlockingResolver {
    pub fn new(resolver: Resolver) -> Self {
        BlockingResolver { resolver }
    }

    fn ensure_blocking_allowed() -> Result<(), ResolveError> {
        if in_async_context() {
            tracing::error!("Blocking resolution requested from within a running async context");
            return Err(ResolveError::BlockingBridgeMisuse);
        }
        Ok(())
    }

    pub fn resolve(&self, target: impl Resolvable) -> Result<Value, ResolveError> {
        Self::ensure_blocking_allowed()?;
        block_on(self.resolver.resolve(target))
    }

    pub fn get<T: Injectable>(&self, target: impl Resolvable) -> Result<Arc<T>, ResolveError> {
        Self::ensure_blocking_allowed()?;
        block_on(self.resolver.get::<T>(target))
    }

    /// Tears down the session, see [Resolver::destruct]
    pub fn destruct(&self) -> Result<(), ResolveError> {
        Self::ensure_blocking_allowed()?;
        block_on(self.resolver.destruct())
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn into_inner(self) -> Resolver {
        self.resolver
    }
}
