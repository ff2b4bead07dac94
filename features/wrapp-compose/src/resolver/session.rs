use std::{
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashMap, HashSet},
    future::Future,
    panic::AssertUnwindSafe,
    rc::{Rc, Weak},
};

use futures::{
    future::{self, LocalBoxFuture, Shared},
    FutureExt,
};

use crate::{
    descriptor::{Bind, Descriptor, Node},
    errors::{Panicked, ResolveError},
    provider::TeardownFn,
    registry::{Binding, BindingRegistry},
    resolver::group,
    types::{DynError, Kwargs, Value},
};

type SharedResolution = Shared<LocalBoxFuture<'static, Result<Value, ResolveError>>>;

/// Resolution state of a single name
///
/// A missing entry is unvisited. `Resolved` and `Failed` are terminal.
enum Slot {
    InProgress {
        future: SharedResolution,
        /// Futures currently awaiting the result
        waiters: usize,
    },
    Resolved(Value),
    Failed(ResolveError),
}

/// A value owned by the session, released on teardown
struct Resource {
    name: String,
    value: Value,
    teardown: TeardownFn,
}

/// Names currently being resolved on one causal path, outermost first
#[derive(Debug, Clone, Default)]
pub(crate) struct Chain(Vec<String>);

impl Chain {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|entry| entry == name)
    }

    fn current(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    fn parent(&self) -> Option<&str> {
        self.0.iter().rev().nth(1).map(String::as_str)
    }

    fn child(&self, name: &str) -> Chain {
        let mut chain = self.0.clone();
        chain.push(name.to_string());
        Chain(chain)
    }

    /// The part of the chain starting at the first occurrence of `name`
    fn starting_at(&self, name: &str) -> Vec<String> {
        let start = self.0.iter().position(|entry| entry == name).unwrap_or(0);
        self.0[start..].to_vec()
    }
}

/// Cache and resource ownership of one resolver
pub(crate) struct Session {
    registry: BindingRegistry,
    defaults: Option<BindingRegistry>,
    slots: RefCell<HashMap<String, Slot>>,
    /// Which in-flight names each in-flight name is waiting for
    waits: RefCell<HashMap<String, Vec<String>>>,
    resources: RefCell<Vec<Resource>>,
    closed: Cell<bool>,
}

impl Session {
    pub(crate) fn new(registry: BindingRegistry, defaults: Option<BindingRegistry>) -> Rc<Self> {
        Rc::new(Session {
            registry,
            defaults,
            slots: RefCell::new(HashMap::new()),
            waits: RefCell::new(HashMap::new()),
            resources: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        })
    }

    pub(crate) fn registry(&self) -> &BindingRegistry {
        &self.registry
    }

    pub(crate) fn defaults(&self) -> Option<&BindingRegistry> {
        self.defaults.as_ref()
    }

    /// Two tier lookup, the local registry first, then the default registry
    fn lookup(&self, name: &str) -> Option<Binding> {
        self.registry
            .lookup(name)
            .or_else(|| self.defaults.as_ref().and_then(|defaults| defaults.lookup(name)))
            .cloned()
    }

    pub(crate) fn is_bound(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), ResolveError> {
        match self.closed.get() {
            true => Err(ResolveError::SessionClosed),
            false => Ok(()),
        }
    }

    /// Resolves any descriptor on behalf of the innermost name of `chain`
    pub(crate) fn evaluate(
        self: &Rc<Self>,
        descriptor: &Descriptor,
        chain: &Chain,
    ) -> LocalBoxFuture<'static, Result<Value, ResolveError>> {
        let session = self.clone();
        let descriptor = descriptor.clone();
        let chain = chain.clone();
        async move { session.evaluate_node(&descriptor, &chain).await }.boxed_local()
    }

    async fn evaluate_node(
        self: &Rc<Self>,
        descriptor: &Descriptor,
        chain: &Chain,
    ) -> Result<Value, ResolveError> {
        match descriptor.node() {
            Node::Pure(value) => Ok(value.clone()),
            Node::Ref(name) => self.resolve_name(name, chain).await,
            Node::Bind(bind) => self.evaluate_bind(bind, chain).await,
            Node::Mapped {
                src,
                label,
                transform,
            } => {
                let value = self.evaluate(src, chain).await?;
                guarded(async { transform(value).await })
                    .await
                    .map_err(|e| ResolveError::provider(chain.current().unwrap_or(&**label), e))
            }
            Node::Zipped(sources) => {
                let branches = sources.iter().map(|source| self.evaluate(source, chain));
                let values = group::join_all(branches).await?;
                Ok(Value::new(values))
            }
            Node::Dict { inner, .. } => self.evaluate(inner, chain).await,
        }
    }

    /// Resolves static dependencies, then dynamically discovered ones, then calls the provider
    async fn evaluate_bind(self: &Rc<Self>, bind: &Bind, chain: &Chain) -> Result<Value, ResolveError> {
        let scope = chain.current().unwrap_or("bind").to_string();
        let mut kwargs = self
            .resolve_names(bind.dependencies.iter().cloned().collect(), chain)
            .await?;

        loop {
            let discovered: Vec<String> = bind
                .dynamic_dependencies(&kwargs)
                .into_iter()
                .filter(|name| !kwargs.contains(name))
                .collect();
            if discovered.is_empty() {
                break;
            }

            tracing::debug!("'{scope}' discovered dynamic dependencies {discovered:?}");
            let resolved = self.resolve_names(discovered, chain).await?;
            kwargs.extend(resolved.into_inner());
        }

        // Hand over exactly the complete dependencies
        let mut complete: BTreeSet<String> = bind.dependencies.clone();
        complete.extend(bind.dynamic_dependencies(&kwargs));
        kwargs.retain_only(&complete);

        guarded(async { bind.function.call(kwargs).await })
            .await
            .map_err(|e| ResolveError::provider(scope, e))
    }

    async fn resolve_names(
        self: &Rc<Self>,
        names: Vec<String>,
        chain: &Chain,
    ) -> Result<Kwargs, ResolveError> {
        let branches = names.iter().map(|name| self.resolve_name(name, chain));
        let values = group::join_all(branches).await?;
        Ok(names.into_iter().zip(values).collect())
    }

    /// Request the value of `name`
    ///
    /// Terminal results are returned from the cache. An in-flight resolution is shared.
    /// Otherwise the resolution is started, exactly once per session.
    pub(crate) fn resolve_name(
        self: &Rc<Self>,
        name: &str,
        chain: &Chain,
    ) -> LocalBoxFuture<'static, Result<Value, ResolveError>> {
        if let Err(e) = self.ensure_open() {
            return future::ready(Err(e)).boxed_local();
        }

        if chain.contains(name) {
            let mut cycle = chain.starting_at(name);
            cycle.push(name.to_string());
            return cycle_detected(cycle);
        }

        let shared = {
            let mut slots = self.slots.borrow_mut();
            match slots.get_mut(name) {
                Some(Slot::Resolved(value)) => {
                    tracing::trace!("'{name}' resolved from cache");
                    return future::ready(Ok(value.clone())).boxed_local();
                }
                Some(Slot::Failed(error)) => {
                    tracing::trace!("'{name}' failed before, not retrying");
                    return future::ready(Err(error.clone())).boxed_local();
                }
                Some(Slot::InProgress { future: in_flight, waiters }) => {
                    // Waiting on a name which itself waits on our chain would never finish
                    if let Some(cycle) = self.waiting_cycle(name, chain) {
                        return cycle_detected(cycle);
                    }

                    tracing::trace!("'{name}' is in flight, attaching as waiter {}", *waiters + 1);
                    *waiters += 1;
                    in_flight.clone()
                }
                None => {
                    let in_flight = self
                        .clone()
                        .evaluate_name(name.to_string(), chain.child(name))
                        .boxed_local()
                        .shared();

                    slots.insert(
                        name.to_string(),
                        Slot::InProgress {
                            future: in_flight.clone(),
                            waiters: 1,
                        },
                    );
                    in_flight
                }
            }
        };

        let attachment = Attachment::new(self, chain.current(), name);
        async move {
            let result = shared.await;
            drop(attachment);
            result
        }
        .boxed_local()
    }

    async fn evaluate_name(self: Rc<Self>, name: String, chain: Chain) -> Result<Value, ResolveError> {
        tracing::debug!("Resolving '{name}'");

        let result = match self.lookup(&name) {
            None => Err(ResolveError::UnresolvedDependency {
                name: name.clone(),
                required_by: chain.parent().map(str::to_string),
            }),
            Some(Binding::Value(value)) => Ok(value),
            Some(Binding::Delegate(descriptor)) => self.evaluate(&descriptor, &chain).await,
            Some(Binding::Provider(provider)) => {
                let result = self.evaluate(&provider.descriptor(), &chain).await;
                if let (Ok(value), Some(teardown)) = (&result, provider.teardown()) {
                    self.own(&name, value, teardown);
                }
                result
            }
        };

        match &result {
            Ok(value) => tracing::debug!("Resolved '{name}' as {}", value.type_name()),
            Err(e) => tracing::debug!("Resolving '{name}' failed - error: {e}"),
        }

        self.complete(&name, &result);
        result
    }

    /// Transitions an in-flight slot to its terminal state
    fn complete(&self, name: &str, result: &Result<Value, ResolveError>) {
        let previous = {
            let mut slots = self.slots.borrow_mut();
            match slots.get(name) {
                Some(Slot::InProgress { .. }) => {
                    let terminal = match result {
                        Ok(value) => Slot::Resolved(value.clone()),
                        Err(e) => Slot::Failed(e.clone()),
                    };
                    slots.insert(name.to_string(), terminal)
                }
                // Cancelled or torn down meanwhile, keep that state
                _ => None,
            }
        };
        drop(previous);
    }

    /// A waiter of `name` went away
    ///
    /// If it was the last one, the resolution is cancelled and its computation dropped.
    fn detach(&self, name: &str) {
        let cancelled = {
            let mut slots = self.slots.borrow_mut();
            let Some(Slot::InProgress { waiters, .. }) = slots.get_mut(name) else {
                return;
            };

            *waiters -= 1;
            if *waiters > 0 {
                return;
            }

            slots.insert(
                name.to_string(),
                Slot::Failed(ResolveError::Cancelled {
                    name: name.to_string(),
                }),
            )
        };

        tracing::debug!("Resolution of '{name}' cancelled");
        // Dropped outside of the borrow, this cascades into the dependencies
        drop(cancelled);
    }

    /// Follows the wait-for edges from `target`, returning the cycle if it leads back into `chain`
    fn waiting_cycle(&self, target: &str, chain: &Chain) -> Option<Vec<String>> {
        let waits = self.waits.borrow();
        let mut visited = HashSet::new();
        let mut paths = vec![vec![target.to_string()]];

        while let Some(path) = paths.pop() {
            let Some(last) = path.last() else {
                continue;
            };
            if !visited.insert(last.clone()) {
                continue;
            }

            for next in waits.get(last).into_iter().flatten() {
                if chain.contains(next) {
                    let mut cycle = chain.starting_at(next);
                    cycle.extend(path.iter().cloned());
                    cycle.push(next.clone());
                    return Some(cycle);
                }

                let mut extended = path.clone();
                extended.push(next.clone());
                paths.push(extended);
            }
        }

        None
    }

    fn own(&self, name: &str, value: &Value, teardown: &TeardownFn) {
        tracing::debug!("Session takes ownership of '{name}'");
        self.resources.borrow_mut().push(Resource {
            name: name.to_string(),
            value: value.clone(),
            teardown: teardown.clone(),
        });
    }

    pub(crate) fn resource_count(&self) -> usize {
        self.resources.borrow().len()
    }

    /// Drops all cached and in-flight entries
    pub(crate) fn clear(&self) {
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        drop(slots);
        self.waits.borrow_mut().clear();
    }

    /// Closes the session and releases owned resources, newest first
    pub(crate) async fn destruct(&self) -> Result<(), ResolveError> {
        if self.closed.replace(true) {
            return Err(ResolveError::SessionClosed);
        }

        self.clear();

        let resources = std::mem::take(&mut *self.resources.borrow_mut());
        tracing::debug!("Destructing session with {} owned resources", resources.len());

        let mut errors = Vec::new();
        for resource in resources.into_iter().rev() {
            tracing::debug!("Tearing down '{}'", resource.name);
            if let Err(e) = (resource.teardown)(resource.value).await {
                tracing::error!("Teardown of '{}' failed - error: {e}", resource.name);
                errors.push(ResolveError::provider(resource.name, e));
            }
        }

        match errors.is_empty() {
            true => Ok(()),
            false => Err(ResolveError::group(errors)),
        }
    }
}

fn cycle_detected(cycle: Vec<String>) -> LocalBoxFuture<'static, Result<Value, ResolveError>> {
    tracing::debug!("Circular dependency detected: {}", cycle.join(" -> "));
    future::ready(Err(ResolveError::CycleDetected { chain: cycle })).boxed_local()
}

/// Runs user code, a panic fails it like a returned error
async fn guarded<F>(work: F) -> Result<Value, DynError>
where
    F: Future<Output = Result<Value, DynError>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let panicked = Panicked::from_payload(payload);
            tracing::error!("User code {panicked}");
            Err(Box::new(panicked))
        }
    }
}

/// A future awaiting the resolution of `target`
///
/// Records the wait-for edge while alive and detaches from the slot when dropped.
struct Attachment {
    session: Weak<Session>,
    requester: Option<String>,
    target: String,
}

impl Attachment {
    fn new(session: &Rc<Session>, requester: Option<&str>, target: &str) -> Self {
        if let Some(requester) = requester {
            session
                .waits
                .borrow_mut()
                .entry(requester.to_string())
                .or_default()
                .push(target.to_string());
        }

        Attachment {
            session: Rc::downgrade(session),
            requester: requester.map(str::to_string),
            target: target.to_string(),
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        let Some(session) = self.session.upgrade() else {
            return;
        };

        if let Some(requester) = &self.requester {
            let mut waits = session.waits.borrow_mut();
            if let Some(targets) = waits.get_mut(requester) {
                if let Some(position) = targets.iter().position(|t| *t == self.target) {
                    targets.swap_remove(position);
                }
                if targets.is_empty() {
                    waits.remove(requester);
                }
            }
        }

        session.detach(&self.target);
    }
}
