use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    future::Future,
    sync::Arc,
};

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::{
    provider::ProviderFunction,
    types::{DynError, Injectable, Kwargs, Value},
};

/// Transform applied to the resolved value of a [Descriptor::map]
pub type TransformFn =
    Arc<dyn Fn(Value) -> LocalBoxFuture<'static, Result<Value, DynError>> + Send + Sync>;

/// Names which only become known once some dependencies have been resolved
pub type DynamicFn = Arc<dyn Fn(&Kwargs) -> BTreeSet<String> + Send + Sync>;

/// A recipe for producing a value
///
/// Descriptors are immutable and cheap to clone. Combinators always return a new descriptor.
#[derive(Clone)]
pub struct Descriptor(Arc<Node>);

pub(crate) enum Node {
    Pure(Value),
    /// Reference to a named binding
    Ref(String),
    Bind(Bind),
    Mapped {
        src: Descriptor,
        label: Cow<'static, str>,
        transform: TransformFn,
    },
    Zipped(Vec<Descriptor>),
    /// Desugared into a zip over the values followed by a map re-pairing the names
    Dict {
        names: Vec<String>,
        inner: Descriptor,
    },
}

/// Leaf provider call
pub(crate) struct Bind {
    pub(crate) dependencies: BTreeSet<String>,
    pub(crate) dynamic: Option<DynamicFn>,
    pub(crate) function: ProviderFunction,
}

impl Bind {
    /// Dynamic names not already part of the static dependencies
    pub(crate) fn dynamic_dependencies(&self, known: &Kwargs) -> BTreeSet<String> {
        match &self.dynamic {
            Some(dynamic) => dynamic(known)
                .into_iter()
                .filter(|name| !self.dependencies.contains(name))
                .collect(),
            None => BTreeSet::new(),
        }
    }
}

impl Descriptor {
    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    fn from_node(node: Node) -> Self {
        Descriptor(Arc::new(node))
    }

    /// A constant, resolving never invokes a provider
    pub fn pure<T: Injectable>(value: T) -> Self {
        Self::pure_value(Value::new(value))
    }

    pub fn pure_value(value: Value) -> Self {
        Self::from_node(Node::Pure(value))
    }

    /// The value bound under `name`
    pub fn inject(name: impl Into<String>) -> Self {
        Self::from_node(Node::Ref(name.into()))
    }

    /// Calls `function` with exactly the resolved `dependencies`
    pub fn bind<Fun, Fut>(dependencies: impl IntoIterator<Item = impl Into<String>>, function: Fun) -> Self
    where
        Fun: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DynError>> + 'static,
    {
        let dependencies: Vec<String> = dependencies.into_iter().map(Into::into).collect();
        Self::bind_function(
            dependencies.clone(),
            None,
            ProviderFunction::from_kwargs(dependencies, function),
        )
    }

    /// Like [Descriptor::bind], but `dynamic` names further dependencies once the static ones are resolved
    ///
    /// The dynamic rule is queried again after each round of discovered names, until nothing new turns up.
    pub fn bind_dynamic<Fun, Fut, Dyn, Names>(
        dependencies: impl IntoIterator<Item = impl Into<String>>,
        dynamic: Dyn,
        function: Fun,
    ) -> Self
    where
        Fun: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DynError>> + 'static,
        Dyn: Fn(&Kwargs) -> Names + Send + Sync + 'static,
        Names: IntoIterator,
        Names::Item: Into<String>,
    {
        let dependencies: Vec<String> = dependencies.into_iter().map(Into::into).collect();
        Self::bind_function(
            dependencies.clone(),
            Some(dynamic_fn(dynamic)),
            ProviderFunction::from_kwargs(dependencies, function),
        )
    }

    pub(crate) fn bind_function(
        dependencies: Vec<String>,
        dynamic: Option<DynamicFn>,
        function: ProviderFunction,
    ) -> Self {
        Self::from_node(Node::Bind(Bind {
            dependencies: dependencies.into_iter().collect(),
            dynamic,
            function,
        }))
    }

    /// Resolves `flag`, then resolves and returns the binding whose name `choose` picks
    ///
    /// The chosen binding is a dynamic dependency, two registries differing only in
    /// the flag resolve different bindings.
    pub fn select<T, Choose>(flag: impl Into<String>, choose: Choose) -> Self
    where
        T: Injectable,
        Choose: Fn(&T) -> String + Send + Sync + 'static,
    {
        let flag: String = flag.into();
        let choose = Arc::new(choose);

        let dynamic = {
            let flag = flag.clone();
            let choose = choose.clone();
            move |known: &Kwargs| -> Option<String> {
                known.get::<T>(&flag).ok().map(|value| choose(&value))
            }
        };
        let function = {
            let flag = flag.clone();
            move |kwargs: Kwargs| {
                let chosen = kwargs
                    .get::<T>(&flag)
                    .map(|value| choose(&value))
                    .and_then(|name| kwargs.value(&name).cloned());
                async move { chosen.map_err(DynError::from) }
            }
        };

        Self::bind_dynamic([flag], dynamic, function)
    }

    /// Resolves `self`, then applies the asynchronous `transform` to the result
    pub fn map<Fun, Fut>(&self, transform: Fun) -> Self
    where
        Fun: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DynError>> + 'static,
    {
        self.map_labeled("map", transform)
    }

    /// [Descriptor::map] with a label shown in debug output and errors
    pub fn map_labeled<Fun, Fut>(&self, label: impl Into<Cow<'static, str>>, transform: Fun) -> Self
    where
        Fun: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DynError>> + 'static,
    {
        let transform: TransformFn = Arc::new(move |value: Value| transform(value).boxed_local());
        Self::from_node(Node::Mapped {
            src: self.clone(),
            label: label.into(),
            transform,
        })
    }

    /// Resolves all sources concurrently, yielding a `Vec<Value>` in source order
    pub fn zip(sources: impl IntoIterator<Item = Descriptor>) -> Self {
        Self::from_node(Node::Zipped(sources.into_iter().collect()))
    }

    /// Resolves all sources concurrently, yielding a `BTreeMap<String, Value>`
    pub fn dict(sources: impl IntoIterator<Item = (impl Into<String>, Descriptor)>) -> Self {
        let (names, values): (Vec<String>, Vec<Descriptor>) = sources
            .into_iter()
            .map(|(name, source)| (name.into(), source))
            .unzip();

        let keys = names.clone();
        let inner = Self::zip(values).map_labeled("dict", move |zipped| {
            let paired = zipped.downcast::<Vec<Value>>().map(|values| {
                keys.iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .collect::<BTreeMap<String, Value>>()
            });
            async move { paired.map(Value::new).map_err(DynError::from) }
        });

        Self::from_node(Node::Dict { names, inner })
    }

    /// Names required before this descriptor can be resolved
    pub fn dependencies(&self) -> BTreeSet<String> {
        match self.node() {
            Node::Pure(_) => BTreeSet::new(),
            Node::Ref(name) => BTreeSet::from([name.clone()]),
            Node::Bind(bind) => bind.dependencies.clone(),
            Node::Mapped { src, .. } => src.dependencies(),
            Node::Zipped(sources) => sources.iter().flat_map(Descriptor::dependencies).collect(),
            Node::Dict { inner, .. } => inner.dependencies(),
        }
    }

    /// Names discovered from the already `known` values
    ///
    /// Passing empty [Kwargs] shows what can be discovered without resolving anything.
    pub fn dynamic_dependencies(&self, known: &Kwargs) -> BTreeSet<String> {
        match self.node() {
            Node::Pure(_) | Node::Ref(_) => BTreeSet::new(),
            Node::Bind(bind) => bind.dynamic_dependencies(known),
            Node::Mapped { src, .. } => src.dynamic_dependencies(known),
            Node::Zipped(sources) => sources
                .iter()
                .flat_map(|source| source.dynamic_dependencies(known))
                .collect(),
            Node::Dict { inner, .. } => inner.dynamic_dependencies(known),
        }
    }

    pub fn complete_dependencies(&self, known: &Kwargs) -> BTreeSet<String> {
        let mut all = self.dependencies();
        all.extend(self.dynamic_dependencies(known));
        all
    }

    /// True if any part of the descriptor discovers dependencies at resolution time
    pub fn has_dynamic_dependencies(&self) -> bool {
        match self.node() {
            Node::Pure(_) | Node::Ref(_) => false,
            Node::Bind(bind) => bind.dynamic.is_some(),
            Node::Mapped { src, .. } => src.has_dynamic_dependencies(),
            Node::Zipped(sources) => sources.iter().any(Descriptor::has_dynamic_dependencies),
            Node::Dict { inner, .. } => inner.has_dynamic_dependencies(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.node() {
            Node::Pure(_) => "pure",
            Node::Ref(_) => "inject",
            Node::Bind(_) => "bind",
            Node::Mapped { .. } => "map",
            Node::Zipped(_) => "zip",
            Node::Dict { .. } => "dict",
        }
    }

    /// Identity comparison, never resolves anything
    pub fn ptr_eq(&self, other: &Descriptor) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.node() {
            Node::Pure(value) => f.debug_tuple("Pure").field(value).finish(),
            Node::Ref(name) => f.debug_tuple("Inject").field(name).finish(),
            Node::Bind(bind) => f
                .debug_struct("Bind")
                .field("dependencies", &bind.dependencies)
                .field("dynamic", &bind.dynamic.is_some())
                .field("function", &bind.function)
                .finish(),
            Node::Mapped { src, label, .. } => f
                .debug_struct("Mapped")
                .field("label", label)
                .field("src", src)
                .finish(),
            Node::Zipped(sources) => f.debug_tuple("Zipped").field(sources).finish(),
            Node::Dict { names, .. } => f.debug_tuple("Dict").field(names).finish(),
        }
    }
}

/// Erases a user supplied dynamic dependency rule
pub(crate) fn dynamic_fn<Dyn, Names>(dynamic: Dyn) -> DynamicFn
where
    Dyn: Fn(&Kwargs) -> Names + Send + Sync + 'static,
    Names: IntoIterator,
    Names::Item: Into<String>,
{
    Arc::new(move |known: &Kwargs| dynamic(known).into_iter().map(Into::into).collect())
}
