use std::{
    collections::{BTreeSet, HashMap},
    fmt::Debug,
    ops::Add,
    sync::Arc,
};

use crate::{
    descriptor::Descriptor,
    provider::Provider,
    types::{Injectable, Value},
};

/// A named rule for producing a value
#[derive(Clone)]
pub enum Binding {
    /// A constant
    Value(Value),
    /// A computation from other named values
    Provider(Provider),
    /// Wraps a descriptor directly
    Delegate(Descriptor),
}
impl Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Binding::Provider(provider) => f.debug_tuple("Provider").field(provider).finish(),
            Binding::Delegate(descriptor) => f.debug_tuple("Delegate").field(descriptor).finish(),
        }
    }
}

impl Binding {
    pub fn value<T: Injectable>(value: T) -> Self {
        Binding::Value(Value::new(value))
    }

    /// Static dependency names, known without resolving anything
    pub fn dependencies(&self) -> BTreeSet<String> {
        match self {
            Binding::Value(_) => BTreeSet::new(),
            Binding::Provider(provider) => provider.dependencies().iter().cloned().collect(),
            Binding::Delegate(descriptor) => descriptor.dependencies(),
        }
    }

    pub fn has_dynamic_dependencies(&self) -> bool {
        match self {
            Binding::Value(_) => false,
            Binding::Provider(provider) => provider.has_dynamic_dependencies(),
            Binding::Delegate(descriptor) => descriptor.has_dynamic_dependencies(),
        }
    }

    /// The binding as a descriptor
    pub fn descriptor(&self) -> Descriptor {
        match self {
            Binding::Value(value) => Descriptor::pure_value(value.clone()),
            Binding::Provider(provider) => provider.descriptor(),
            Binding::Delegate(descriptor) => descriptor.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Binding::Value(_) => "value",
            Binding::Provider(_) => "provider",
            Binding::Delegate(_) => "delegate",
        }
    }
}

impl From<Provider> for Binding {
    fn from(provider: Provider) -> Self {
        Binding::Provider(provider)
    }
}

impl From<Descriptor> for Binding {
    fn from(descriptor: Descriptor) -> Self {
        Binding::Delegate(descriptor)
    }
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Value(value)
    }
}

/// Ordered, immutable mapping from name to [Binding]
///
/// Registries compose through [BindingRegistry::merge], where the right hand side wins.
/// Names may reference bindings only added by a later merge, absence only fails at resolution time.
///
/// # Example
/// ```
/// use wrapp_compose::registry::BindingRegistry;
///
/// let base = BindingRegistry::new().add_value("x", 1_i64).add_value("y", 2_i64);
/// let overrides = BindingRegistry::new().add_value("x", 10_i64);
///
/// let merged = base.merge(&overrides);
/// assert_eq!(merged.names().collect::<Vec<_>>(), vec!["x", "y"]);
/// ```
#[derive(Clone, Default)]
pub struct BindingRegistry(Arc<RegistryInner>);

#[derive(Clone, Default)]
struct RegistryInner {
    entries: Vec<(String, Binding)>,
    index: HashMap<String, usize>,
}
impl Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (name, binding) in self.iter() {
            map.entry(&name, &binding.kind());
        }
        map.finish()
    }
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (impl Into<String>, Binding)>) -> Self {
        let mut inner = RegistryInner::default();
        for (name, binding) in entries {
            inner.insert(name.into(), binding);
        }
        BindingRegistry(Arc::new(inner))
    }

    /// Returns a registry with `binding` added under `name`, replacing any previous one
    pub fn add(self, name: impl Into<String>, binding: impl Into<Binding>) -> Self {
        let mut inner = Arc::unwrap_or_clone(self.0);
        inner.insert(name.into(), binding.into());
        BindingRegistry(Arc::new(inner))
    }

    pub fn add_value<T: Injectable>(self, name: impl Into<String>, value: T) -> Self {
        self.add(name, Binding::value(value))
    }

    pub fn add_provider(self, name: impl Into<String>, provider: Provider) -> Self {
        self.add(name, Binding::Provider(provider))
    }

    pub fn add_delegate(self, name: impl Into<String>, descriptor: Descriptor) -> Self {
        self.add(name, Binding::Delegate(descriptor))
    }

    /// Override-merge, every name of `other` replaces the same name in `self`
    ///
    /// Non colliding names of both survive. Overridden names keep their position.
    pub fn merge(&self, other: &BindingRegistry) -> BindingRegistry {
        let mut inner = (*self.0).clone();
        for (name, binding) in other.iter() {
            inner.insert(name.to_string(), binding.clone());
        }
        BindingRegistry(Arc::new(inner))
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.0
            .index
            .get(name)
            .map(|&position| &self.0.entries[position].1)
    }

    /// Whether `name` is bound at all
    pub fn contains(&self, name: &str) -> bool {
        self.0.index.contains_key(name)
    }

    /// All declared names, in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.0
            .entries
            .iter()
            .map(|(name, binding)| (name.as_str(), binding))
    }

    pub fn len(&self) -> usize {
        self.0.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.is_empty()
    }
}

impl RegistryInner {
    fn insert(&mut self, name: String, binding: Binding) {
        match self.index.get(&name) {
            Some(&position) => self.entries[position].1 = binding,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, binding));
            }
        }
    }
}

impl<N: Into<String>> FromIterator<(N, Binding)> for BindingRegistry {
    fn from_iter<I: IntoIterator<Item = (N, Binding)>>(iter: I) -> Self {
        Self::from_entries(iter)
    }
}

impl Add for BindingRegistry {
    type Output = BindingRegistry;

    fn add(self, other: BindingRegistry) -> BindingRegistry {
        self.merge(&other)
    }
}

impl Add<&BindingRegistry> for &BindingRegistry {
    type Output = BindingRegistry;

    fn add(self, other: &BindingRegistry) -> BindingRegistry {
        self.merge(other)
    }
}
