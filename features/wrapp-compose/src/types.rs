use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    sync::Arc,
};

use crate::errors::ResolveError;

/// Boxed error returned by user supplied providers and transforms
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Anything bound in a registry may be shared between threads
/// So it needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// A type erased, resolved value
#[derive(Clone)]
pub struct Value {
    pub info: TypeInfo,
    inner: Arc<dyn Any + Send + Sync + 'static>,
}
impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Value").field(&self.info.type_name).finish()
    }
}

impl Value {
    pub fn new<T: Injectable>(value: T) -> Self {
        Value {
            info: TypeInfo::of::<T>(),
            inner: Arc::new(value),
        }
    }

    /// Wraps an already shared value without another allocation
    pub fn from_arc<T: Injectable>(value: Arc<T>) -> Self {
        Value {
            info: TypeInfo::of::<T>(),
            inner: value,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.info.type_name
    }

    pub fn is<T: Injectable>(&self) -> bool {
        self.info.type_id == TypeId::of::<T>()
    }

    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, ResolveError> {
        Arc::downcast::<T>(self.inner.clone()).map_err(|_| ResolveError::DowncastFailed {
            required_type: std::any::type_name::<T>(),
            actual_type: self.info.type_name,
        })
    }

    /// True if both values point to the same allocation
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Resolved dependencies handed to a provider, keyed by binding name
#[derive(Debug, Clone, Default)]
pub struct Kwargs(BTreeMap<String, Value>);

impl Kwargs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }

    pub fn value(&self, name: &str) -> Result<&Value, ResolveError> {
        self.0
            .get(name)
            .ok_or_else(|| ResolveError::MissingArgument(name.to_string()))
    }

    /// Typed access to a resolved dependency
    pub fn get<T: Injectable>(&self, name: &str) -> Result<Arc<T>, ResolveError> {
        self.value(name)?.downcast()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drops every entry not contained in `names`
    pub fn retain_only(&mut self, names: &BTreeSet<String>) {
        self.0.retain(|name, _| names.contains(name));
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl FromIterator<(String, Value)> for Kwargs {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Kwargs(iter.into_iter().collect())
    }
}

impl Extend<(String, Value)> for Kwargs {
    fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}
