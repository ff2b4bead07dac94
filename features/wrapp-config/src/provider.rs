use std::{collections::BTreeMap, sync::Arc};

use wrapp_compose::{BindingRegistry, Injectable, Value};

use crate::errors::{GetConfigError, RegisterConfigError};

/// A provider to register all configs.
///
/// Configs are registered and retrieved by name, each name holds one typed value.
#[derive(Debug, Clone, Default)]
pub struct ConfigProvider {
    configs: BTreeMap<String, Value>,
}

impl ConfigProvider {
    /// Initializes an empty Config Provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the config registered under `name`.
    ///
    /// Returns `Ok(None)` if nothing is registered under that name,
    /// a [`GetConfigError`] if the config has another type.
    pub fn get_config<T: Injectable>(&self, name: &str) -> Result<Option<Arc<T>>, GetConfigError> {
        self.configs
            .get(name)
            .map(|config| {
                config.downcast::<T>().map_err(|_| GetConfigError::WrongType {
                    name: name.to_string(),
                    required_type: std::any::type_name::<T>(),
                    actual_type: config.type_name(),
                })
            })
            .transpose()
    }

    /// Add a config to the registry.
    ///
    /// If the name is already registered, it will return a [`RegisterConfigError`]
    pub fn add_config<T: Injectable>(
        &mut self,
        name: impl Into<String>,
        config: T,
    ) -> Result<&mut Self, RegisterConfigError> {
        let name = name.into();
        if self.configs.contains_key(&name) {
            return Err(RegisterConfigError::AlreadyRegistered(name));
        }

        tracing::debug!("Registering config '{name}' of type {}", std::any::type_name::<T>());
        self.configs.insert(name, Value::new(config));
        Ok(self)
    }

    /// Can optionally add a config to the registry.
    ///
    /// If the config provided is `Some(T)`, it will be the same as calling [`ConfigProvider::add_config`]
    /// If the config provided is `None`, then the function just returns `Ok(self)` for chaining
    pub fn maybe_add_config<T: Injectable>(
        &mut self,
        name: impl Into<String>,
        config: Option<T>,
    ) -> Result<&mut Self, RegisterConfigError> {
        match config {
            Some(c) => self.add_config(name, c),
            None => Ok(self),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    /// Every config as a value binding of the same name
    pub fn to_registry(&self) -> BindingRegistry {
        self.configs
            .iter()
            .fold(BindingRegistry::new(), |registry, (name, config)| {
                registry.add(name.as_str(), config.clone())
            })
    }

    pub fn into_registry(self) -> BindingRegistry {
        self.to_registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Database {
        url: String,
    }

    #[test]
    fn configs_are_retrieved_by_name_and_type() {
        let mut provider = ConfigProvider::new();
        provider
            .add_config(
                "database",
                Database {
                    url: "postgres://localhost".to_string(),
                },
            )
            .unwrap()
            .maybe_add_config("cache", None::<String>)
            .unwrap();

        let database = provider.get_config::<Database>("database").unwrap().unwrap();
        assert_eq!(database.url, "postgres://localhost");
        assert!(provider.get_config::<String>("cache").unwrap().is_none());
        assert!(matches!(
            provider.get_config::<String>("database"),
            Err(GetConfigError::WrongType { .. })
        ));
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut provider = ConfigProvider::new();
        provider.add_config("port", 8080_u16).unwrap();

        assert!(matches!(
            provider.add_config("port", 9090_u16),
            Err(RegisterConfigError::AlreadyRegistered(name)) if name == "port"
        ));
        assert_eq!(*provider.get_config::<u16>("port").unwrap().unwrap(), 8080);
    }

    #[test]
    fn registry_binds_every_config() {
        let mut provider = ConfigProvider::new();
        provider.add_config("port", 8080_u16).unwrap();
        provider.add_config("host", "localhost").unwrap();

        let registry = provider.into_registry();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["host", "port"]);
    }
}
