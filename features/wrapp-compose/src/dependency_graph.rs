use std::collections::{BTreeMap, BTreeSet, HashSet};

use thiserror::Error;

use crate::registry::BindingRegistry;

/// Static dependency graph of a registry, built without resolving anything
///
/// Meant for tooling such as linters and visualizers. Missing names are legal,
/// they may be bound by a registry merged in later, and dynamic dependencies are
/// not part of the graph. Resolution never consults it.
pub struct DependencyGraph {
    map: BTreeMap<String, DependencyGraphEntry>,
}

struct DependencyGraphEntry {
    kind: &'static str,
    dependencies: BTreeSet<String>,
    dynamic: bool,
}

impl DependencyGraph {
    pub fn new(registry: &BindingRegistry) -> Self {
        let map = registry
            .iter()
            .map(|(name, binding)| {
                let entry = DependencyGraphEntry {
                    kind: binding.kind(),
                    dependencies: binding.dependencies(),
                    dynamic: binding.has_dynamic_dependencies(),
                };
                (name.to_string(), entry)
            })
            .collect();

        DependencyGraph { map }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// Static dependencies of `name`, None if it isn't bound
    pub fn dependencies_of(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.map.get(name).map(|entry| &entry.dependencies)
    }

    /// Names statically depending on `name`
    pub fn dependents_of(&self, name: &str) -> BTreeSet<&str> {
        self.map
            .iter()
            .filter(|(_, entry)| entry.dependencies.contains(name))
            .map(|(dependent, _)| dependent.as_str())
            .collect()
    }

    /// Referenced names which no binding provides
    pub fn unbound(&self) -> BTreeSet<&str> {
        self.map
            .values()
            .flat_map(|entry| entry.dependencies.iter())
            .filter(|dependency| !self.map.contains_key(dependency.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// The first static cycle found, if any
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        self.check().err().and_then(|errors| {
            errors.errors.into_iter().find_map(|error| match error {
                DependencyGraphError::CircularDependency { chain } => Some(chain),
                DependencyGraphError::MissingDependency { .. } => None,
            })
        })
    }

    /// Lists every issue the static graph shows
    ///
    /// Advisory only, a registry with issues may still be merged into a complete one.
    pub fn check(&self) -> Result<(), DependencyGraphErrors> {
        let mut checked = HashSet::new();
        let mut errors = Vec::new();
        for name in self.map.keys() {
            let mut dependency_chain = Vec::new();
            check_recurse(self, &mut checked, &mut errors, &mut dependency_chain, name);
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }

        return Ok(());

        fn check_recurse(
            graph: &DependencyGraph,
            checked: &mut HashSet<String>,
            errors: &mut Vec<DependencyGraphError>,
            dependency_chain: &mut Vec<String>,
            name: &str,
        ) {
            if let Some(start) = dependency_chain.iter().position(|entry| entry == name) {
                let mut chain = dependency_chain[start..].to_vec();
                chain.push(name.to_string());
                errors.push(DependencyGraphError::CircularDependency { chain });
                return;
            }

            if !checked.insert(name.to_string()) {
                return;
            };

            let Some(entry) = graph.map.get(name) else {
                return;
            };

            dependency_chain.push(name.to_string());
            for dependency in &entry.dependencies {
                if !graph.map.contains_key(dependency) {
                    errors.push(DependencyGraphError::MissingDependency {
                        dependency: dependency.clone(),
                        required_by: name.to_string(),
                    });
                    continue;
                }

                check_recurse(graph, checked, errors, dependency_chain, dependency);
            }
            dependency_chain.pop();
        }
    }
}

impl std::fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, entry) in &self.map {
            let dependencies: Vec<&str> = entry.dependencies.iter().map(String::as_str).collect();
            write!(f, "{name} ({})", entry.kind)?;
            if !dependencies.is_empty() {
                write!(f, " <- {}", dependencies.join(", "))?;
            }
            if entry.dynamic {
                f.write_str(" +dynamic")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DependencyGraphError {
    #[error("'{required_by}' needs '{dependency}' but it is not bound")]
    MissingDependency {
        dependency: String,
        required_by: String,
    },
    #[error("A circular dependency exists through {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },
}

impl std::fmt::Display for DependencyGraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("The dependency graph had one or more issues:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[derive(Error, Debug, Clone)]
pub struct DependencyGraphErrors {
    pub errors: Vec<DependencyGraphError>,
}
