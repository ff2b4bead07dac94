//! Dependency injection by composition
//!
//! A [BindingRegistry] maps names to bindings: constants, providers computing a value from
//! other names, or arbitrary [Descriptor]s. A [Resolver] turns a name or descriptor into a value,
//! resolving every dependency once per session and independent dependencies concurrently.
//!
//! ```
//! use std::{convert::Infallible, sync::Arc};
//! use futures::executor::block_on;
//! use wrapp_compose::{BindingRegistry, Descriptor, Provider, Resolver};
//!
//! let registry = BindingRegistry::new()
//!     .add_value("a", 2_i64)
//!     .add_value("b", 3_i64)
//!     .add_provider("sum", Provider::new(["a", "b"], |a: Arc<i64>, b: Arc<i64>| async move {
//!         Ok::<_, Infallible>(*a + *b)
//!     }));
//!
//! let resolver = Resolver::new(registry);
//! assert_eq!(*block_on(resolver.get::<i64>("sum")).unwrap(), 5);
//!
//! let doubled = Descriptor::inject("sum").map(|sum| async move {
//!     let sum = sum.downcast::<i64>()?;
//!     Ok::<_, wrapp_compose::DynError>(wrapp_compose::Value::new(*sum * 2))
//! });
//! assert_eq!(*block_on(resolver.get::<i64>(doubled)).unwrap(), 10);
//! ```

pub mod builder;
pub mod dependency_graph;
pub mod descriptor;
pub mod errors;
pub mod expr;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod types;

pub use builder::ResolverBuilder;
pub use dependency_graph::DependencyGraph;
pub use descriptor::Descriptor;
pub use errors::ResolveError;
pub use expr::Expr;
pub use provider::{Provider, ProviderFunction};
pub use registry::{Binding, BindingRegistry};
pub use resolver::{BlockingPool, BlockingResolver, Resolvable, Resolver};
pub use types::{DynError, Injectable, Kwargs, TypeInfo, Value};
