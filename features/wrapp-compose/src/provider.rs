use std::{any::type_name, fmt::Debug, future::Future, sync::Arc};

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::{
    descriptor::{dynamic_fn, Descriptor, DynamicFn},
    errors::ResolveError,
    types::{DynError, Injectable, Kwargs, Value},
};

/// Erased function receiving resolved dependencies by name
pub type KwargsFn =
    Arc<dyn Fn(Kwargs) -> LocalBoxFuture<'static, Result<Value, DynError>> + Send + Sync>;

/// Releases a session scoped value
pub type TeardownFn =
    Arc<dyn Fn(Value) -> LocalBoxFuture<'static, Result<(), DynError>> + Send + Sync>;

/// A uniformly callable provider function
///
/// Whatever the native shape of the wrapped function, it is invoked with a [Kwargs] map.
/// [ProviderFunction::parameters] are exactly the declared dependency names.
#[derive(Clone)]
pub struct ProviderFunction {
    parameters: Arc<[String]>,
    /// Number of positional parameters of the wrapped function, None for keyword functions
    arity: Option<usize>,
    function_name: &'static str,
    call: KwargsFn,
}
impl Debug for ProviderFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.function_name, self.parameters.join(", "))
    }
}

impl ProviderFunction {
    pub(crate) fn new(
        parameters: Vec<String>,
        arity: Option<usize>,
        function_name: &'static str,
        call: KwargsFn,
    ) -> Self {
        ProviderFunction {
            parameters: parameters.into(),
            arity,
            function_name,
            call,
        }
    }

    /// Wraps a function already taking a keyword map
    pub fn from_kwargs<Fun, Fut>(parameters: Vec<String>, function: Fun) -> Self
    where
        Fun: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DynError>> + 'static,
    {
        let call: KwargsFn = Arc::new(move |kwargs: Kwargs| function(kwargs).boxed_local());
        Self::new(parameters, None, type_name::<Fun>(), call)
    }

    /// The synthesized parameter list
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn function_name(&self) -> &'static str {
        self.function_name
    }

    /// Invokes the wrapped function
    ///
    /// Fails with [ResolveError::Signature] if the declared names don't fit the function.
    pub fn call(&self, kwargs: Kwargs) -> LocalBoxFuture<'static, Result<Value, DynError>> {
        if let Some(arity) = self.arity {
            if arity != self.parameters.len() {
                let error = ResolveError::Signature {
                    provider: self.function_name,
                    expected: arity,
                    received: self.parameters.to_vec(),
                };
                return futures::future::ready(Err(error.into())).boxed_local();
            }
        }

        (self.call)(kwargs)
    }
}

/// Any function usable as provider
///
/// Implemented for functions taking up to six `Arc<T>` arguments,
/// returning a future of `Result<impl Injectable, impl Into<DynError>>`.
pub trait IntoProviderFunction<Args>: Send + Sync + 'static {
    fn into_provider_function(self, parameters: Vec<String>) -> ProviderFunction;
}

macro_rules! one {
    ($arg:ident) => {
        1usize
    };
}

macro_rules! impl_into_provider_function {
    ($($arg:ident),*) => {
        impl<Fun, Fut, Out, Err, $($arg,)*> IntoProviderFunction<($($arg,)*)> for Fun
        where
            Fun: Fn($(Arc<$arg>),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<Out, Err>> + 'static,
            Out: Injectable,
            Err: Into<DynError>,
            $($arg: Injectable,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_provider_function(self, parameters: Vec<String>) -> ProviderFunction {
                let arity = 0usize $(+ one!($arg))*;
                let names = parameters.clone();

                let call: KwargsFn = Arc::new(move |kwargs: Kwargs| -> LocalBoxFuture<'static, Result<Value, DynError>> {
                    let mut names = names.iter();
                    $(
                        let $arg = match names.next() {
                            Some(name) => match kwargs.get::<$arg>(name) {
                                Ok(value) => value,
                                Err(e) => return futures::future::ready(Err(e.into())).boxed_local(),
                            },
                            None => {
                                let e = ResolveError::MissingArgument(stringify!($arg).to_string());
                                return futures::future::ready(Err(e.into())).boxed_local();
                            }
                        };
                    )*

                    let fut = self($($arg),*);
                    async move { fut.await.map(Value::new).map_err(Into::<DynError>::into) }.boxed_local()
                });

                ProviderFunction::new(parameters, Some(arity), type_name::<Fun>(), call)
            }
        }
    };
}

impl_into_provider_function!();
impl_into_provider_function!(A1);
impl_into_provider_function!(A1, A2);
impl_into_provider_function!(A1, A2, A3);
impl_into_provider_function!(A1, A2, A3, A4);
impl_into_provider_function!(A1, A2, A3, A4, A5);
impl_into_provider_function!(A1, A2, A3, A4, A5, A6);

/// A named computation from an ordered set of dependency names
///
/// # Example
/// ```
/// use std::{convert::Infallible, sync::Arc};
/// use wrapp_compose::provider::Provider;
///
/// let sum = Provider::new(["a", "b"], |a: Arc<i64>, b: Arc<i64>| async move {
///     Ok::<_, Infallible>(*a + *b)
/// });
/// assert_eq!(sum.provider_function().parameters(), ["a", "b"]);
/// ```
#[derive(Clone)]
pub struct Provider {
    dependencies: Vec<String>,
    dynamic: Option<DynamicFn>,
    function: ProviderFunction,
    teardown: Option<TeardownFn>,
}
impl Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("function", &self.function)
            .field("dynamic", &self.dynamic.is_some())
            .field("session_scoped", &self.teardown.is_some())
            .finish()
    }
}

impl Provider {
    /// Provider from a function taking its dependencies positionally, in the order of `names`
    pub fn new<Args, Fun: IntoProviderFunction<Args>>(
        names: impl IntoIterator<Item = impl Into<String>>,
        function: Fun,
    ) -> Self {
        let dependencies = ordered_set(names);
        let function = function.into_provider_function(dependencies.clone());
        Self::from_function(dependencies, function)
    }

    /// Provider from a function taking the keyword map of its dependencies
    pub fn from_kwargs<Fun, Fut, Out, Err>(
        names: impl IntoIterator<Item = impl Into<String>>,
        function: Fun,
    ) -> Self
    where
        Fun: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, Err>> + 'static,
        Out: Injectable,
        Err: Into<DynError>,
    {
        let dependencies = ordered_set(names);
        let function = ProviderFunction::from_kwargs(dependencies.clone(), move |kwargs| {
            let fut = function(kwargs);
            async move { fut.await.map(Value::new).map_err(Into::<DynError>::into) }
        });
        Self::from_function(dependencies, function)
    }

    fn from_function(dependencies: Vec<String>, function: ProviderFunction) -> Self {
        Provider {
            dependencies,
            dynamic: None,
            function,
            teardown: None,
        }
    }

    /// Adds dependencies discovered from the resolved static ones
    ///
    /// The discovered values are handed to the function by name, so this fits [Provider::from_kwargs].
    pub fn with_dynamic<Dyn, Names>(mut self, dynamic: Dyn) -> Self
    where
        Dyn: Fn(&Kwargs) -> Names + Send + Sync + 'static,
        Names: IntoIterator,
        Names::Item: Into<String>,
    {
        self.dynamic = Some(dynamic_fn(dynamic));
        self
    }

    /// Marks the produced value as owned by the resolving session
    ///
    /// `teardown` runs when the session is destructed, in reverse creation order.
    pub fn with_teardown<T, Fun, Fut, Err>(mut self, teardown: Fun) -> Self
    where
        T: Injectable,
        Fun: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Err>> + 'static,
        Err: Into<DynError>,
    {
        let teardown: TeardownFn = Arc::new(
            move |value: Value| -> LocalBoxFuture<'static, Result<(), DynError>> {
                match value.downcast::<T>() {
                    Ok(value) => {
                        let fut = teardown(value);
                        async move { fut.await.map_err(Into::<DynError>::into) }.boxed_local()
                    }
                    Err(e) => futures::future::ready(Err(e.into())).boxed_local(),
                }
            },
        );
        self.teardown = Some(teardown);
        self
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn has_dynamic_dependencies(&self) -> bool {
        self.dynamic.is_some()
    }

    pub fn is_session_scoped(&self) -> bool {
        self.teardown.is_some()
    }

    /// The provider function with its synthesized parameter list
    pub fn provider_function(&self) -> &ProviderFunction {
        &self.function
    }

    /// The provider as a [Descriptor] leaf
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::bind_function(
            self.dependencies.clone(),
            self.dynamic.clone(),
            self.function.clone(),
        )
    }

    pub(crate) fn teardown(&self) -> Option<&TeardownFn> {
        self.teardown.as_ref()
    }
}

/// Collects names, dropping repeated ones but keeping the first occurrence's position
fn ordered_set(names: impl IntoIterator<Item = impl Into<String>>) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    for name in names.into_iter().map(Into::into) {
        if !ordered.contains(&name) {
            ordered.push(name);
        }
    }
    ordered
}
