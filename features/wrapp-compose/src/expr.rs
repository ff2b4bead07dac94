//! Deferred expressions over descriptors
//!
//! An [Expr] wraps one [Descriptor] and a static result type. Field access, indexing,
//! calls and operators never evaluate anything, they build new descriptors through
//! [Descriptor::map] and [Descriptor::zip].
//!
//! ```
//! use futures::executor::block_on;
//! use wrapp_compose::{expr::Expr, registry::BindingRegistry, resolver::Resolver};
//!
//! let registry = BindingRegistry::new()
//!     .add_value("width", 4_i64)
//!     .add_value("height", 3_i64);
//!
//! let area = Expr::<i64>::inject("width") * Expr::<i64>::inject("height");
//! let resolver = Resolver::new(registry);
//! assert_eq!(*block_on(resolver.eval(&area)).unwrap(), 12);
//! ```
//!
//! An `Expr` has no truth value. It can't be used as a condition, build an `Expr<bool>`
//! and resolve it instead.
//!
//! ```compile_fail
//! use wrapp_compose::expr::Expr;
//!
//! if Expr::<bool>::pure(true) {}
//! ```
//!
//! ```compile_fail
//! use wrapp_compose::expr::Expr;
//!
//! let ready: bool = Expr::<bool>::pure(true).into();
//! ```
//!
//! ```compile_fail
//! use wrapp_compose::expr::Expr;
//!
//! if *Expr::<bool>::pure(true) {}
//! ```

use std::{
    borrow::Cow,
    collections::BTreeSet,
    fmt::Debug,
    future::Future,
    marker::PhantomData,
    ops::{Add, BitAnd, BitOr, BitXor, Div, Index, Mul, Neg, Not, Rem, Shl, Shr, Sub},
    sync::Arc,
};

use crate::{
    descriptor::Descriptor,
    errors::ResolveError,
    types::{DynError, Injectable, Value},
};

/// A not yet resolved value of type `T`
pub struct Expr<T> {
    descriptor: Descriptor,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for Expr<T> {
    fn clone(&self) -> Self {
        Expr {
            descriptor: self.descriptor.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> Debug for Expr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Expr")
            .field(&std::any::type_name::<T>())
            .field(&self.descriptor)
            .finish()
    }
}

/// Identity comparison, two expressions are equal if they wrap the same descriptor
impl<T> PartialEq for Expr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.ptr_eq(&other.descriptor)
    }
}

impl<T> From<Expr<T>> for Descriptor {
    fn from(expr: Expr<T>) -> Self {
        expr.descriptor
    }
}

impl<T: Injectable> From<T> for Expr<T> {
    fn from(value: T) -> Self {
        Expr::pure(value)
    }
}

impl<T> Expr<T> {
    /// Wraps a descriptor, trusting it to produce a `T`
    ///
    /// A wrong type surfaces as [ResolveError::DowncastFailed] when the expression is used.
    pub fn from_descriptor(descriptor: Descriptor) -> Self {
        Expr {
            descriptor,
            _type: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn dependencies(&self) -> BTreeSet<String> {
        self.descriptor.dependencies()
    }

    /// Identity comparison, never resolves anything
    pub fn ptr_eq(&self, other: &Expr<T>) -> bool {
        self.descriptor.ptr_eq(&other.descriptor)
    }
}

impl<T: Injectable> Expr<T> {
    /// The value bound under `name`
    pub fn inject(name: impl Into<String>) -> Self {
        Self::from_descriptor(Descriptor::inject(name))
    }

    pub fn pure(value: T) -> Self {
        Self::from_descriptor(Descriptor::pure(value))
    }

    pub fn map<U, Fun>(&self, transform: Fun) -> Expr<U>
    where
        U: Injectable,
        Fun: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.map_labeled("map", transform)
    }

    fn map_labeled<U, Fun>(&self, label: impl Into<Cow<'static, str>>, transform: Fun) -> Expr<U>
    where
        U: Injectable,
        Fun: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.try_map_labeled(label, move |value| Ok::<_, ResolveError>(transform(value)))
    }

    /// Like [Expr::map], an error fails the resolution as a provider error
    pub fn try_map<U, Err, Fun>(&self, transform: Fun) -> Expr<U>
    where
        U: Injectable,
        Err: Into<DynError>,
        Fun: Fn(&T) -> Result<U, Err> + Send + Sync + 'static,
    {
        self.try_map_labeled("try_map", transform)
    }

    fn try_map_labeled<U, Err, Fun>(
        &self,
        label: impl Into<Cow<'static, str>>,
        transform: Fun,
    ) -> Expr<U>
    where
        U: Injectable,
        Err: Into<DynError>,
        Fun: Fn(&T) -> Result<U, Err> + Send + Sync + 'static,
    {
        let descriptor = self.descriptor.map_labeled(label, move |value: Value| {
            let result = match value.downcast::<T>() {
                Ok(value) => transform(&value).map(Value::new).map_err(Into::<DynError>::into),
                Err(e) => Err(DynError::from(e)),
            };
            async move { result }
        });
        Expr::from_descriptor(descriptor)
    }

    /// Applies an asynchronous transform
    pub fn then<U, Err, Fun, Fut>(&self, transform: Fun) -> Expr<U>
    where
        U: Injectable,
        Err: Into<DynError>,
        Fun: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, Err>> + 'static,
    {
        let transform = Arc::new(transform);
        let descriptor = self.descriptor.map_labeled("then", move |value: Value| {
            let transform = transform.clone();
            async move {
                let value = value.downcast::<T>()?;
                transform(value)
                    .await
                    .map(Value::new)
                    .map_err(Into::<DynError>::into)
            }
        });
        Expr::from_descriptor(descriptor)
    }

    /// Attribute access, `name` labels the step in debug output and errors
    pub fn field<U, Fun>(&self, name: &'static str, access: Fun) -> Expr<U>
    where
        U: Injectable + Clone,
        Fun: Fn(&T) -> &U + Send + Sync + 'static,
    {
        self.map_labeled(format!(".{name}"), move |value| access(value).clone())
    }

    /// Item access
    ///
    /// A missing index or key fails the resolution with a [ResolveError::Provider].
    pub fn at<I, U>(&self, index: I) -> Expr<U>
    where
        T: Index<I, Output = U>,
        I: Clone + Debug + Send + Sync + 'static,
        U: Injectable + Clone,
    {
        let label = format!("[{index:?}]");
        self.map_labeled(label, move |value| value[index.clone()].clone())
    }

    pub fn equals(&self, other: impl Into<Expr<T>>) -> Expr<bool>
    where
        T: PartialEq,
    {
        combine("==", self, &other.into(), |l: &T, r: &T| l == r)
    }

    pub fn not_equals(&self, other: impl Into<Expr<T>>) -> Expr<bool>
    where
        T: PartialEq,
    {
        combine("!=", self, &other.into(), |l: &T, r: &T| l != r)
    }

    pub fn less_than(&self, other: impl Into<Expr<T>>) -> Expr<bool>
    where
        T: PartialOrd,
    {
        combine("<", self, &other.into(), |l: &T, r: &T| l < r)
    }

    pub fn less_or_equal(&self, other: impl Into<Expr<T>>) -> Expr<bool>
    where
        T: PartialOrd,
    {
        combine("<=", self, &other.into(), |l: &T, r: &T| l <= r)
    }

    pub fn greater_than(&self, other: impl Into<Expr<T>>) -> Expr<bool>
    where
        T: PartialOrd,
    {
        combine(">", self, &other.into(), |l: &T, r: &T| l > r)
    }

    pub fn greater_or_equal(&self, other: impl Into<Expr<T>>) -> Expr<bool>
    where
        T: PartialOrd,
    {
        combine(">=", self, &other.into(), |l: &T, r: &T| l >= r)
    }
}

/// Calls on expressions resolving to functions
impl<F: Injectable> Expr<F> {
    pub fn call0<O>(&self) -> Expr<O>
    where
        F: Fn() -> O,
        O: Injectable,
    {
        self.map_labeled("call", |function| function())
    }

    pub fn call<A, O>(&self, arg: impl Into<Expr<A>>) -> Expr<O>
    where
        F: Fn(A) -> O,
        A: Injectable + Clone,
        O: Injectable,
    {
        combine("call", self, &arg.into(), |function: &F, a: &A| function(a.clone()))
    }

    pub fn call2<A, B, O>(&self, a: impl Into<Expr<A>>, b: impl Into<Expr<B>>) -> Expr<O>
    where
        F: Fn(A, B) -> O,
        A: Injectable + Clone,
        B: Injectable + Clone,
        O: Injectable,
    {
        let (a, b) = (a.into(), b.into());
        let descriptor = Descriptor::zip([
            self.descriptor.clone(),
            a.descriptor.clone(),
            b.descriptor.clone(),
        ])
        .map_labeled("call", |zipped: Value| {
            let result = zipped.downcast::<Vec<Value>>().and_then(|values| {
                match values.as_slice() {
                    [function, a, b] => {
                        let (function, a, b) = (function.downcast::<F>()?, a.downcast::<A>()?, b.downcast::<B>()?);
                        Ok(Value::new(function((*a).clone(), (*b).clone())))
                    }
                    _ => Err(arity_error(3, values.len())),
                }
            });
            async move { result.map_err(DynError::from) }
        });
        Expr::from_descriptor(descriptor)
    }
}

fn arity_error(expected: usize, received: usize) -> ResolveError {
    ResolveError::Signature {
        provider: "zip",
        expected,
        received: (0..received).map(|i| i.to_string()).collect(),
    }
}

/// Zips both sides and applies `op` to the resolved pair
fn combine<L, R, O>(label: &'static str, left: &Expr<L>, right: &Expr<R>, op: fn(&L, &R) -> O) -> Expr<O>
where
    L: Injectable,
    R: Injectable,
    O: Injectable,
{
    let descriptor = Descriptor::zip([left.descriptor.clone(), right.descriptor.clone()]).map_labeled(
        label,
        move |zipped: Value| {
            let result = zipped
                .downcast::<Vec<Value>>()
                .and_then(|values| match values.as_slice() {
                    [l, r] => Ok(Value::new(op(&*l.downcast::<L>()?, &*r.downcast::<R>()?))),
                    _ => Err(arity_error(2, values.len())),
                });
            async move { result.map_err(DynError::from) }
        },
    );
    Expr::from_descriptor(descriptor)
}

macro_rules! impl_binary_operator {
    ($Op:ident, $method:ident, $symbol:literal) => {
        impl<L, R> $Op<Expr<R>> for Expr<L>
        where
            L: Injectable + Clone + $Op<R>,
            R: Injectable + Clone,
            <L as $Op<R>>::Output: Injectable,
        {
            type Output = Expr<<L as $Op<R>>::Output>;

            fn $method(self, rhs: Expr<R>) -> Self::Output {
                combine($symbol, &self, &rhs, |l: &L, r: &R| l.clone().$method(r.clone()))
            }
        }

        impl<L, R> $Op<&Expr<R>> for &Expr<L>
        where
            L: Injectable + Clone + $Op<R>,
            R: Injectable + Clone,
            <L as $Op<R>>::Output: Injectable,
        {
            type Output = Expr<<L as $Op<R>>::Output>;

            fn $method(self, rhs: &Expr<R>) -> Self::Output {
                combine($symbol, self, rhs, |l: &L, r: &R| l.clone().$method(r.clone()))
            }
        }
    };
}

impl_binary_operator!(Add, add, "+");
impl_binary_operator!(Sub, sub, "-");
impl_binary_operator!(Mul, mul, "*");
impl_binary_operator!(Div, div, "/");
impl_binary_operator!(Rem, rem, "%");
impl_binary_operator!(BitAnd, bitand, "&");
impl_binary_operator!(BitOr, bitor, "|");
impl_binary_operator!(BitXor, bitxor, "^");
impl_binary_operator!(Shl, shl, "<<");
impl_binary_operator!(Shr, shr, ">>");

macro_rules! impl_unary_operator {
    ($Op:ident, $method:ident, $symbol:literal) => {
        impl<T> $Op for Expr<T>
        where
            T: Injectable + Clone + $Op,
            <T as $Op>::Output: Injectable,
        {
            type Output = Expr<<T as $Op>::Output>;

            fn $method(self) -> Self::Output {
                self.map_labeled($symbol, |value: &T| value.clone().$method())
            }
        }

        impl<T> $Op for &Expr<T>
        where
            T: Injectable + Clone + $Op,
            <T as $Op>::Output: Injectable,
        {
            type Output = Expr<<T as $Op>::Output>;

            fn $method(self) -> Self::Output {
                self.map_labeled($symbol, |value: &T| value.clone().$method())
            }
        }
    };
}

impl_unary_operator!(Neg, neg, "neg");
impl_unary_operator!(Not, not, "!");
