//! Binding container-resolved instances to middleware.
//!
//! An [`Invoker`] pairs a [`Resolver`] with the [`MethodTable`] of the type
//! it builds. Asking it for a method yields a [`MemberInvoker`], a
//! middleware that on every request:
//!
//! 1. takes the request scope out of the [`Context`],
//! 2. builds an instance from it (fresh, or cached by the resolver's
//!    lifetime),
//! 3. calls the named method with `(instance, ctx, next)`.
//!
//! Handlers stay plain types with plain `async fn`s; they never see the
//! container unless they ask for it.
//!
//! ```rust
//! use std::sync::Arc;
//! use scopewire::{Container, Context, Error, Inject, Invoke, MethodTable, Next, make_class_invoker};
//!
//! struct Greeter;
//!
//! impl Inject for Greeter {
//!     fn construct(_: &Container) -> Result<Self, Error> { Ok(Greeter) }
//! }
//!
//! impl Invoke for Greeter {
//!     fn methods() -> MethodTable<Self> {
//!         MethodTable::new().method("hello", Self::hello)
//!     }
//! }
//!
//! impl Greeter {
//!     async fn hello(self: Arc<Self>, ctx: Context, _next: Next) -> Result<(), Error> {
//!         ctx.respond("hello");
//!         Ok(())
//!     }
//! }
//!
//! let hello = make_class_invoker::<Greeter>().method("hello").unwrap();
//! # let _ = hello;
//! ```

use std::any::type_name;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::{Future, ready};
use std::sync::Arc;

use tracing::trace;

use crate::container::{Container, Factory, Inject, Resolver, ResolverOptions};
use crate::context::Context;
use crate::error::Error;
use crate::middleware::{BoxFuture, Middleware, Next};

type Method<T> =
    Arc<dyn Fn(Arc<T>, Context, Next) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Types whose methods can be invoked by name.
pub trait Invoke: Send + Sync + Sized + 'static {
    fn methods() -> MethodTable<Self>;
}

/// Name-addressed async methods of `T`.
pub struct MethodTable<T> {
    methods: HashMap<Cow<'static, str>, Method<T>>,
}

impl<T: Send + Sync + 'static> MethodTable<T> {
    pub fn new() -> Self {
        Self { methods: HashMap::new() }
    }

    /// Adds a method. A later method with the same name replaces the earlier.
    pub fn method<F, Fut>(mut self, name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(Arc<T>, Context, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let method: Method<T> = Arc::new(
            move |instance: Arc<T>, ctx: Context, next: Next| -> BoxFuture<'static, Result<(), Error>> {
                Box::pin(f(instance, ctx, next))
            },
        );
        self.methods.insert(name.into(), method);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(|k| k.as_ref())
    }

    fn get(&self, name: &str) -> Option<Method<T>> {
        self.methods.get(name).cloned()
    }
}

impl<T: Send + Sync + 'static> Default for MethodTable<T> {
    fn default() -> Self { Self::new() }
}

/// A validated method name: an identifier (`list`, `find_by_id`) or an
/// index (`0`).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MethodName(Cow<'static, str>);

impl MethodName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Result<Self, Error> {
        let name = name.into();
        if is_identifier(&name) || is_index(&name) {
            Ok(Self(name))
        } else {
            Err(Error::InvalidMethodName(name.into_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn is_index(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

// ── Invoker ───────────────────────────────────────────────────────────────────

/// Produces one middleware per method of `T`.
pub struct Invoker<T> {
    resolver: Resolver<T>,
    methods: Arc<MethodTable<T>>,
}

/// Creates an invoker for either factory shape.
pub fn make_invoker<T: Invoke>(factory: Factory<T>) -> Invoker<T> {
    make_resolver_invoker(Resolver::new(factory))
}

/// Same as [`make_invoker`] for a type implementing [`Inject`].
pub fn make_class_invoker<T: Invoke + Inject>() -> Invoker<T> {
    make_invoker(Factory::class())
}

/// Same as [`make_invoker`] for a factory function.
pub fn make_function_invoker<T, F>(f: F) -> Invoker<T>
where
    T: Invoke,
    F: Fn(&Container) -> Result<T, Error> + Send + Sync + 'static,
{
    make_invoker(Factory::function(f))
}

/// Creates an invoker that builds instances with `resolver`.
pub fn make_resolver_invoker<T: Invoke>(resolver: Resolver<T>) -> Invoker<T> {
    trace!(ty = type_name::<T>(), kind = ?resolver.kind(), "invoker created");
    Invoker { resolver, methods: Arc::new(T::methods()) }
}

impl<T: Invoke> Invoker<T> {
    /// Rebuilds the resolver with `options`, e.g. to make the instance
    /// scoped instead of transient.
    pub fn with_options(self, options: ResolverOptions) -> Self {
        let factory = self.resolver.factory().clone();
        Self { resolver: Resolver::with_options(factory, options), methods: self.methods }
    }

    pub fn resolver(&self) -> &Resolver<T> {
        &self.resolver
    }

    /// Returns the middleware that invokes `name`.
    ///
    /// Fails at configuration time if the name is not a valid method name
    /// or `T` has no method by that name.
    pub fn method(&self, name: impl Into<Cow<'static, str>>) -> Result<MemberInvoker<T>, Error> {
        let name = MethodName::new(name)?;
        let call = self.methods.get(name.as_str()).ok_or_else(|| Error::UnknownMethod {
            type_name: type_name::<T>(),
            method: name.to_string(),
        })?;
        Ok(MemberInvoker { resolver: self.resolver.clone(), name, call })
    }
}

impl<T> Clone for Invoker<T> {
    fn clone(&self) -> Self {
        Self { resolver: self.resolver.clone(), methods: Arc::clone(&self.methods) }
    }
}

/// Middleware that resolves a `T` per request and calls one of its methods.
pub struct MemberInvoker<T> {
    resolver: Resolver<T>,
    name: MethodName,
    call: Method<T>,
}

impl<T> MemberInvoker<T> {
    pub fn name(&self) -> &MethodName {
        &self.name
    }
}

impl<T: Invoke> Middleware for MemberInvoker<T> {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), Error>> {
        let instance = match resolve_from(&ctx, &self.resolver, || {
            format!("{}::{}", type_name::<T>(), self.name).into()
        }) {
            Ok(instance) => instance,
            Err(e) => return Box::pin(ready(Err(e))),
        };
        (self.call)(instance, ctx, next)
    }
}

/// Resolves `T` from the request scope and uses the result as middleware.
///
/// For types that are middleware themselves, as opposed to types exposing
/// middleware-shaped methods.
pub fn inject<T: Middleware>(resolver: impl Into<Resolver<T>>) -> Injected<T> {
    Injected { resolver: resolver.into() }
}

/// Middleware returned by [`inject`].
pub struct Injected<T> {
    resolver: Resolver<T>,
}

impl<T: Middleware> Middleware for Injected<T> {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), Error>> {
        match resolve_from(&ctx, &self.resolver, || type_name::<T>().into()) {
            Ok(resolved) => resolved.call(ctx, next),
            Err(e) => Box::pin(ready(Err(e))),
        }
    }
}

fn resolve_from<T: Send + Sync + 'static>(
    ctx: &Context,
    resolver: &Resolver<T>,
    target: impl FnOnce() -> Cow<'static, str>,
) -> Result<Arc<T>, Error> {
    let scope = ctx.scope().ok_or_else(|| Error::MissingScope(target()))?;
    scope.build(resolver)
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::container::{FactoryKind, Lifetime};
    use crate::request::Request;

    struct Echo;

    impl Invoke for Echo {
        fn methods() -> MethodTable<Self> {
            MethodTable::new().method("echo", Self::echo)
        }
    }

    impl Echo {
        async fn echo(self: Arc<Self>, ctx: Context, _next: Next) -> Result<(), Error> {
            ctx.respond(ctx.path());
            Ok(())
        }
    }

    impl Inject for Echo {
        fn construct(_: &Container) -> Result<Self, Error> { Ok(Echo) }
    }

    #[test]
    fn factory_shape_is_reported() {
        assert_eq!(make_class_invoker::<Echo>().resolver().kind(), FactoryKind::Class);
        assert_eq!(make_function_invoker(|_| Ok(Echo)).resolver().kind(), FactoryKind::Function);
        assert_eq!(make_invoker(Factory::function(|_| Ok(Echo))).resolver().kind(), FactoryKind::Function);
    }

    #[test]
    fn with_options_keeps_the_factory_and_replaces_the_lifetime() {
        let invoker = make_class_invoker::<Echo>()
            .with_options(ResolverOptions::new().lifetime(Lifetime::Scoped));

        assert_eq!(invoker.resolver().kind(), FactoryKind::Class);
        assert_eq!(invoker.resolver().options().lifetime, Lifetime::Scoped);
        assert!(invoker.method("echo").is_ok());
    }

    #[test]
    fn method_names_are_identifiers_or_indexes() {
        assert!(MethodName::new("list").is_ok());
        assert!(MethodName::new("_find_by_id2").is_ok());
        assert!(MethodName::new("0").is_ok());

        for bad in ["", "2fast", "with space", "dash-ed"] {
            assert!(matches!(MethodName::new(bad), Err(Error::InvalidMethodName(_))), "{bad}");
        }
    }

    #[test]
    fn unknown_methods_fail_at_configuration_time() {
        let invoker = make_function_invoker(|_| Ok(Echo));
        assert!(invoker.method("echo").is_ok());
        assert!(matches!(invoker.method("shout"), Err(Error::UnknownMethod { .. })));
        assert!(matches!(invoker.method(""), Err(Error::InvalidMethodName(_))));
    }

    #[tokio::test]
    async fn invoking_without_a_scope_is_a_checked_error() {
        let echo = make_function_invoker(|_| Ok(Echo)).method("echo").unwrap();
        let ctx = Context::new(Request::new(Method::GET, "/echo"));

        let err = echo.call(ctx, Next::end()).await.unwrap_err();
        assert!(matches!(err, Error::MissingScope(ref target) if target.ends_with("Echo::echo")));
    }

    #[tokio::test]
    async fn invokes_the_named_method_on_a_resolved_instance() {
        let echo = make_function_invoker(|_| Ok(Echo)).method("echo").unwrap();
        let ctx = Context::new(Request::new(Method::GET, "/echo"));
        ctx.set_scope(Container::builder().build().create_scope());

        echo.call(ctx.clone(), Next::end()).await.unwrap();
        assert_eq!(ctx.take_response().unwrap().body().as_ref(), b"/echo");
    }
}
