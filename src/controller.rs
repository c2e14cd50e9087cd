//! Controllers: route metadata bound to container-resolved handlers.
//!
//! A controller is a type implementing [`Invoke`] plus a description of
//! which of its methods answer which routes. [`ControllerBuilder`] records
//! that description; [`register_controller`] turns it into router entries
//! whose stack is `[before.., invoker(method), after..]`.
//!
//! ```rust
//! use std::sync::Arc;
//! use scopewire::{Container, Context, Error, Inject, Invoke, MethodTable, Next};
//! use scopewire::{controller, create_controller};
//!
//! struct Items;
//! impl Inject for Items {
//!     fn construct(_: &Container) -> Result<Self, Error> { Ok(Items) }
//! }
//! impl Invoke for Items {
//!     fn methods() -> MethodTable<Self> {
//!         MethodTable::new().method("list", Self::list)
//!     }
//! }
//! impl Items {
//!     async fn list(self: Arc<Self>, ctx: Context, _: Next) -> Result<(), Error> {
//!         ctx.respond("[]");
//!         Ok(())
//!     }
//! }
//!
//! let api = create_controller::<Items>().prefix("/items").get("/", "list");
//! let routes = controller([api]).unwrap();
//! # let _ = routes;
//! ```

use std::any::type_name;
use std::borrow::Cow;

use tracing::{debug, info};

use crate::container::{Inject, Resolver};
use crate::error::Error;
use crate::invoker::{Invoke, Invoker, make_resolver_invoker};
use crate::method::Verb;
use crate::middleware::{BoxedMiddleware, Compose, Middleware, boxed};
use crate::router::Router;

/// Per-route middleware, wrapped around the invoker of one method.
#[derive(Clone, Default)]
pub struct RouteOptions {
    before: Vec<BoxedMiddleware>,
    after: Vec<BoxedMiddleware>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before(mut self, middleware: impl Middleware) -> Self {
        self.before.push(boxed(middleware));
        self
    }

    pub fn after(mut self, middleware: impl Middleware) -> Self {
        self.after.push(boxed(middleware));
        self
    }
}

/// The rolled-up routing state of one controller method.
#[derive(Clone, Default)]
pub struct MethodConfig {
    pub verbs: Vec<Verb>,
    pub paths: Vec<String>,
    pub before: Vec<BoxedMiddleware>,
    pub after: Vec<BoxedMiddleware>,
}

impl std::fmt::Debug for MethodConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodConfig")
            .field("verbs", &self.verbs)
            .field("paths", &self.paths)
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

/// Anything that can describe a controller's routes and bind its methods.
pub trait ControllerSource: Send + Sync {
    /// A human-readable name for logs.
    fn name(&self) -> &str;

    /// Method name → routing state, with controller-level settings applied.
    fn state(&self) -> Vec<(Cow<'static, str>, MethodConfig)>;

    /// The middleware that resolves the controller and calls `method`.
    fn invoker(&self, method: &str) -> Result<BoxedMiddleware, Error>;
}

impl<S: ControllerSource + ?Sized> ControllerSource for Box<S> {
    fn name(&self) -> &str { (**self).name() }
    fn state(&self) -> Vec<(Cow<'static, str>, MethodConfig)> { (**self).state() }
    fn invoker(&self, method: &str) -> Result<BoxedMiddleware, Error> { (**self).invoker(method) }
}

/// Fluent description of a controller.
pub struct ControllerBuilder<T> {
    invoker: Invoker<T>,
    prefix: String,
    before: Vec<BoxedMiddleware>,
    after: Vec<BoxedMiddleware>,
    methods: Vec<(Cow<'static, str>, MethodConfig)>,
}

/// Starts a controller for a type implementing [`Inject`].
pub fn create_controller<T: Invoke + Inject>() -> ControllerBuilder<T> {
    create_controller_with(crate::container::as_class::<T>())
}

/// Starts a controller whose instances come from `resolver`.
pub fn create_controller_with<T: Invoke>(resolver: impl Into<Resolver<T>>) -> ControllerBuilder<T> {
    ControllerBuilder {
        invoker: make_resolver_invoker(resolver.into()),
        prefix: String::new(),
        before: Vec::new(),
        after: Vec::new(),
        methods: Vec::new(),
    }
}

impl<T: Invoke> ControllerBuilder<T> {
    /// Path prefix for every route of the controller.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Middleware that runs before every route of the controller.
    pub fn before(mut self, middleware: impl Middleware) -> Self {
        self.before.push(boxed(middleware));
        self
    }

    /// Middleware that runs after every route of the controller.
    pub fn after(mut self, middleware: impl Middleware) -> Self {
        self.after.push(boxed(middleware));
        self
    }

    pub fn get(self, path: &str, method: &'static str) -> Self {
        self.route([Verb::Get], path, method, RouteOptions::new())
    }

    pub fn head(self, path: &str, method: &'static str) -> Self {
        self.route([Verb::Head], path, method, RouteOptions::new())
    }

    pub fn post(self, path: &str, method: &'static str) -> Self {
        self.route([Verb::Post], path, method, RouteOptions::new())
    }

    pub fn put(self, path: &str, method: &'static str) -> Self {
        self.route([Verb::Put], path, method, RouteOptions::new())
    }

    pub fn patch(self, path: &str, method: &'static str) -> Self {
        self.route([Verb::Patch], path, method, RouteOptions::new())
    }

    pub fn delete(self, path: &str, method: &'static str) -> Self {
        self.route([Verb::Delete], path, method, RouteOptions::new())
    }

    pub fn options(self, path: &str, method: &'static str) -> Self {
        self.route([Verb::Options], path, method, RouteOptions::new())
    }

    pub fn all(self, path: &str, method: &'static str) -> Self {
        self.route([Verb::All], path, method, RouteOptions::new())
    }

    /// General form of the verb shortcuts.
    ///
    /// Declaring one method several times accumulates its verbs, paths and
    /// middleware; every verb is then registered for every path.
    pub fn route(
        mut self,
        verbs: impl IntoIterator<Item = Verb>,
        path: &str,
        method: &'static str,
        options: RouteOptions,
    ) -> Self {
        let index = match self.methods.iter().position(|(name, _)| name == method) {
            Some(index) => index,
            None => {
                self.methods.push((Cow::Borrowed(method), MethodConfig::default()));
                self.methods.len() - 1
            }
        };
        let config = &mut self.methods[index].1;
        for verb in verbs {
            if !config.verbs.contains(&verb) {
                config.verbs.push(verb);
            }
        }
        config.paths.push(path.to_owned());
        config.before.extend(options.before);
        config.after.extend(options.after);
        self
    }
}

impl<T: Invoke> ControllerSource for ControllerBuilder<T> {
    fn name(&self) -> &str {
        type_name::<T>()
    }

    fn state(&self) -> Vec<(Cow<'static, str>, MethodConfig)> {
        self.methods
            .iter()
            .map(|(name, config)| {
                let rolled = MethodConfig {
                    verbs: config.verbs.clone(),
                    paths: config.paths.iter().map(|p| join(&self.prefix, p)).collect(),
                    before: self.before.iter().chain(&config.before).cloned().collect(),
                    after: config.after.iter().chain(&self.after).cloned().collect(),
                };
                (name.clone(), rolled)
            })
            .collect()
    }

    fn invoker(&self, method: &str) -> Result<BoxedMiddleware, Error> {
        Ok(boxed(self.invoker.method(method.to_owned())?))
    }
}

fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match path.trim_start_matches('/') {
        "" if prefix.is_empty() => "/".to_owned(),
        "" => prefix.to_owned(),
        rest => format!("{prefix}/{rest}"),
    }
}

/// Registers every route of `source` into `router`.
///
/// A verb and path that is already registered, by this or another
/// controller, is chained after the existing stack: the earlier handler's
/// `next` runs this one.
pub fn register_controller(router: &mut Router, source: &dyn ControllerSource) -> Result<(), Error> {
    for (method, config) in source.state() {
        let invoker = source.invoker(&method)?;
        for verb in &config.verbs {
            for path in &config.paths {
                let stack = config
                    .before
                    .iter()
                    .cloned()
                    .chain([invoker.clone()])
                    .chain(config.after.iter().cloned());
                match verb {
                    Verb::All => router.all(path, stack)?,
                    verb => router.on(*verb, path, stack)?,
                };
            }
        }
        debug!(controller = source.name(), %method, verbs = ?config.verbs, paths = ?config.paths, "controller method bound");
    }
    Ok(())
}

/// Registers controllers and returns the router as one middleware.
pub fn controller<S: ControllerSource>(sources: impl IntoIterator<Item = S>) -> Result<Compose, Error> {
    let mut router = Router::new();
    for source in sources {
        register_controller(&mut router, &source)?;
    }
    Ok(router.into_middleware())
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// A controller submitted with [`submit_controller!`](crate::submit_controller).
#[doc(hidden)]
pub struct ControllerRegistration {
    pub module: &'static str,
    pub build: fn() -> Box<dyn ControllerSource>,
}

inventory::collect!(ControllerRegistration);

/// Submits a controller for [`load_controllers`].
///
/// ```rust,ignore
/// fn items() -> Box<dyn scopewire::ControllerSource> {
///     Box::new(scopewire::create_controller::<Items>().prefix("/items").get("/", "list"))
/// }
///
/// scopewire::submit_controller!(items);
/// ```
#[macro_export]
macro_rules! submit_controller {
    ($build:expr) => {
        $crate::__private::submit! {
            $crate::ControllerRegistration { module: ::core::module_path!(), build: $build }
        }
    };
}

/// Registers every submitted controller whose module path matches
/// `pattern`, where `*` matches any run of characters.
pub fn load_controllers(pattern: &str) -> Result<Compose, Error> {
    let mut router = Router::new();
    let mut loaded = 0_usize;
    for registration in inventory::iter::<ControllerRegistration> {
        if !wildcard_match(pattern, registration.module) {
            continue;
        }
        let source = (registration.build)();
        register_controller(&mut router, &*source)?;
        loaded += 1;
    }
    info!(pattern, loaded, "controllers loaded");
    Ok(router.into_middleware())
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let mut parts: Vec<&str> = parts.collect();
    let Some(last) = parts.pop() else {
        // No `*` at all.
        return rest.is_empty();
    };
    for part in parts {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
