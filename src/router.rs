//! Radix-tree request router.
//!
//! One tree per verb, plus one for catch-all [`Verb::All`] registrations.
//! O(path-length) lookup via [`matchit`]. Each route holds a composed
//! middleware stack; the router itself is exposed as two middleware:
//!
//! - [`Router::routes`] runs the stack of the matching route, or passes
//!   the request on untouched;
//! - [`Router::allowed_methods`] answers `OPTIONS`, `405` and `501` for
//!   paths that exist under other verbs.
//!
//! Registering the same verb and path twice chains the stacks: the later
//! stack runs when the earlier one calls `next`.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{ALLOW, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::Error;
use crate::method::Verb;
use crate::middleware::{BoxFuture, BoxedMiddleware, Compose, Middleware, Next, boxed, compose};

#[derive(Clone, Default)]
struct Table {
    /// Leaves are indexes into `chains`.
    trees: HashMap<Verb, MatchitRouter<usize>>,
    chains: Vec<Compose>,
    patterns: HashMap<(Verb, String), usize>,
}

impl Table {
    fn insert(&mut self, verb: Verb, pattern: String, chain: Compose) -> Result<(), matchit::InsertError> {
        if let Some(&index) = self.patterns.get(&(verb, pattern.clone())) {
            let earlier = self.chains[index].clone();
            self.chains[index] = compose([boxed(earlier), boxed(chain)]);
            return Ok(());
        }
        let index = self.chains.len();
        self.trees.entry(verb).or_default().insert(pattern.as_str(), index)?;
        self.chains.push(chain);
        self.patterns.insert((verb, pattern), index);
        Ok(())
    }

    fn at(&self, verb: Verb, path: &str) -> Option<(Compose, Vec<(String, String)>)> {
        let matched = self.trees.get(&verb)?.at(path).ok()?;
        let params = matched.params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
        Some((self.chains.get(*matched.value)?.clone(), params))
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(Compose, Vec<(String, String)>)> {
        let verb = Verb::from_http(method)?;
        self.at(verb, path)
            .or_else(|| (verb == Verb::Head).then(|| self.at(Verb::Get, path)).flatten())
            .or_else(|| self.at(Verb::All, path))
    }

    fn matches(&self, verb: Verb, path: &str) -> bool {
        self.trees.get(&verb).is_some_and(|tree| tree.at(path).is_ok())
    }

    /// Verbs with a route for `path`, in [`Verb::WIRE`] order.
    fn allowed(&self, path: &str) -> Vec<Verb> {
        if self.matches(Verb::All, path) {
            return Verb::WIRE.to_vec();
        }
        let get = self.matches(Verb::Get, path);
        Verb::WIRE
            .into_iter()
            .filter(|v| self.matches(*v, path) || (*v == Verb::Head && get))
            .collect()
    }
}

/// The application router.
///
/// Build it once at startup, then hand [`routes`](Router::routes) and
/// [`allowed_methods`](Router::allowed_methods) to a middleware chain.
/// Routes registered after those calls are not seen by them.
#[derive(Clone, Default)]
pub struct Router {
    table: Arc<Table>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a middleware stack for a verb + path pair.
    ///
    /// Paths use `{name}` parameters and a trailing `{*rest}` catch-all;
    /// the `:name` and `*rest` forms are accepted too. Registering a verb
    /// and path that already has a stack appends this stack after it.
    ///
    /// ```rust
    /// # use scopewire::{Context, Error, Next, Router, Verb};
    /// # use scopewire::middleware::boxed;
    /// # async fn list(_: Context, _: Next) -> Result<(), Error> { Ok(()) }
    /// # async fn find(_: Context, _: Next) -> Result<(), Error> { Ok(()) }
    /// let mut router = Router::new();
    /// router
    ///     .on(Verb::Get, "/items",      [boxed(list)])?
    ///     .on(Verb::Get, "/items/:id",  [boxed(find)])?;
    /// # Ok::<(), Error>(())
    /// ```
    pub fn on(
        &mut self,
        verb: Verb,
        path: &str,
        stack: impl IntoIterator<Item = BoxedMiddleware>,
    ) -> Result<&mut Self, Error> {
        let pattern = normalize(path);
        let chain = compose(stack);
        let len = chain.len();
        Arc::make_mut(&mut self.table)
            .insert(verb, pattern.clone(), chain)
            .map_err(|e| Error::Route { path: path.to_owned(), reason: e.to_string() })?;
        debug!(%verb, path = %pattern, len, "route registered");
        Ok(self)
    }

    /// Registers a stack that matches every verb for `path`.
    pub fn all(
        &mut self,
        path: &str,
        stack: impl IntoIterator<Item = BoxedMiddleware>,
    ) -> Result<&mut Self, Error> {
        self.on(Verb::All, path, stack)
    }

    /// Middleware dispatching to the matching route.
    pub fn routes(&self) -> Routes {
        Routes { table: Arc::clone(&self.table) }
    }

    /// Middleware answering for paths that exist under other verbs.
    pub fn allowed_methods(&self) -> AllowedMethods {
        AllowedMethods { table: Arc::clone(&self.table) }
    }

    /// `compose([routes(), allowed_methods()])`.
    pub fn into_middleware(self) -> Compose {
        compose([boxed(self.routes()), boxed(self.allowed_methods())])
    }
}

/// Rewrites `:name` and `*name` segments into matchit's `{name}` and
/// `{*name}` forms.
fn normalize(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':').filter(|n| !n.is_empty()) {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*').filter(|n| !n.is_empty()) {
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Middleware returned by [`Router::routes`].
#[derive(Clone)]
pub struct Routes {
    table: Arc<Table>,
}

impl Middleware for Routes {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), Error>> {
        let path = ctx.path();
        match self.table.lookup(&ctx.method(), &path) {
            Some((chain, params)) => {
                trace!(%path, len = chain.len(), "route matched");
                ctx.set_params(params);
                chain.call(ctx, next)
            }
            None => next.run(),
        }
    }
}

/// Middleware returned by [`Router::allowed_methods`].
#[derive(Clone)]
pub struct AllowedMethods {
    table: Arc<Table>,
}

impl Middleware for AllowedMethods {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), Error>> {
        let table = Arc::clone(&self.table);
        Box::pin(async move {
            next.run().await?;
            if ctx.status().is_some_and(|s| s != StatusCode::NOT_FOUND) {
                return Ok(());
            }

            let method = ctx.method();
            let allowed = table.allowed(&ctx.path());
            let allow = || {
                let value = allowed.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ");
                HeaderValue::from_str(&value).ok()
            };

            let Some(verb) = Verb::from_http(&method) else {
                ctx.set_status(StatusCode::NOT_IMPLEMENTED);
                set_allow(&ctx, allow());
                return Ok(());
            };
            if allowed.is_empty() {
                return Ok(());
            }
            if verb == Verb::Options {
                ctx.set_status(StatusCode::OK);
                set_allow(&ctx, allow());
            } else if !allowed.contains(&verb) {
                ctx.set_status(StatusCode::METHOD_NOT_ALLOWED);
                set_allow(&ctx, allow());
            }
            Ok(())
        })
    }
}

fn set_allow(ctx: &Context, value: Option<HeaderValue>) {
    if let Some(value) = value {
        ctx.with_response_headers(|headers| headers.insert(ALLOW, value));
    }
}
