//! Middleware layer.
//!
//! Middleware intercepts a request on its way in and again on its way out,
//! which makes it the place for cross-cutting concerns: authentication,
//! request scoping, logging. Every stage sees the same [`Context`] and a
//! [`Next`] continuation:
//!
//! ```rust
//! use scopewire::middleware::{compose, boxed, Next};
//! use scopewire::{Context, Error};
//!
//! async fn timing(ctx: Context, next: Next) -> Result<(), Error> {
//!     let started = std::time::Instant::now();
//!     next.run().await?;
//!     tracing::debug!(path = %ctx.path(), elapsed = ?started.elapsed(), "handled");
//!     Ok(())
//! }
//!
//! let chain = compose([boxed(timing)]);
//! # let _ = chain;
//! ```
//!
//! Code before `next.run()` runs on the way in, code after it on the way
//! out. Not calling `next` at all short-circuits everything downstream.

mod compose;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;

pub use compose::{Compose, Next, compose};

/// A heap-allocated, type-erased future.
///
/// `Send` lets tokio move the future between worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stage of a request-handling chain.
///
/// Implemented for every `Fn(Context, Next) -> impl Future<Output =
/// Result<(), Error>>`, so plain `async fn`s and annotated closures are
/// middleware as they are. Implement it by hand on types that are resolved
/// from a container and then used as middleware, see
/// [`inject`](crate::inject).
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), Error>>;
}

/// A type-erased middleware shared across concurrent requests.
pub type BoxedMiddleware = Arc<dyn Middleware>;

impl<F, Fut> Middleware for F
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), Error>> {
        Box::pin((self)(ctx, next))
    }
}

/// Erases a middleware's concrete type so it can sit in a chain.
pub fn boxed(middleware: impl Middleware) -> BoxedMiddleware {
    Arc::new(middleware)
}
