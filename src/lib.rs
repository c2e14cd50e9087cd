//! # scopewire
//!
//! Dependency-injected controllers on a minimal async HTTP stack.
//!
//! Controllers are plain types. They say how to build themselves from a
//! [`Container`] ([`Inject`]), which of their `async fn`s can be called by
//! name ([`Invoke`]), and which routes those names answer
//! ([`create_controller`]). Every request gets its own child scope of the
//! root container ([`scope_per_request`]), and every matched route resolves
//! a controller from that scope before calling the method.
//!
//! What is here:
//!
//! - An onion-style middleware executor: [`middleware::compose`]
//! - Invokers binding resolved instances to middleware: [`make_invoker`], [`inject`]
//! - A small resolution container with transient, scoped and singleton lifetimes
//! - Radix-tree routing via [`matchit`], with `405` / `OPTIONS` handling
//! - A hyper server with graceful shutdown on SIGTERM / Ctrl-C
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scopewire::middleware::{boxed, compose};
//! use scopewire::{Container, Context, Error, Inject, Invoke, Lifetime, MethodTable, Next};
//! use scopewire::{Server, as_class, controller, create_controller, scope_per_request};
//!
//! struct Clock;
//! impl Inject for Clock {
//!     fn construct(_: &Container) -> Result<Self, Error> { Ok(Clock) }
//! }
//!
//! struct TimeApi { clock: Arc<Clock> }
//! impl Inject for TimeApi {
//!     fn construct(cx: &Container) -> Result<Self, Error> {
//!         Ok(TimeApi { clock: cx.resolve()? })
//!     }
//! }
//! impl Invoke for TimeApi {
//!     fn methods() -> MethodTable<Self> {
//!         MethodTable::new().method("now", Self::now)
//!     }
//! }
//! impl TimeApi {
//!     async fn now(self: Arc<Self>, ctx: Context, _next: Next) -> Result<(), Error> {
//!         ctx.respond("12:00");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let root = Container::builder()
//!         .register(as_class::<Clock>().lifetime(Lifetime::Singleton))
//!         .build();
//!
//!     let app = compose([
//!         boxed(scope_per_request(root)),
//!         boxed(controller([create_controller::<TimeApi>().get("/now", "now")])?),
//!     ]);
//!
//!     Server::bind(([0, 0, 0, 0], 3000)).serve(app).await
//! }
//! ```

mod config;
mod container;
mod context;
mod controller;
mod error;
mod invoker;
mod method;
mod request;
mod response;
mod router;
mod scope;
mod server;

pub mod middleware;

pub use config::ServerConfig;
pub use container::{
    Container, ContainerBuilder, Factory, FactoryKind, Inject, Lifetime, Resolver, ResolverOptions,
    as_class, as_function,
};
pub use context::Context;
pub use controller::{
    ControllerBuilder, ControllerSource, MethodConfig, RouteOptions, controller, create_controller,
    create_controller_with, load_controllers, register_controller,
};
#[doc(hidden)]
pub use controller::ControllerRegistration;
pub use error::{BoxError, Error};
pub use invoker::{
    Injected, Invoke, Invoker, MemberInvoker, MethodName, MethodTable, inject, make_class_invoker,
    make_function_invoker, make_invoker, make_resolver_invoker,
};
pub use method::Verb;
pub use middleware::{Middleware, Next};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{AllowedMethods, Router, Routes};
pub use scope::{ScopePerRequest, scope_per_request};
pub use server::Server;

#[doc(hidden)]
pub mod __private {
    pub use inventory::submit;
}
