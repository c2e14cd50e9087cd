//! Per-request context shared by every middleware in a chain.
//!
//! A [`Context`] is a cheap handle: cloning it clones an `Arc`, and every
//! clone sees the same request, response, state and scope slot. The lock
//! inside is only ever taken for the duration of a single accessor call, so
//! it is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, StatusCode};

use crate::container::Container;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// The mutable per-request bag of state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    request: Request,
    response: Option<Response>,
    state: Extensions,
    scope: Option<Container>,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                request,
                response: None,
                state: Extensions::new(),
                scope: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking middleware is reported through the chain; the data it
        // left behind is still the best description of the request.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Request ───────────────────────────────────────────────────────────────

    pub fn method(&self) -> Method { self.lock().request.method.clone() }
    pub fn path(&self) -> String { self.lock().request.path.clone() }
    pub fn body(&self) -> Bytes { self.lock().request.body.clone() }

    pub fn header(&self, name: &str) -> Option<String> {
        self.lock().request.header(name).map(str::to_owned)
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.lock().request.param(key).map(str::to_owned)
    }

    /// Runs `f` against the request without cloning it.
    pub fn with_request<R>(&self, f: impl FnOnce(&Request) -> R) -> R {
        f(&self.lock().request)
    }

    pub(crate) fn set_params(&self, params: impl IntoIterator<Item = (String, String)>) {
        self.lock().request.params.extend(params);
    }

    // ── Response ──────────────────────────────────────────────────────────────

    /// Replaces the response.
    pub fn respond(&self, response: impl IntoResponse) {
        self.lock().response = Some(response.into_response());
    }

    /// The status written so far, if any middleware has responded.
    pub fn status(&self) -> Option<StatusCode> {
        self.lock().response.as_ref().map(|r| r.status)
    }

    /// Sets the status, keeping any body and headers already written.
    pub fn set_status(&self, status: StatusCode) {
        let mut inner = self.lock();
        match inner.response.as_mut() {
            Some(res) => res.status = status,
            None => inner.response = Some(Response::status(status)),
        }
    }

    /// Runs `f` against the response headers, creating a bodiless `200`
    /// response first if nothing has been written yet.
    pub fn with_response_headers<R>(&self, f: impl FnOnce(&mut HeaderMap) -> R) -> R {
        let mut inner = self.lock();
        let res = inner.response.get_or_insert_with(|| Response::status(StatusCode::OK));
        f(&mut res.headers)
    }

    /// Removes and returns the response.
    pub fn take_response(&self) -> Option<Response> {
        self.lock().response.take()
    }

    // ── State ─────────────────────────────────────────────────────────────────

    /// Stores a typed value for downstream middleware, returning the old one.
    pub fn insert_state<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.lock().state.insert(value)
    }

    pub fn state<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.lock().state.get::<T>().cloned()
    }

    // ── Scope ─────────────────────────────────────────────────────────────────

    /// The request-scoped container, once
    /// [`scope_per_request`](crate::scope_per_request) has attached one.
    pub fn scope(&self) -> Option<Container> {
        self.lock().scope.clone()
    }

    pub fn set_scope(&self, scope: Container) {
        self.lock().scope = Some(scope);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Context")
            .field("method", &inner.request.method)
            .field("path", &inner.request.path)
            .field("status", &inner.response.as_ref().map(|r| r.status))
            .field("scoped", &inner.scope.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct User(&'static str);

    #[test]
    fn clones_share_state_and_response() {
        let ctx = Context::new(Request::new(Method::GET, "/items"));
        let other = ctx.clone();

        other.insert_state(User("alice"));
        other.respond("hello");

        assert_eq!(ctx.state::<User>(), Some(User("alice")));
        assert_eq!(ctx.status(), Some(StatusCode::OK));
    }

    #[test]
    fn set_status_keeps_body() {
        let ctx = Context::new(Request::new(Method::POST, "/items"));
        ctx.respond(Response::json(r#"{"id":1}"#));
        ctx.set_status(StatusCode::CREATED);

        let res = ctx.take_response().unwrap();
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.body().as_ref(), br#"{"id":1}"#);
    }

    #[test]
    fn scope_slot_starts_empty() {
        let ctx = Context::new(Request::new(Method::GET, "/"));
        assert!(ctx.scope().is_none());

        ctx.set_scope(Container::builder().build().create_scope());
        assert!(ctx.scope().is_some());
    }
}
