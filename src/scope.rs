//! Scope-per-request middleware.

use tracing::trace;

use crate::container::Container;
use crate::context::Context;
use crate::error::Error;
use crate::middleware::{BoxFuture, Middleware, Next};

/// Attaches a fresh child scope of `root` to every request.
///
/// Must sit upstream of every invoker in the chain: invokers resolve from
/// the scope this middleware stores. The scope is dropped together with the
/// request's [`Context`]; no teardown call is needed.
pub fn scope_per_request(root: Container) -> ScopePerRequest {
    ScopePerRequest { root }
}

/// Middleware returned by [`scope_per_request`].
#[derive(Clone, Debug)]
pub struct ScopePerRequest {
    root: Container,
}

impl Middleware for ScopePerRequest {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), Error>> {
        let scope = self.root.create_scope();
        trace!(depth = scope.depth(), "attached request scope");
        ctx.set_scope(scope);
        next.run()
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::request::Request;

    #[tokio::test]
    async fn every_request_gets_its_own_child_scope() {
        let root = Container::builder().build();
        let middleware = scope_per_request(root.clone());

        let first = Context::new(Request::new(Method::GET, "/"));
        let second = Context::new(Request::new(Method::GET, "/"));
        middleware.call(first.clone(), Next::end()).await.unwrap();
        middleware.call(second.clone(), Next::end()).await.unwrap();

        let (a, b) = (first.scope().unwrap(), second.scope().unwrap());
        assert!(!a.same_scope(&b));
        assert!(!a.same_scope(&root));
        assert_eq!(a.depth(), 1);
    }
}
