//! Middleware chain executor.
//!
//! # How a chain runs
//!
//! [`compose`] freezes an ordered stack `[m0 … mn-1]`. Each invocation of
//! the resulting [`Compose`] allocates one [`Frame`]: the context, the
//! stack, the caller's terminal continuation, and a high-water mark. Every
//! [`Next`] handed to a middleware is just `(frame, position)`:
//!
//! ```text
//! Compose::call(ctx, terminal)
//!        ↓ dispatch(0)
//! m0(ctx, Next{1}) ── next.run() ──▶ dispatch(1)
//!                                     ↓
//!                     m1(ctx, Next{2}) ── … ──▶ dispatch(n) ──▶ terminal.run()
//! ```
//!
//! `dispatch(i)` raises the mark to `i + 1` with one atomic `fetch_max`. If
//! the mark was already there, some middleware called `next` twice and the
//! call fails with [`Error::NextCalledMultipleTimes`] without touching
//! anything downstream.

use std::any::Any;
use std::future::ready;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use tracing::trace;

use super::{BoxFuture, BoxedMiddleware, Middleware};
use crate::context::Context;
use crate::error::Error;

/// Per-invocation state of a composed chain.
struct Frame {
    ctx: Context,
    stack: Arc<[BoxedMiddleware]>,
    terminal: Next,
    /// One past the highest position dispatched so far; 0 before the first.
    reached: AtomicUsize,
}

/// The continuation handed to each middleware.
///
/// `next.run()` resumes the chain at the following position. A `Next` can
/// be cloned and moved into spawned work, but the position it points at can
/// only be entered once per request.
#[derive(Clone)]
pub struct Next {
    inner: NextInner,
}

#[derive(Clone)]
enum NextInner {
    End,
    Dispatch { frame: Arc<Frame>, position: usize },
}

impl Next {
    /// A continuation that does nothing. The outermost chain of a request
    /// is run with this as its terminal.
    pub fn end() -> Self {
        Self { inner: NextInner::End }
    }

    /// Runs everything downstream of the current middleware.
    pub fn run(&self) -> BoxFuture<'static, Result<(), Error>> {
        match &self.inner {
            NextInner::End => Box::pin(ready(Ok(()))),
            NextInner::Dispatch { frame, position } => dispatch(Arc::clone(frame), *position),
        }
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            NextInner::End => f.write_str("Next::End"),
            NextInner::Dispatch { frame, position } => f
                .debug_struct("Next")
                .field("position", position)
                .field("len", &frame.stack.len())
                .finish(),
        }
    }
}

/// A frozen middleware stack, itself usable as a middleware.
#[derive(Clone)]
pub struct Compose {
    stack: Arc<[BoxedMiddleware]>,
}

/// Composes an ordered stack into a single middleware.
///
/// Stages run in order, each nested inside the previous one's `next`. The
/// `next` passed to the composed middleware runs after the last stage.
pub fn compose(stack: impl IntoIterator<Item = BoxedMiddleware>) -> Compose {
    let stack: Arc<[BoxedMiddleware]> = stack.into_iter().collect();
    trace!(len = stack.len(), "composed middleware chain");
    Compose { stack }
}

impl Compose {
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Runs the chain with a no-op terminal.
    pub fn run(&self, ctx: Context) -> BoxFuture<'static, Result<(), Error>> {
        self.call(ctx, Next::end())
    }
}

impl Middleware for Compose {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, Result<(), Error>> {
        let frame = Arc::new(Frame {
            ctx,
            stack: Arc::clone(&self.stack),
            terminal: next,
            reached: AtomicUsize::new(0),
        });
        dispatch(frame, 0)
    }
}

fn dispatch(frame: Arc<Frame>, position: usize) -> BoxFuture<'static, Result<(), Error>> {
    let mark = position + 1;
    if frame.reached.fetch_max(mark, Ordering::AcqRel) >= mark {
        return Box::pin(ready(Err(Error::NextCalledMultipleTimes)));
    }
    trace!(position, len = frame.stack.len(), "dispatch");

    let Some(middleware) = frame.stack.get(position).cloned() else {
        return frame.terminal.run();
    };
    let ctx = frame.ctx.clone();
    let next = Next { inner: NextInner::Dispatch { frame, position: mark } };

    // Panics raised while building the future and panics raised while
    // polling it surface as the same error value.
    match catch_unwind(AssertUnwindSafe(|| middleware.call(ctx, next))) {
        Ok(fut) => Box::pin(AssertUnwindSafe(fut).catch_unwind().map(|outcome| {
            outcome.unwrap_or_else(|payload| Err(Error::Panicked(panic_message(&*payload))))
        })),
        Err(payload) => Box::pin(ready(Err(Error::Panicked(panic_message(&*payload))))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
