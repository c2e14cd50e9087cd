//! HTTP server and graceful shutdown.
//!
//! One [`Context`] is created per request and driven through the
//! application middleware with [`Next::end`] as the terminal. Whatever
//! response the chain leaves in the context is sent back; a chain that
//! leaves none answers `404`, a chain that fails answers `500`.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server:
//! 1. stops accepting new connections immediately;
//! 2. closes idle keep-alive connections and lets in-flight requests finish;
//! 3. aborts whatever is still running once the shutdown timeout elapses;
//! 4. returns from [`Server::serve`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::ServerConfig;
use crate::context::Context;
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

enum Bind {
    Addr(SocketAddr),
    Listener(TcpListener),
}

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// The HTTP server.
pub struct Server {
    bind: Bind,
    shutdown_timeout: Duration,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use scopewire::Server;
    /// let server = Server::bind(([127, 0, 0, 1], 3000));
    /// # let _ = server;
    /// ```
    pub fn bind(addr: impl Into<SocketAddr>) -> Self {
        Self { bind: Bind::Addr(addr.into()), shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::bind(config.addr).shutdown_timeout(config.shutdown_timeout())
    }

    /// Serves on an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { bind: Bind::Listener(listener), shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT }
    }

    /// How long in-flight connections may run after the shutdown signal
    /// before they are aborted. Defaults to 30 seconds.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a graceful shutdown: SIGTERM or Ctrl-C, then
    /// in-flight requests completing or the shutdown timeout elapsing.
    pub async fn serve(self, app: impl Middleware) -> Result<(), Error> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), stopping when `shutdown` resolves.
    pub async fn serve_with_shutdown(
        self,
        app: impl Middleware,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = match self.bind {
            Bind::Addr(addr) => TcpListener::bind(addr).await?,
            Bind::Listener(listener) => listener,
        };
        let addr = listener.local_addr()?;

        // Shared across connection tasks without copying the routing table.
        let app: Arc<dyn Middleware> = Arc::new(app);

        info!(%addr, "scopewire listening");

        let builder = ConnBuilder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting at once,
                // even when more connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    // Called once per request on the connection.
                    let svc = service_fn(move |req| {
                        let app = Arc::clone(&app);
                        async move { dispatch(app, req, remote_addr).await }
                    });
                    let conn = graceful.watch(builder.serve_connection(io, svc).into_owned());

                    tasks.spawn(async move {
                        if let Err(e) = conn.await {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished tasks so the set does not grow without bound.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        tokio::select! {
            () = graceful.shutdown() => {}
            () = tokio::time::sleep(self.shutdown_timeout) => {
                warn!(timeout = ?self.shutdown_timeout, "shutdown timed out, aborting connections");
            }
        }
        tasks.shutdown().await;

        info!("scopewire stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the application chain.
///
/// Failures are answered here, so hyper never sees an error.
async fn dispatch(
    app: Arc<dyn Middleware>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, std::convert::Infallible> {
    let (parts, body) = req.into_parts();
    let span = info_span!("request", method = %parts.method, path = %parts.uri.path(), peer = %remote_addr);

    let response = async move {
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("failed to read request body: {e}");
                return Response::status(StatusCode::BAD_REQUEST);
            }
        };
        let request = Request::new(parts.method, parts.uri.path())
            .with_headers(parts.headers)
            .with_body(body);

        let ctx = Context::new(request);
        match app.call(ctx.clone(), Next::end()).await {
            Ok(()) => ctx.take_response().unwrap_or_else(|| Response::status(StatusCode::NOT_FOUND)),
            Err(e) => {
                error!("request failed: {e}");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
    .instrument(span)
    .await;

    Ok(response.into_http())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT the process receives.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
