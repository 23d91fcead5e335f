//! HTTP server and graceful shutdown.
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`].
//!
//! Request bodies are buffered before any middleware runs, so the server
//! enforces a hard size cap of its own while reading. `http.post_size` can
//! only tighten it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http::header::CONTENT_LENGTH;
use http::HeaderMap;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Largest request body the server reads unless configured otherwise.
pub const DEFAULT_MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// The HTTP server.
pub struct Server {
    addr: String,
    max_body_size: usize,
}

impl Server {
    /// Configures the address to listen on. Parsed when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use strata::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), max_body_size: DEFAULT_MAX_BODY_SIZE }
    }

    /// Caps request bodies at `bytes`. Larger bodies get `413` as soon as
    /// the cap is crossed, without waiting for the rest of the upload.
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Accepts connections and dispatches them through `app` until a
    /// shutdown signal arrives and every in-flight connection has finished.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let addr: SocketAddr = self.addr.parse().map_err(|_| Error::Addr(self.addr.clone()))?;
        let listener = TcpListener::bind(addr).await?;
        let app = Arc::new(app);
        let max_body_size = self.max_body_size;

        info!(%addr, max_body_size, "strata listening");

        let mut tasks = tokio::task::JoinSet::new();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown wins over pending accepts.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, peer, max_body_size).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(%peer, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("strata stopped");
        Ok(())
    }
}

/// Buffers the body and hands the request to the app. Failures become
/// responses, so hyper never sees an error.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
    max_body_size: usize,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match read_body(&parts.headers, body, max_body_size).await {
        Ok(body) => body,
        Err(rejection) => {
            warn!(%peer, status = %rejection.status_code(), "request body rejected");
            return Ok(rejection.into_inner());
        }
    };

    let req = Request::new(http::Request::from_parts(parts, body), HashMap::new(), Some(peer));
    Ok(app.handle(req).await.into_inner())
}

/// Collects at most `limit` bytes of `body`. A declared `content-length`
/// over the limit is refused before reading anything.
async fn read_body<B>(headers: &HeaderMap, body: B, limit: usize) -> Result<Bytes, Response>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(too_large());
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(too_large()),
        Err(e) => {
            debug!("failed to read request body: {e}");
            Err(Response::error(StatusCode::BAD_REQUEST, "Unreadable request body."))
        }
    }
}

fn too_large() -> Response {
    Response::error(StatusCode::PAYLOAD_TOO_LARGE, "Content Too Large.")
}

/// Resolves on SIGTERM (Unix) or Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
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
