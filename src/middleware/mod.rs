//! Middleware layer.
//!
//! A middleware (a *stage*) sits between the server and the route handler.
//! It receives the request and a [`Next`] continuation standing for the rest
//! of the chain, and does one of two things:
//!
//! - passes the (possibly modified) request on with `next.run(req).await`,
//!   then optionally rewrites the response on its way back out;
//! - answers on its own without calling `next`, which skips every later
//!   stage and the handler.
//!
//! ```rust
//! use strata::middleware::{self, Next};
//! use strata::{Request, Response};
//!
//! let stamp = middleware::from_fn(|req: Request, next: Next| async move {
//!     let mut res = next.run(req).await;
//!     res.set_header("x-served-by", "strata");
//!     res
//! });
//! # let _ = stamp;
//! ```
//!
//! Which stages run for which route is decided once, at startup, by the
//! [`Kernel`](crate::Kernel).

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler};
use crate::request::Request;
use crate::response::Response;

pub mod auth;
pub mod bindings;
pub mod cache;
pub mod cors;
pub mod csrf;
pub mod maintenance;
pub mod normalize;
pub mod post_size;
pub mod proxies;
pub mod session;
pub mod signed;
pub mod throttle;
pub mod trace;

/// One stage of a middleware chain.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response>;
}

/// A type-erased stage shared by every chain that includes it.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The rest of the chain after the current stage.
///
/// Owns a cursor into the composed stage list plus the terminal handler, so
/// it can be moved into a `'static` future. Consumed by [`run`](Next::run):
/// a stage can continue the chain at most once.
pub struct Next {
    stages: Arc<[BoxedMiddleware]>,
    cursor: usize,
    endpoint: BoxedHandler,
}

impl Next {
    pub(crate) fn new(stages: Arc<[BoxedMiddleware]>, endpoint: BoxedHandler) -> Self {
        Self { stages, cursor: 0, endpoint }
    }

    /// Runs the next stage, or the handler once every stage has run.
    pub fn run(mut self, req: Request) -> BoxFuture<'static, Response> {
        match self.stages.get(self.cursor).cloned() {
            Some(stage) => {
                self.cursor += 1;
                stage.handle(req, self)
            }
            None => self.endpoint.call(req),
        }
    }
}

/// Middleware built from an async closure. See [`from_fn`].
pub struct FromFn<F>(F);

/// Wraps `f(req, next)` as a [`Middleware`].
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FromFn(f)
}

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        Box::pin((self.0)(req, next))
    }
}

/// Compares secrets without returning early on the first differing byte.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;
    use crate::handler::Handler;

    pub(crate) fn request(method: &str, uri: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
            .into()
    }

    pub(crate) fn boxed(stage: impl Middleware) -> BoxedMiddleware {
        Arc::new(stage)
    }

    /// Runs `stages` in order in front of `handler`.
    pub(crate) async fn run_chain(
        stages: Vec<BoxedMiddleware>,
        handler: impl Handler,
        req: Request,
    ) -> Response {
        Next::new(stages.into(), handler.into_boxed_handler()).run(req).await
    }

    /// A stage that appends its label to a shared log before continuing.
    pub(crate) fn recorder(label: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> BoxedMiddleware {
        Arc::new(from_fn(move |req, next: Next| {
            log.lock().unwrap().push(label);
            next.run(req)
        }))
    }
}
