//! Handler trait and type erasure.
//!
//! Route handlers of different concrete types end up side by side in the same
//! radix tree, so each one is wrapped once at registration time:
//!
//! ```text
//! async fn book(req: Request) -> Response { … }   ← user writes this
//!        ↓ router.on(Method::POST, "/bookings", book)
//! book.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(book))                       ← stored as BoxedHandler
//!        ↓
//! handler.call(req)                               ← terminal stage of a chain
//! ```
//!
//! The handler is the last link of the middleware chain: [`Next`](crate::middleware::Next)
//! calls it once every stage has passed the request along.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

/// A type-erased handler shared by every request routed to it.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// Satisfied automatically by any function or closure of the form
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

/// Terminal that answers every request with a fixed status and JSON message.
/// Used for the 404 / 405 fallbacks that still run the global chain.
pub(crate) struct StatusHandler {
    pub(crate) status: http::StatusCode,
    pub(crate) message: &'static str,
    pub(crate) allow: Option<String>,
}

impl ErasedHandler for StatusHandler {
    fn call(&self, _req: Request) -> BoxFuture<'static, Response> {
        let mut res = Response::error(self.status, self.message);
        if let Some(allow) = &self.allow {
            res.set_header("allow", allow);
        }
        Box::pin(async move { res })
    }
}
