//! CSRF token verification for session-backed routes.

use http::{Method, StatusCode};
use tracing::warn;

use crate::handler::BoxFuture;
use crate::middleware::session::Session;
use crate::middleware::{Middleware, Next, constant_time_eq};
use crate::{Request, Response};

/// Non-standard "page expired" status used for token mismatches.
const TOKEN_MISMATCH: u16 = 419;

/// Requires state-changing requests to echo the session's CSRF token in
/// `x-csrf-token` (or `x-xsrf-token`). Must run after
/// [`StartSession`](super::session::StartSession); a request with no session
/// cannot present a valid token and is rejected the same way.
#[derive(Default)]
pub struct VerifyCsrfToken {
    except: Vec<String>,
}

impl VerifyCsrfToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths exempt from verification, e.g. inbound webhooks.
    pub fn except<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except.extend(paths.into_iter().map(Into::into));
        self
    }

    fn is_reading(method: &Method) -> bool {
        [Method::GET, Method::HEAD, Method::OPTIONS].contains(method)
    }

    fn tokens_match(req: &Request) -> bool {
        let presented = req.header("x-csrf-token").or_else(|| req.header("x-xsrf-token"));
        let expected = req.extensions().get::<Session>().and_then(Session::csrf_token);
        matches!((presented, expected), (Some(p), Some(e)) if constant_time_eq(p.as_bytes(), e.as_bytes()))
    }
}

impl Middleware for VerifyCsrfToken {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        if Self::is_reading(req.method())
            || self.except.iter().any(|p| p == req.path())
            || Self::tokens_match(&req)
        {
            return next.run(req);
        }
        warn!(method = %req.method(), path = req.path(), "csrf token mismatch");
        let status = StatusCode::from_u16(TOKEN_MISMATCH).unwrap_or(StatusCode::FORBIDDEN);
        Box::pin(async move { Response::error(status, "CSRF token mismatch.") })
    }
}
