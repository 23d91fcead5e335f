//! Request body size limit.

use http::StatusCode;
use tracing::debug;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

/// Rejects requests whose declared `content-length`, or actual buffered body,
/// exceeds `limit` bytes with `413`.
pub struct ValidatePostSize {
    limit: u64,
}

impl ValidatePostSize {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    fn too_large(&self, req: &Request) -> bool {
        let declared = req
            .header("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let actual = u64::try_from(req.body().len()).unwrap_or(u64::MAX);
        declared.max(actual) > self.limit
    }
}

impl Middleware for ValidatePostSize {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        if !self.too_large(&req) {
            return next.run(req);
        }
        debug!(limit = self.limit, "request body too large");
        Box::pin(async { Response::error(StatusCode::PAYLOAD_TOO_LARGE, "Content Too Large.") })
    }
}
