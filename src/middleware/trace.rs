//! Per-request span with method, path, status, and latency.

use std::time::Instant;

use tracing::{Instrument, info, info_span, warn};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

/// Wraps the rest of the chain in a `request` span and logs one line when the
/// response comes back. 5xx responses log at `warn`.
pub struct TraceRequests;

impl Middleware for TraceRequests {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        let span = info_span!("request", method = %req.method(), path = %req.path());
        let started = Instant::now();

        Box::pin(
            async move {
                let res = next.run(req).await;
                let status = res.status_code().as_u16();
                let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                if res.status_code().is_server_error() {
                    warn!(status, latency_ms, "request failed");
                } else {
                    info!(status, latency_ms, "request completed");
                }
                res
            }
            .instrument(span),
        )
    }
}
