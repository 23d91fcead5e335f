//! Maintenance mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::StatusCode;
use tracing::debug;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

/// Shared on/off switch. Clone it into whatever flips it (an admin endpoint,
/// a signal handler); every clone sees the same state.
#[derive(Clone, Debug, Default)]
pub struct MaintenanceMode {
    down: Arc<AtomicBool>,
}

impl MaintenanceMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) { self.down.store(true, Ordering::Relaxed); }
    pub fn disable(&self) { self.down.store(false, Ordering::Relaxed); }
    pub fn is_enabled(&self) -> bool { self.down.load(Ordering::Relaxed) }
}

/// Answers `503` with `retry-after` while maintenance mode is on. Paths in
/// the except list keep working; a trailing `*` matches a prefix.
pub struct PreventRequestsDuringMaintenance {
    mode: MaintenanceMode,
    except: Vec<String>,
    retry_after_secs: u64,
}

impl PreventRequestsDuringMaintenance {
    pub fn new(mode: MaintenanceMode) -> Self {
        Self { mode, except: Vec::new(), retry_after_secs: 60 }
    }

    pub fn except<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = secs;
        self
    }

    fn is_excepted(&self, path: &str) -> bool {
        self.except.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == pattern,
        })
    }
}

impl Middleware for PreventRequestsDuringMaintenance {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        if !self.mode.is_enabled() || self.is_excepted(req.path()) {
            return next.run(req);
        }
        debug!(path = req.path(), "rejected during maintenance");
        let mut res = Response::error(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable.");
        res.set_header("retry-after", &self.retry_after_secs.to_string());
        Box::pin(async move { res })
    }
}
