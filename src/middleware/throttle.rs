//! Request rate limiting.
//!
//! `throttle:<limiter>` uses a limiter registered on [`Limiters`] by name;
//! `throttle:<max>,<minutes>` defines one inline; bare `throttle` means 60
//! per minute. Requests are counted per caller in fixed windows held by a
//! shared [`RateLimitStore`]. The caller is the authenticated principal when
//! there is one, else the client address.
//!
//! Every response carries `x-ratelimit-limit` and `x-ratelimit-remaining`.
//! Over the limit the chain stops with `429` and `retry-after`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use tracing::warn;

use crate::handler::BoxFuture;
use crate::middleware::auth::Principal;
use crate::middleware::proxies::client_ip;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

pub mod headers {
    pub const LIMIT: &str = "x-ratelimit-limit";
    pub const REMAINING: &str = "x-ratelimit-remaining";
    pub const RETRY_AFTER: &str = "retry-after";
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limit {
    pub max_attempts: u64,
    pub decay: Duration,
}

impl Limit {
    pub fn per_minute(max_attempts: u64) -> Self {
        Self { max_attempts, decay: Duration::from_secs(60) }
    }

    pub fn per(max_attempts: u64, decay: Duration) -> Self {
        Self { max_attempts, decay }
    }
}

/// Result of counting one request.
#[derive(Clone, Copy, Debug)]
pub struct Hit {
    /// Requests seen in the current window, including this one.
    pub count: u64,
    pub resets_in: Duration,
}

/// Shared hit counters. Must be safe to use from concurrent requests.
pub trait RateLimitStore: Send + Sync + 'static {
    fn hit(&self, key: &str, decay: Duration) -> BoxFuture<'_, Hit>;
}

/// Process-local fixed-window counters. Expired windows are swept out at
/// most once per decay period, so idle callers do not accumulate.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    state: tokio::sync::Mutex<Windows>,
}

#[derive(Default)]
struct Windows {
    counts: HashMap<String, (u64, Instant)>,
    next_sweep: Option<Instant>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn hit(&self, key: &str, decay: Duration) -> BoxFuture<'_, Hit> {
        let key = key.to_owned();
        Box::pin(async move {
            let now = Instant::now();
            let mut state = self.state.lock().await;

            if state.next_sweep.is_none_or(|at| now >= at) {
                state.counts.retain(|_, (_, resets)| now < *resets);
                state.next_sweep = Some(now + decay);
            }

            let window = state.counts.entry(key).or_insert((0, now + decay));
            if now >= window.1 {
                *window = (0, now + decay);
            }
            window.0 += 1;
            Hit { count: window.0, resets_in: window.1.saturating_duration_since(now) }
        })
    }
}

/// Named limiters plus the store they count in. Builds [`ThrottleRequests`]
/// stages from `throttle` arguments.
#[derive(Clone)]
pub struct Limiters {
    store: Arc<dyn RateLimitStore>,
    named: HashMap<String, Limit>,
}

impl Limiters {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store, named: HashMap::new() }
    }

    pub fn limiter(mut self, name: &str, limit: Limit) -> Self {
        self.named.insert(name.to_owned(), limit);
        self
    }

    pub fn throttle(&self, argument: Option<&str>) -> Result<ThrottleRequests, String> {
        let (name, limit) = match argument {
            None => ("60,1".to_owned(), Limit::per_minute(60)),
            Some(name) => match self.named.get(name) {
                Some(limit) => (name.to_owned(), *limit),
                None => (name.to_owned(), parse_inline(name)?),
            },
        };
        if limit.max_attempts == 0 {
            return Err(format!("limiter `{name}` allows no requests"));
        }
        Ok(ThrottleRequests { name, limit, store: Arc::clone(&self.store) })
    }
}

/// `max[,minutes]`.
fn parse_inline(raw: &str) -> Result<Limit, String> {
    let unknown = || format!("unknown limiter `{raw}`");
    let mut parts = raw.split(',').map(str::trim);
    let max = parts.next().and_then(|m| m.parse().ok()).ok_or_else(unknown)?;
    let minutes: u64 = match parts.next() {
        Some(m) => m.parse().map_err(|_| unknown())?,
        None => 1,
    };
    if parts.next().is_some() || minutes == 0 {
        return Err(unknown());
    }
    Ok(Limit::per(max, Duration::from_secs(minutes * 60)))
}

pub struct ThrottleRequests {
    name: String,
    limit: Limit,
    store: Arc<dyn RateLimitStore>,
}

impl ThrottleRequests {
    fn key(&self, req: &Request) -> String {
        let caller = match req.extensions().get::<Principal>() {
            Some(principal) => format!("user:{}", principal.id),
            None => match client_ip(req) {
                Some(ip) => format!("ip:{ip}"),
                None => "anonymous".to_owned(),
            },
        };
        format!("{}|{caller}", self.name)
    }
}

impl Middleware for ThrottleRequests {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        let key = self.key(&req);
        let limit = self.limit;
        let store = Arc::clone(&self.store);

        Box::pin(async move {
            let hit = store.hit(&key, limit.decay).await;
            let max = limit.max_attempts.to_string();

            if hit.count > limit.max_attempts {
                warn!(key = %key, count = hit.count, "rate limit exceeded");
                let retry_after = hit.resets_in.as_secs() + u64::from(hit.resets_in.subsec_nanos() > 0);
                let mut res = Response::error(StatusCode::TOO_MANY_REQUESTS, "Too Many Attempts.");
                res.set_header(headers::LIMIT, &max);
                res.set_header(headers::REMAINING, "0");
                res.set_header(headers::RETRY_AFTER, &retry_after.to_string());
                return res;
            }

            let remaining = limit.max_attempts - hit.count;
            let mut res = next.run(req).await;
            res.set_header(headers::LIMIT, &max);
            res.set_header(headers::REMAINING, &remaining.to_string());
            res
        })
    }
}
