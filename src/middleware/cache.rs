//! `cache-control` and ETag handling for cacheable responses.
//!
//! Argument syntax: `;`-separated directives with `_` in place of `-`, plus
//! `etag` to enable ETags:
//!
//! ```text
//! cache.headers:public;max_age=2628000;etag
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use http::{Method, StatusCode};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

const FLAGS: &[&str] = &[
    "public",
    "private",
    "no_cache",
    "no_store",
    "no_transform",
    "must_revalidate",
    "proxy_revalidate",
    "immutable",
];
const SECONDS: &[&str] = &["max_age", "s_maxage", "stale_while_revalidate", "stale_if_error"];

pub struct SetCacheHeaders {
    cache_control: String,
    etag: bool,
}

impl SetCacheHeaders {
    pub fn parse(directives: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut etag = false;

        for directive in directives.split(';').map(str::trim).filter(|d| !d.is_empty()) {
            match directive.split_once('=') {
                None if directive == "etag" => etag = true,
                None if FLAGS.contains(&directive) => parts.push(directive.replace('_', "-")),
                Some((name, secs)) if SECONDS.contains(&name) => {
                    let secs: u64 = secs.parse().map_err(|_| format!("`{name}` expects seconds, got `{secs}`"))?;
                    parts.push(format!("{}={secs}", name.replace('_', "-")));
                }
                _ => return Err(format!("unknown cache directive `{directive}`")),
            }
        }

        Ok(Self { cache_control: parts.join(", "), etag })
    }

    pub fn from_argument(argument: Option<&str>) -> Result<Self, String> {
        Self::parse(argument.ok_or("expects directives, e.g. `cache.headers:public;max_age=60`")?)
    }
}

impl Middleware for SetCacheHeaders {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return next.run(req);
        }
        let if_none_match = req.header("if-none-match").map(str::to_owned);
        let cache_control = self.cache_control.clone();
        let etag = self.etag;

        Box::pin(async move {
            let mut res = next.run(req).await;
            if !res.status_code().is_success() || res.body().is_empty() {
                return res;
            }
            if !cache_control.is_empty() {
                res.set_header("cache-control", &cache_control);
            }
            if etag {
                let tag = entity_tag(res.body());
                res.set_header("etag", &tag);
                if if_none_match.as_deref() == Some(tag.as_str()) {
                    res.set_status(StatusCode::NOT_MODIFIED);
                    res.clear_body();
                }
            }
            res
        })
    }
}

fn entity_tag(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}
