//! Signed URLs: `signed` and `signed:relative`.
//!
//! A [`UrlSigner`] appends `signature` (hex HMAC-SHA256) and optionally
//! `expires` (unix seconds) to a URL. [`ValidateSignature`] recomputes the
//! signature over the request URL without its `signature` parameter and
//! answers `403` on a mismatch or once the URL has expired.
//!
//! Absolute signatures cover the host as well as the path and query, so a
//! link signed for one host is useless on another. `relative` ones cover the
//! path and query only.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use http::StatusCode;
use sha2::Sha256;
use tracing::warn;

use crate::error::ConfigError;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE: &str = "signature";
const EXPIRES: &str = "expires";

/// Signs and verifies URLs with one secret key.
#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
}

impl UrlSigner {
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, ConfigError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(ConfigError::SigningKey { reason: "the key is empty" });
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|_| ConfigError::SigningKey { reason: "the key length is not accepted" })?;
        Ok(Self { mac })
    }

    /// Signs `path_and_query` as served from `host`.
    pub fn sign(&self, host: &str, path_and_query: &str, expires_at: Option<SystemTime>) -> String {
        self.sign_with(Some(host), path_and_query, expires_at)
    }

    /// Signs `path_and_query` for any host.
    pub fn sign_relative(&self, path_and_query: &str, expires_at: Option<SystemTime>) -> String {
        self.sign_with(None, path_and_query, expires_at)
    }

    /// True when the query carries a valid signature for `host` + `path`
    /// and any `expires` it carries is still in the future.
    pub fn verify(&self, host: Option<&str>, path: &str, query: Option<&str>) -> bool {
        let Some(query) = query else {
            return false;
        };

        let mut signature = None;
        let mut expires = None;
        let mut signed = Vec::new();
        for segment in query.split('&') {
            match segment.split_once('=') {
                Some((SIGNATURE, value)) => signature = Some(value),
                Some((EXPIRES, value)) => {
                    expires = Some(value);
                    signed.push(segment);
                }
                _ => signed.push(segment),
            }
        }

        let Some(signature) = signature.and_then(|s| hex::decode(s).ok()) else {
            return false;
        };
        let url = if signed.is_empty() {
            path.to_owned()
        } else {
            format!("{path}?{}", signed.join("&"))
        };
        if self.mac_for(host, &url).verify_slice(&signature).is_err() {
            return false;
        }
        expires.is_none_or(|at| at.parse::<u64>().is_ok_and(|at| unix_seconds(SystemTime::now()) <= at))
    }

    /// Builds the stage for `signed` or `signed:relative`.
    pub fn validate(&self, argument: Option<&str>) -> Result<ValidateSignature, String> {
        let relative = match argument {
            None => false,
            Some("relative") => true,
            Some(other) => return Err(format!("expects `relative` or no argument, got `{other}`")),
        };
        Ok(ValidateSignature { signer: self.clone(), relative })
    }

    fn sign_with(&self, host: Option<&str>, path_and_query: &str, expires_at: Option<SystemTime>) -> String {
        let mut url = path_and_query.to_owned();
        if let Some(at) = expires_at {
            let sep = if url.contains('?') { '&' } else { '?' };
            url = format!("{url}{sep}{EXPIRES}={}", unix_seconds(at));
        }
        let signature = hex::encode(self.mac_for(host, &url).finalize().into_bytes());
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}{SIGNATURE}={signature}")
    }

    fn mac_for(&self, host: Option<&str>, url: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        if let Some(host) = host {
            mac.update(host.as_bytes());
        }
        mac.update(url.as_bytes());
        mac
    }
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

pub struct ValidateSignature {
    signer: UrlSigner,
    relative: bool,
}

impl Middleware for ValidateSignature {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        let host = if self.relative {
            None
        } else {
            req.header("host").or_else(|| req.uri().authority().map(|a| a.as_str()))
        };
        let valid = (self.relative || host.is_some())
            && self.signer.verify(host, req.path(), req.query());
        if valid {
            return next.run(req);
        }
        warn!(path = req.path(), "invalid url signature");
        Box::pin(async { Response::error(StatusCode::FORBIDDEN, "Invalid signature.") })
    }
}
