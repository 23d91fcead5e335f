//! Input normalization: `http.trim_strings` and `http.empty_to_null`.
//!
//! Both stages rewrite the query string and a form-encoded or JSON body
//! before later stages and the handler read them. Form and query encodings
//! have no null, so an empty field there is dropped; in JSON it becomes
//! `null`. Input that does not parse is passed on untouched.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

/// Fields whose values are never trimmed unless configured otherwise.
pub const DEFAULT_TRIM_EXCEPT: &[&str] = &["current_password", "password", "password_confirmation"];

/// Trims surrounding whitespace from every input string.
pub struct TrimStrings {
    except: HashSet<String>,
}

impl Default for TrimStrings {
    fn default() -> Self {
        Self { except: DEFAULT_TRIM_EXCEPT.iter().map(|f| (*f).to_owned()).collect() }
    }
}

impl TrimStrings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Additional field names left exactly as sent.
    pub fn except<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except.extend(fields.into_iter().map(Into::into));
        self
    }
}

impl Middleware for TrimStrings {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        normalize(&mut req, |field, value| {
            if self.except.contains(field) {
                Some(value.to_owned())
            } else {
                Some(value.trim().to_owned())
            }
        });
        next.run(req)
    }
}

/// Turns empty input strings into nulls.
pub struct ConvertEmptyStringsToNull;

impl Middleware for ConvertEmptyStringsToNull {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        normalize(&mut req, |_, value| (!value.is_empty()).then(|| value.to_owned()));
        next.run(req)
    }
}

/// Applies `rewrite(field, value)` to every string input. `None` means null.
fn normalize(req: &mut Request, rewrite: impl Fn(&str, &str) -> Option<String>) {
    if let Some(query) = req.query().filter(|q| !q.is_empty()).map(str::to_owned) {
        if let Some(rewritten) = rewrite_pairs(&query, &rewrite) {
            if let Err(e) = req.set_query(&rewritten) {
                warn!("normalized query rejected: {e}");
            }
        }
    }

    let content_type = req.header("content-type").unwrap_or_default().to_ascii_lowercase();
    if content_type.starts_with("application/x-www-form-urlencoded") {
        let Ok(form) = std::str::from_utf8(req.body()) else {
            debug!("form body is not utf-8, left as sent");
            return;
        };
        if let Some(rewritten) = rewrite_pairs(form, &rewrite) {
            req.set_body(rewritten);
        }
    } else if content_type.starts_with("application/json") || content_type.contains("+json") {
        let Ok(mut json) = serde_json::from_slice::<Value>(req.body()) else {
            debug!("json body does not parse, left as sent");
            return;
        };
        rewrite_json(&mut json, "", &rewrite);
        match serde_json::to_vec(&json) {
            Ok(body) => req.set_body(body),
            Err(e) => warn!("failed to re-encode json body: {e}"),
        }
    }
}

/// Rewrites `application/x-www-form-urlencoded` pairs. `None` when nothing
/// changed or the input does not parse.
fn rewrite_pairs(raw: &str, rewrite: &impl Fn(&str, &str) -> Option<String>) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw).ok()?;
    let rewritten: Vec<(String, String)> = pairs
        .iter()
        .filter_map(|(field, value)| rewrite(field, value).map(|v| (field.clone(), v)))
        .collect();
    if rewritten == pairs {
        return None;
    }
    serde_urlencoded::to_string(&rewritten).ok()
}

/// Strings inside arrays are rewritten under the key of the enclosing field.
fn rewrite_json(value: &mut Value, field: &str, rewrite: &impl Fn(&str, &str) -> Option<String>) {
    match value {
        Value::String(s) => {
            let replaced = rewrite(field, s).map_or(Value::Null, Value::String);
            *value = replaced;
        }
        Value::Array(items) => {
            for item in items {
                rewrite_json(item, field, rewrite);
            }
        }
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                rewrite_json(item, key, rewrite);
            }
        }
        _ => {}
    }
}
