//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::uri::PathAndQuery;
use http::{Extensions, HeaderMap, HeaderValue, Method, Uri};

/// An incoming HTTP request with its body fully buffered.
///
/// Middleware share request-scoped state through [`extensions`](Request::extensions):
/// whatever an earlier stage inserts (an authenticated principal, a session
/// handle, the resolved client address) is visible to later stages and to the
/// route handler.
pub struct Request {
    parts: http::request::Parts,
    body: Bytes,
    params: HashMap<String, String>,
    peer: Option<SocketAddr>,
}

impl Request {
    pub(crate) fn new(
        req: http::Request<Bytes>,
        params: HashMap<String, String>,
        peer: Option<SocketAddr>,
    ) -> Self {
        let (parts, body) = req.into_parts();
        Self { parts, body, params, peer }
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn query(&self) -> Option<&str> { self.parts.uri.query() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.parts.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Replaces the buffered body, keeping a declared `content-length` true.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        if self.parts.headers.contains_key(CONTENT_LENGTH) {
            self.parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }
    }

    /// Replaces the query string; an empty `query` removes it.
    pub fn set_query(&mut self, query: &str) -> Result<(), http::Error> {
        let path_and_query = if query.is_empty() {
            PathAndQuery::try_from(self.path())?
        } else {
            PathAndQuery::try_from(format!("{}?{query}", self.path()))?
        };
        let mut parts = self.parts.uri.clone().into_parts();
        parts.path_and_query = Some(path_and_query);
        self.parts.uri = Uri::from_parts(parts)?;
        Ok(())
    }

    /// Header lookup. Returns `None` for absent or non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/courses/{id}`, `req.param("id")` on `/courses/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Address of the TCP peer, when the request came off a socket.
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer }

    pub fn extensions(&self) -> &Extensions { &self.parts.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.parts.extensions }
}

/// Builds a request that did not come off a socket: no peer address and no
/// route parameters until the router fills them in.
impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        Self::new(req, HashMap::new(), None)
    }
}

impl Request {
    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }
}
