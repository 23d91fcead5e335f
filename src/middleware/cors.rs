//! Cross-origin resource sharing.
//!
//! Preflights (`OPTIONS` with `access-control-request-method`) from allowed
//! origins are answered here with `204` and never reach a route. Other
//! requests from allowed origins continue down the chain and get the
//! `access-control-allow-*` headers added on the way out. Requests from
//! origins that are not allowed pass through untouched; the browser enforces
//! the rest.

use http::{Method, StatusCode};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

#[derive(Clone, Debug)]
pub struct CorsConfig {
    /// Exact origins, or `*` for any.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub max_age_secs: Option<u64>,
    pub supports_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_owned()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .map(str::to_owned)
                .to_vec(),
            allowed_headers: ["accept", "authorization", "content-type", "x-csrf-token"]
                .map(str::to_owned)
                .to_vec(),
            max_age_secs: Some(600),
            supports_credentials: false,
        }
    }
}

pub struct HandleCors {
    config: CorsConfig,
}

impl HandleCors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn allows(&self, origin: &str) -> bool {
        self.config.allowed_origins.iter().any(|o| o == "*" || o == origin)
    }

    /// Value for `access-control-allow-origin`. A wildcard is echoed back as
    /// the concrete origin when credentials are allowed, since browsers
    /// refuse `*` together with credentials.
    fn allow_origin<'a>(&self, origin: &'a str) -> &'a str {
        let wildcard = self.config.allowed_origins.iter().any(|o| o == "*");
        if wildcard && !self.config.supports_credentials { "*" } else { origin }
    }

    fn decorate(&self, res: &mut Response, origin: &str) {
        res.set_header("access-control-allow-origin", self.allow_origin(origin));
        res.set_header("vary", "origin");
        if self.config.supports_credentials {
            res.set_header("access-control-allow-credentials", "true");
        }
    }

    fn preflight(&self, origin: &str) -> Response {
        let mut res = Response::status(StatusCode::NO_CONTENT);
        self.decorate(&mut res, origin);
        res.set_header("access-control-allow-methods", &self.config.allowed_methods.join(", "));
        res.set_header("access-control-allow-headers", &self.config.allowed_headers.join(", "));
        if let Some(max_age) = self.config.max_age_secs {
            res.set_header("access-control-max-age", &max_age.to_string());
        }
        res
    }
}

impl Middleware for HandleCors {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        let Some(origin) = req
            .header("origin")
            .filter(|o| self.allows(o))
            .map(str::to_owned)
        else {
            return next.run(req);
        };

        if req.method() == Method::OPTIONS && req.header("access-control-request-method").is_some() {
            let res = self.preflight(&origin);
            return Box::pin(async move { res });
        }

        let allow_origin = self.allow_origin(&origin).to_owned();
        let credentials = self.config.supports_credentials;
        Box::pin(async move {
            let mut res = next.run(req).await;
            res.set_header("access-control-allow-origin", &allow_origin);
            res.set_header("vary", "origin");
            if credentials {
                res.set_header("access-control-allow-credentials", "true");
            }
            res
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::middleware::test_support::{boxed, run_chain};

    async fn ok(_req: Request) -> Response {
        Response::text("ok")
    }

    fn request(method: &str, origin: &str, preflight: bool) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/courses").header("origin", origin);
        if preflight {
            builder = builder.header("access-control-request-method", "POST");
        }
        builder.body(Bytes::new()).unwrap().into()
    }

    fn cors(origins: &[&str], credentials: bool) -> HandleCors {
        HandleCors::new(CorsConfig {
            allowed_origins: origins.iter().map(|o| o.to_string()).collect(),
            supports_credentials: credentials,
            ..CorsConfig::default()
        })
    }

    #[tokio::test]
    async fn preflight_is_answered_without_reaching_the_route() {
        let res = run_chain(
            vec![boxed(cors(&["https://app.example"], false))],
            |_req: Request| async { StatusCode::IM_A_TEAPOT },
            request("OPTIONS", "https://app.example", true),
        )
        .await;

        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
        assert_eq!(res.header("access-control-allow-origin"), Some("https://app.example"));
        assert!(res.header("access-control-allow-methods").unwrap().contains("POST"));
        assert_eq!(res.header("access-control-max-age"), Some("600"));
    }

    #[tokio::test]
    async fn simple_request_is_decorated() {
        let res = run_chain(vec![boxed(cors(&["*"], false))], ok, request("GET", "https://a.example", false)).await;
        assert_eq!(res.body(), b"ok");
        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
    }

    #[tokio::test]
    async fn wildcard_with_credentials_echoes_origin() {
        let res = run_chain(vec![boxed(cors(&["*"], true))], ok, request("GET", "https://a.example", false)).await;
        assert_eq!(res.header("access-control-allow-origin"), Some("https://a.example"));
        assert_eq!(res.header("access-control-allow-credentials"), Some("true"));
    }

    #[tokio::test]
    async fn disallowed_origin_is_left_alone() {
        let res = run_chain(
            vec![boxed(cors(&["https://app.example"], false))],
            ok,
            request("GET", "https://evil.example", false),
        )
        .await;
        assert_eq!(res.header("access-control-allow-origin"), None);
    }
}
