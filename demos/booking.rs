//! Course-booking API wired through the demo middleware manifest.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example booking
//!
//! Try:
//!   curl http://localhost:3000/api/courses
//!   curl http://localhost:3000/api/courses/1
//!   curl -X POST http://localhost:3000/api/courses/1/bookings               # 401
//!   curl -X POST http://localhost:3000/api/courses/1/bookings \
//!        -H 'authorization: Bearer student-token'                           # 201
//!   curl -X DELETE http://localhost:3000/api/courses/1 \
//!        -H 'authorization: Bearer student-token'                           # 403
//!   curl -u ops:ops-password http://localhost:3000/ops/bookings             # 200
//!
//! The signed receipt link for booking 1 is logged at startup.

use std::sync::Arc;

use serde_json::{Value, json};
use strata::middleware::auth::{
    AuthenticateWithBasicAuth, Authorize, CredentialVerifier, EnsureEmailIsVerified, Guards,
    Principal, TokenVerifier,
};
use strata::middleware::bindings::{Bound, SubstituteBindings};
use strata::middleware::cache::SetCacheHeaders;
use strata::middleware::cors::{CorsConfig, HandleCors};
use strata::middleware::csrf::VerifyCsrfToken;
use strata::middleware::maintenance::{MaintenanceMode, PreventRequestsDuringMaintenance};
use strata::middleware::normalize::{ConvertEmptyStringsToNull, TrimStrings};
use strata::middleware::post_size::ValidatePostSize;
use strata::middleware::proxies::TrustProxies;
use strata::middleware::session::{MemorySessionStore, Session, StartSession};
use strata::middleware::signed::UrlSigner;
use strata::middleware::throttle::{Limit, Limiters, MemoryRateLimitStore};
use strata::middleware::trace::TraceRequests;
use strata::{BoxFuture, Kernel, Manifest, Method, Registry, Request, Response, Router, Server, StatusCode};

#[tokio::main]
async fn main() -> Result<(), strata::Error> {
    tracing_subscriber::fmt::init();

    let manifest = Manifest::load(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/kernel.toml"))?;
    let signer = UrlSigner::new("demo-receipt-signing-key")?;
    let kernel = Kernel::from_manifest(manifest, registry(MaintenanceMode::new(), signer.clone()))?;

    let receipt_link = signer.sign_relative("/api/bookings/1/receipt", None);
    tracing::info!(receipt = %receipt_link, "signed receipt link");

    let app = kernel.bind(
        Router::new()
            .on(Method::GET, "/up", |_req: Request| async { "up" })
            .scope(["web"], |r| r
                .on(Method::GET, "/", home)
                .scope(["guest"], |r| r.on(Method::POST, "/register", register)))
            .scope(["auth.basic"], |r| r.on(Method::GET, "/ops/bookings", list_courses))
            .scope(["api"], |r| r
                .on(Method::GET, "/api/courses", list_courses)
                .scope(["cache.headers:public;max_age=60;etag"], |r| r
                    .on(Method::GET, "/api/courses/{course}", show_course))
                .scope(["auth:sanctum"], |r| r
                    .scope(["verified"], |r| r
                        .on(Method::POST, "/api/courses/{course}/bookings", book))
                    .scope(["can:courses.delete"], |r| r
                        .on(Method::DELETE, "/api/courses/{course}", delete_course)))
                .scope(["signed:relative"], |r| r
                    .on(Method::GET, "/api/bookings/{booking}/receipt", receipt))),
    )?;

    Server::bind("0.0.0.0:3000").serve(app).await
}

fn registry(maintenance: MaintenanceMode, signer: UrlSigner) -> Registry {
    let limiters = Limiters::new(Arc::new(MemoryRateLimitStore::new()))
        .limiter("api", Limit::per_minute(60));
    let guards = Guards::new().guard("sanctum", DemoTokens);
    let guests = guards.clone();

    Registry::new()
        .stage("http.trace", TraceRequests)
        .factory("http.trust_proxies", |arg| TrustProxies::parse(arg.unwrap_or("127.0.0.1")))
        .stage("http.maintenance", PreventRequestsDuringMaintenance::new(maintenance).except(["/up"]))
        .factory("http.post_size", |arg| {
            let limit = arg.ok_or("expects a byte limit")?.parse().map_err(|_| "not a byte count")?;
            Ok(ValidatePostSize::new(limit))
        })
        .stage("http.trim_strings", TrimStrings::new())
        .stage("http.empty_to_null", ConvertEmptyStringsToNull)
        .stage("http.cors", HandleCors::new(CorsConfig::default()))
        .stage("session.start", StartSession::new(Arc::new(MemorySessionStore::new())))
        .stage("session.csrf", VerifyCsrfToken::new())
        .stage("routing.bindings", SubstituteBindings::new().bind("course", find_course))
        .factory("auth.authenticate", move |arg| guards.authenticate(arg))
        .stage("auth.basic", AuthenticateWithBasicAuth::new(DemoOperators).realm("bookings"))
        .factory("auth.guest", move |arg| guests.guest(arg))
        .stage("auth.verified", EnsureEmailIsVerified)
        .factory("auth.authorize", Authorize::from_argument)
        .factory("routing.signed", move |arg| signer.validate(arg))
        .factory("limit.throttle", move |arg| limiters.throttle(arg))
        .factory("cache.headers", SetCacheHeaders::from_argument)
}

/// Fixed demo tokens standing in for a real token store.
struct DemoTokens;

impl TokenVerifier for DemoTokens {
    fn verify(&self, token: &str) -> BoxFuture<'_, Option<Principal>> {
        let principal = match token {
            "student-token" => Some(
                Principal::new("student-1").with_abilities(["bookings.create"]).email_verified(),
            ),
            "admin-token" => Some(Principal::new("admin-1").with_abilities(["*"]).email_verified()),
            _ => None,
        };
        Box::pin(async move { principal })
    }
}

/// A single operator account for the back-office routes.
struct DemoOperators;

impl CredentialVerifier for DemoOperators {
    fn verify(&self, username: &str, password: &str) -> BoxFuture<'_, Option<Principal>> {
        let principal = (username == "ops" && password == "ops-password")
            .then(|| Principal::new("ops").with_abilities(["*"]));
        Box::pin(async move { principal })
    }
}

fn courses() -> Value {
    json!([
        { "id": 1, "title": "Ownership and Borrowing", "seats": 12 },
        { "id": 2, "title": "Async Rust in Practice", "seats": 8 },
    ])
}

async fn find_course(id: String) -> Option<Value> {
    courses()
        .as_array()?
        .iter()
        .find(|c| c["id"].to_string() == id)
        .cloned()
}

fn bound_course(req: &Request) -> Value {
    req.extensions()
        .get::<Bound>()
        .and_then(|b| b.get("course"))
        .cloned()
        .unwrap_or(Value::Null)
}

async fn home(req: Request) -> Response {
    let token = req.extensions().get::<Session>().and_then(Session::csrf_token).unwrap_or_default();
    Response::builder()
        .bytes(strata::ContentType::Html, format!("<meta name=\"csrf-token\" content=\"{token}\"><h1>Courses</h1>"))
}

async fn list_courses(_req: Request) -> Value {
    courses()
}

async fn show_course(req: Request) -> Value {
    bound_course(&req)
}

async fn book(req: Request) -> Response {
    let student = req.extensions().get::<Principal>().map(|p| p.id.clone()).unwrap_or_default();
    let course = bound_course(&req);
    Response::builder()
        .status(StatusCode::CREATED)
        .json(json!({ "course": course["id"], "student": student }).to_string())
}

async fn delete_course(_req: Request) -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn register(req: Request) -> Response {
    let name: Value = serde_json::from_slice(req.body()).unwrap_or(Value::Null);
    Response::builder()
        .status(StatusCode::CREATED)
        .json(json!({ "registered": name["name"] }).to_string())
}

async fn receipt(req: Request) -> Value {
    json!({ "booking": req.param("booking"), "paid": true })
}
