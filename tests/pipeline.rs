use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::{Value, json};
use strata::middleware::auth::{
    AuthenticateWithBasicAuth, Authorize, CredentialVerifier, EnsureEmailIsVerified, Guards,
    Principal, TokenVerifier,
};
use strata::middleware::bindings::SubstituteBindings;
use strata::middleware::cache::SetCacheHeaders;
use strata::middleware::cors::{CorsConfig, HandleCors};
use strata::middleware::csrf::VerifyCsrfToken;
use strata::middleware::maintenance::{MaintenanceMode, PreventRequestsDuringMaintenance};
use strata::middleware::normalize::{ConvertEmptyStringsToNull, TrimStrings};
use strata::middleware::post_size::ValidatePostSize;
use strata::middleware::proxies::TrustProxies;
use strata::middleware::session::{MemorySessionStore, StartSession};
use strata::middleware::signed::UrlSigner;
use strata::middleware::throttle::{Limit, Limiters, MemoryRateLimitStore};
use strata::middleware::trace::TraceRequests;
use strata::middleware::{self, Next};
use strata::{
    App, BoxFuture, ConfigError, Kernel, Manifest, Method, Registry, Request, Response, Router,
    StatusCode,
};

const STAGE_IDS: &[&str] = &[
    "http.trace",
    "http.trust_proxies",
    "http.maintenance",
    "http.post_size",
    "http.trim_strings",
    "http.empty_to_null",
    "http.cors",
    "session.start",
    "session.csrf",
    "routing.bindings",
    "routing.signed",
    "auth.authenticate",
    "auth.basic",
    "auth.guest",
    "auth.verified",
    "auth.authorize",
    "limit.throttle",
    "cache.headers",
];

const GLOBAL: &[&str] = &[
    "http.trace",
    "http.trust_proxies",
    "http.maintenance",
    "http.post_size:8388608",
    "http.trim_strings",
    "http.empty_to_null",
    "http.cors",
];

const PRIORITY: &[&str] = &[
    "session.start",
    "auth.authenticate",
    "routing.bindings",
    "auth.authorize",
];

fn manifest() -> Manifest {
    Manifest::load(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/kernel.toml")).unwrap()
}

// ── the real stack ───────────────────────────────────────────────────────────

struct Tokens;

impl TokenVerifier for Tokens {
    fn verify(&self, token: &str) -> BoxFuture<'_, Option<Principal>> {
        let principal = match token {
            "student-token" => Some(
                Principal::new("student-1").with_abilities(["bookings.create"]).email_verified(),
            ),
            "unverified-token" => Some(Principal::new("student-2").with_abilities(["bookings.create"])),
            _ => None,
        };
        Box::pin(async move { principal })
    }
}

struct Operators;

impl CredentialVerifier for Operators {
    fn verify(&self, username: &str, password: &str) -> BoxFuture<'_, Option<Principal>> {
        let principal = (username == "ops" && password == "hunter2").then(|| Principal::new("ops"));
        Box::pin(async move { principal })
    }
}

fn signer() -> UrlSigner {
    UrlSigner::new("receipts-key").unwrap()
}

async fn find_course(id: String) -> Option<Value> {
    (id == "1").then(|| json!({ "id": 1, "title": "Ownership and Borrowing" }))
}

fn registry(maintenance: MaintenanceMode) -> Registry {
    let limiters = Limiters::new(Arc::new(MemoryRateLimitStore::new()))
        .limiter("api", Limit::per_minute(60));
    let guards = Guards::new().guard("sanctum", Tokens);
    let guests = guards.clone();
    let signer = signer();

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
        .factory("routing.signed", move |arg| signer.validate(arg))
        .factory("auth.authenticate", move |arg| guards.authenticate(arg))
        .stage("auth.basic", AuthenticateWithBasicAuth::new(Operators))
        .factory("auth.guest", move |arg| guests.guest(arg))
        .stage("auth.verified", EnsureEmailIsVerified)
        .factory("auth.authorize", Authorize::from_argument)
        .factory("limit.throttle", move |arg| limiters.throttle(arg))
        .factory("cache.headers", SetCacheHeaders::from_argument)
}

async fn ok(_req: Request) -> Response {
    Response::text("ok")
}

async fn created(_req: Request) -> Response {
    Response::builder().status(StatusCode::CREATED).json(r#"{"booked":true}"#)
}

async fn echo(req: Request) -> Response {
    Response::json(req.body().to_vec())
}

fn routes() -> Router {
    Router::new()
        .on(Method::GET, "/up", ok)
        .scope(["web"], |r| r.on(Method::GET, "/", ok).on(Method::POST, "/contact", ok))
        .scope(["api"], |r| r
            .on(Method::GET, "/api/courses/{course}", ok)
            .on(Method::POST, "/api/courses", echo)
            .scope(["auth:sanctum", "can:bookings.create", "verified"], |r| r
                .on(Method::POST, "/api/courses/{course}/bookings", created))
            .scope(["guest"], |r| r.on(Method::POST, "/api/register", created))
            .scope(["signed:relative"], |r| r.on(Method::GET, "/api/receipts/{booking}", ok)))
        .scope(["auth.basic"], |r| r.on(Method::GET, "/ops/bookings", ok))
}

fn app(maintenance: MaintenanceMode) -> App {
    let kernel = Kernel::from_manifest(manifest(), registry(maintenance)).unwrap();
    kernel.bind(routes()).unwrap()
}

fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> Request {
    with_body(method, uri, headers, "")
}

fn with_body(method: &str, uri: &str, headers: &[(&str, &str)], body: &'static str) -> Request {
    let mut builder = http::Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Bytes::from_static(body.as_bytes())).unwrap().into()
}

// ── a stack that only records what ran ───────────────────────────────────────

type Log = Arc<Mutex<Vec<String>>>;

fn recording_registry(log: &Log) -> Registry {
    STAGE_IDS.iter().fold(Registry::new(), |registry, &id| {
        let log = Arc::clone(log);
        registry.factory(id, move |arg| {
            let label = match arg {
                Some(arg) => format!("{id}:{arg}"),
                None => id.to_owned(),
            };
            let log = Arc::clone(&log);
            Ok(middleware::from_fn(move |req: Request, next: Next| {
                log.lock().unwrap().push(label.clone());
                next.run(req)
            }))
        })
    })
}

fn position(labels: &[String], id: &str) -> Option<usize> {
    labels.iter().position(|l| l == id || l.starts_with(&format!("{id}:")))
}

// ── composition ──────────────────────────────────────────────────────────────

#[test]
fn api_route_is_global_then_throttle_then_bindings() {
    let app = app(MaintenanceMode::new());
    let chain = app.chain_for(&Method::GET, "/api/courses/1").unwrap();

    let mut expected: Vec<&str> = GLOBAL.to_vec();
    expected.extend(["limit.throttle:api", "routing.bindings"]);
    assert_eq!(chain, expected.as_slice());
}

#[test]
fn api_routes_never_carry_session_stages() {
    let app = app(MaintenanceMode::new());
    for (method, path) in [
        (Method::GET, "/api/courses/1"),
        (Method::POST, "/api/courses/1/bookings"),
    ] {
        let chain = app.chain_for(&method, path).unwrap();
        assert!(chain.iter().any(|l| l == "limit.throttle:api"), "{path}: {chain:?}");
        assert!(!chain.iter().any(|l| l.starts_with("session.")), "{path}: {chain:?}");
    }
}

#[test]
fn prioritized_stages_follow_the_priority_list_on_every_route() {
    let kernel = Kernel::from_manifest(manifest(), registry(MaintenanceMode::new())).unwrap();
    let routes: &[&[&str]] = &[
        &["web"],
        &["api"],
        &["api", "auth:sanctum"],
        &["can:bookings.create", "auth:sanctum", "web"],
        &["bindings", "auth", "api"],
        &["auth:sanctum", "can:bookings.create", "bindings"],
    ];

    for names in routes {
        let chain = kernel.compose(names.iter()).unwrap();
        let positions: Vec<usize> = PRIORITY
            .iter()
            .filter_map(|id| position(chain.labels(), id))
            .collect();
        assert!(
            positions.windows(2).all(|w| w[0] < w[1]),
            "{names:?} composed out of priority order: {:?}",
            chain.labels()
        );
        assert_eq!(&chain.labels()[..GLOBAL.len()], GLOBAL, "{names:?}");
    }
}

#[test]
fn composing_the_same_route_twice_is_identical() {
    let kernel = Kernel::from_manifest(manifest(), registry(MaintenanceMode::new())).unwrap();
    for names in [&["web"][..], &["api", "auth:sanctum", "can:bookings.create"][..]] {
        let first = kernel.compose(names.iter()).unwrap();
        let second = kernel.compose(names.iter()).unwrap();
        assert_eq!(first.labels(), second.labels());
    }
}

#[test]
fn unknown_middleware_fails_bind_and_names_it() {
    let kernel = Kernel::from_manifest(manifest(), registry(MaintenanceMode::new())).unwrap();
    let router = Router::new()
        .middleware(["api", "frobnicate"])
        .on(Method::GET, "/api/widgets", ok);

    let err = kernel.bind(router).err().unwrap();
    assert!(matches!(&err, ConfigError::UnknownStage { name } if name == "frobnicate"));
    assert!(err.to_string().contains("frobnicate"));
}

#[test]
fn prioritized_stage_in_the_global_list_is_rejected() {
    let manifest = Manifest::from_toml(
        r#"
        global = ["http.trace", "session.start"]
        priority = ["session.start", "auth.authenticate"]
        "#,
    )
    .unwrap();

    let err = Kernel::from_manifest(manifest, registry(MaintenanceMode::new())).err().unwrap();
    assert!(matches!(&err, ConfigError::PrioritizedGlobal { id } if id == "session.start"), "{err}");
}

#[test]
fn bad_argument_fails_at_startup() {
    let kernel = Kernel::from_manifest(manifest(), registry(MaintenanceMode::new())).unwrap();
    let router = Router::new()
        .middleware(["throttle:burst"])
        .on(Method::GET, "/api/widgets", ok);

    let err = kernel.bind(router).err().unwrap();
    assert!(matches!(err, ConfigError::InvalidArgument { .. }), "{err}");
}

// ── execution ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn global_stages_run_first_in_declared_order() {
    let log: Log = Arc::default();
    let kernel = Kernel::from_manifest(manifest(), recording_registry(&log)).unwrap();
    let app = kernel
        .bind(Router::new().middleware(["web", "auth:sanctum"]).on(Method::GET, "/dashboard", ok))
        .unwrap();

    let res = app.handle(request("GET", "/dashboard", &[])).await;
    assert_eq!(res.status_code(), StatusCode::OK);

    let mut expected: Vec<&str> = GLOBAL.to_vec();
    expected.extend([
        "session.start",
        "session.csrf",
        "auth.authenticate:sanctum",
        "routing.bindings",
    ]);
    assert_eq!(*log.lock().unwrap(), expected);
}

#[tokio::test]
async fn unmatched_requests_still_run_the_global_stages() {
    let log: Log = Arc::default();
    let kernel = Kernel::from_manifest(manifest(), recording_registry(&log)).unwrap();
    let app = kernel.bind(Router::new().on(Method::GET, "/courses", ok)).unwrap();

    let res = app.handle(request("GET", "/nowhere", &[])).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(*log.lock().unwrap(), GLOBAL);

    let res = app.handle(request("DELETE", "/courses", &[])).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET"));
}

#[tokio::test]
async fn missing_credentials_are_401_never_a_redirect() {
    let app = app(MaintenanceMode::new());
    for headers in [
        &[][..],
        &[("accept", "text/html")][..],
        &[("authorization", "Bearer nope")][..],
    ] {
        let res = app.handle(request("POST", "/api/courses/1/bookings", headers)).await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED, "{headers:?}");
        assert!(!res.status_code().is_redirection());
        assert_eq!(res.header("location"), None);
    }
}

#[tokio::test]
async fn authenticated_booking_goes_through() {
    let app = app(MaintenanceMode::new());

    let res = app
        .handle(request("POST", "/api/courses/1/bookings", &[("authorization", "Bearer student-token")]))
        .await;
    assert_eq!(res.status_code(), StatusCode::CREATED);
    assert_eq!(res.header("x-ratelimit-limit"), Some("60"));
    assert_eq!(res.header("x-ratelimit-remaining"), Some("59"));

    let res = app
        .handle(request("POST", "/api/courses/9/bookings", &[("authorization", "Bearer student-token")]))
        .await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn web_writes_need_a_csrf_token() {
    let app = app(MaintenanceMode::new());
    let res = app.handle(request("POST", "/contact", &[])).await;
    assert_eq!(res.status_code().as_u16(), 419);

    let res = app.handle(request("GET", "/", &[])).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert!(res.header("set-cookie").is_some());
}

#[tokio::test]
async fn maintenance_mode_spares_the_health_check() {
    let maintenance = MaintenanceMode::new();
    let app = app(maintenance.clone());
    maintenance.enable();

    let res = app.handle(request("GET", "/api/courses/1", &[])).await;
    assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    let res = app.handle(request("GET", "/up", &[])).await;
    assert_eq!(res.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn json_input_is_trimmed_then_nulled_before_the_handler() {
    let app = app(MaintenanceMode::new());
    let req = with_body(
        "POST",
        "/api/courses",
        &[("content-type", "application/json")],
        r#"{"title":"  Async Rust  ","room":"   ","password":" keep "}"#,
    );

    let res = app.handle(req).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body, json!({ "title": "Async Rust", "room": null, "password": " keep " }));
}

#[tokio::test]
async fn booking_needs_a_verified_email() {
    let app = app(MaintenanceMode::new());
    let res = app
        .handle(request("POST", "/api/courses/1/bookings", &[("authorization", "Bearer unverified-token")]))
        .await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn registration_is_for_guests_only() {
    let app = app(MaintenanceMode::new());

    let res = app.handle(request("POST", "/api/register", &[])).await;
    assert_eq!(res.status_code(), StatusCode::CREATED);

    let res = app
        .handle(request("POST", "/api/register", &[("authorization", "Bearer student-token")]))
        .await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(res.header("location"), None);
}

#[tokio::test]
async fn receipts_need_a_valid_signature() {
    let app = app(MaintenanceMode::new());

    let url = signer().sign_relative("/api/receipts/7", None);
    let res = app.handle(request("GET", &url, &[])).await;
    assert_eq!(res.status_code(), StatusCode::OK);

    let forged = url.replace("/7?", "/8?");
    let res = app.handle(request("GET", &forged, &[])).await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);

    let res = app.handle(request("GET", "/api/receipts/7", &[])).await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn operator_routes_take_basic_credentials() {
    let app = app(MaintenanceMode::new());

    // "ops:hunter2"
    let res = app.handle(request("GET", "/ops/bookings", &[("authorization", "Basic b3BzOmh1bnRlcjI=")])).await;
    assert_eq!(res.status_code(), StatusCode::OK);

    let res = app.handle(request("GET", "/ops/bookings", &[])).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.header("www-authenticate"), Some("Basic"));
}
