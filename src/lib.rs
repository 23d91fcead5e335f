//! # strata
//!
//! A minimal HTTP framework whose middleware pipeline is declared, not coded.
//!
//! A [`Manifest`] (or a [`KernelBuilder`]) names:
//!
//! - the **global** stages every request runs through, in order;
//! - **groups** of stages for classes of routes (`web`, `api`);
//! - **aliases**, short names for registered stages, optionally
//!   parameterized as `name:argument` (`throttle:api`, `auth:sanctum`);
//! - a **priority** list that fixes the relative order of stages that must
//!   not be reordered by how routes happen to list them.
//!
//! Names are resolved against a typed [`Registry`] once, at startup.
//! [`Kernel::bind`] composes a chain per route and returns an [`App`];
//! any unknown name or bad argument fails there, before a socket is opened.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use strata::middleware::throttle::{Limit, Limiters, MemoryRateLimitStore};
//! use strata::middleware::trace::TraceRequests;
//! use strata::{Kernel, Manifest, Method, Registry, Request, Response, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strata::Error> {
//!     let limiters = Limiters::new(Arc::new(MemoryRateLimitStore::new()))
//!         .limiter("api", Limit::per_minute(60));
//!
//!     let registry = Registry::new()
//!         .stage("http.trace", TraceRequests)
//!         .factory("limit.throttle", move |arg| limiters.throttle(arg));
//!
//!     let manifest = Manifest::from_toml(r#"
//!         global = ["http.trace"]
//!         [groups]
//!         api = ["throttle:api"]
//!         [aliases]
//!         throttle = "limit.throttle"
//!     "#)?;
//!
//!     let app = Kernel::from_manifest(manifest, registry)?.bind(
//!         Router::new()
//!             .middleware(["api"])
//!             .on(Method::GET, "/courses/{id}", show_course),
//!     )?;
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn show_course(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//! ```

mod app;
mod error;
mod handler;
mod kernel;
mod manifest;
mod registry;
mod request;
mod response;
mod router;
mod server;
mod stage_ref;

pub mod middleware;

pub use app::App;
pub use error::{ConfigError, Error};
pub use handler::{BoxFuture, Handler};
pub use http::{Method, StatusCode};
pub use kernel::{Chain, Kernel, KernelBuilder};
pub use manifest::Manifest;
pub use registry::Registry;
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use stage_ref::StageRef;
