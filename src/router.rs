//! Route declarations.
//!
//! A [`Router`] only records what was declared: method, path, handler, and
//! the middleware names the route asks for. Nothing is resolved until
//! [`Kernel::bind`](crate::Kernel::bind) turns it into an [`App`](crate::App),
//! so a typo in a middleware name fails at startup rather than on first hit.

use http::Method;

use crate::handler::{BoxedHandler, Handler};

pub(crate) struct Route {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) middleware: Vec<String>,
    pub(crate) handler: BoxedHandler,
}

/// The application's route table.
///
/// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
///
/// ```rust
/// # use strata::{Method, Request, Response, Router};
/// # async fn list_courses(_: Request) -> Response { Response::text("") }
/// # async fn book(_: Request) -> Response { Response::text("") }
/// # async fn cancel(_: Request) -> Response { Response::text("") }
/// Router::new()
///     .middleware(["api"])
///     .on(Method::GET, "/courses", list_courses)
///     .scope(["auth:sanctum"], |r| r
///         .on(Method::POST,   "/bookings",      book)
///         .on(Method::DELETE, "/bookings/{id}", cancel));
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    middleware: Vec<String>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a method + path pair, carrying every
    /// middleware name applied to this router so far.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes.push(Route {
            method,
            path: path.to_owned(),
            middleware: self.middleware.clone(),
            handler: handler.into_boxed_handler(),
        });
        self
    }

    /// Applies middleware (group names, aliases, or stage ids) to every route
    /// declared on this router after this call.
    pub fn middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declares a block of routes that carry this router's middleware plus
    /// `names`. Scopes nest.
    pub fn scope<I, S>(mut self, names: I, build: impl FnOnce(Router) -> Router) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = build(Router {
            routes: Vec::new(),
            middleware: self.middleware.clone(),
        }.middleware(names));
        self.routes.extend(inner.routes);
        self
    }

    pub(crate) fn into_routes(self) -> Vec<Route> {
        self.routes
    }
}
