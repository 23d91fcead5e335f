//! The bound application: routes with their composed middleware chains.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, StatusHandler};
use crate::kernel::Chain;
use crate::request::Request;
use crate::response::Response;

pub(crate) struct Endpoint {
    pub(crate) chain: Chain,
    pub(crate) handler: BoxedHandler,
}

/// A [`Router`](crate::Router) bound to a [`Kernel`](crate::Kernel).
///
/// One radix tree per HTTP method. Each leaf holds the route's handler and
/// its fully composed chain, so dispatch is a tree lookup and a walk down a
/// slice. Requests that match no route still run the global chain, ending in
/// a JSON `404` or `405`.
pub struct App {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
    fallback: Chain,
}

impl App {
    pub(crate) fn new(routes: HashMap<Method, MatchitRouter<Endpoint>>, fallback: Chain) -> Self {
        Self { routes, fallback }
    }

    /// Dispatches one request through its chain and handler.
    pub async fn handle(&self, mut req: Request) -> Response {
        let matched = self
            .routes
            .get(req.method())
            .and_then(|tree| tree.at(req.path()).ok())
            .map(|m| {
                let params = m.params.iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect::<HashMap<_, _>>();
                (m.value.chain.clone(), Arc::clone(&m.value.handler), params)
            });

        match matched {
            Some((chain, handler, params)) => {
                req.set_params(params);
                chain.run(req, handler).await
            }
            None => {
                let terminal = self.unmatched(req.method(), req.path());
                self.fallback.run(req, Arc::new(terminal)).await
            }
        }
    }

    /// Labels of the chain that would run for `method` + `path`, in order.
    pub fn chain_for(&self, method: &Method, path: &str) -> Option<&[String]> {
        let tree = self.routes.get(method)?;
        Some(tree.at(path).ok()?.value.chain.labels())
    }

    fn unmatched(&self, method: &Method, path: &str) -> StatusHandler {
        let mut allowed: Vec<&str> = self
            .routes
            .iter()
            .filter(|(m, tree)| *m != method && tree.at(path).is_ok())
            .map(|(m, _)| m.as_str())
            .collect();

        if allowed.is_empty() {
            return StatusHandler { status: StatusCode::NOT_FOUND, message: "Not Found.", allow: None };
        }
        allowed.sort_unstable();
        StatusHandler {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "Method Not Allowed.",
            allow: Some(allowed.join(", ")),
        }
    }
}
