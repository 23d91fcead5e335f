//! Route-parameter binding.
//!
//! A [`Binder`] turns a raw route parameter (`{course}` = `"42"`) into the
//! record it names. [`SubstituteBindings`] runs every binder whose parameter
//! is present on the matched route; the results land in a [`Bound`] map in
//! the request extensions. A parameter that resolves to nothing ends the
//! request with `404` before the handler runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use http::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

pub trait Binder: Send + Sync + 'static {
    fn bind(&self, value: &str) -> BoxFuture<'_, Option<Value>>;
}

impl<F, Fut> Binder for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    fn bind(&self, value: &str) -> BoxFuture<'_, Option<Value>> {
        Box::pin(self(value.to_owned()))
    }
}

/// Records resolved by [`SubstituteBindings`], keyed by parameter name.
#[derive(Clone, Debug, Default)]
pub struct Bound(HashMap<String, Value>);

impl Bound {
    pub fn get(&self, param: &str) -> Option<&Value> {
        self.0.get(param)
    }
}

#[derive(Default)]
pub struct SubstituteBindings {
    binders: HashMap<String, Arc<dyn Binder>>,
}

impl SubstituteBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, param: &str, binder: impl Binder) -> Self {
        self.binders.insert(param.to_owned(), Arc::new(binder));
        self
    }
}

impl Middleware for SubstituteBindings {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        let pending: Vec<(String, String, Arc<dyn Binder>)> = req
            .params()
            .filter_map(|(param, value)| {
                let binder = self.binders.get(param)?;
                Some((param.to_owned(), value.to_owned(), Arc::clone(binder)))
            })
            .collect();

        if pending.is_empty() {
            return next.run(req);
        }

        Box::pin(async move {
            let mut bound = HashMap::with_capacity(pending.len());
            for (param, value, binder) in pending {
                match binder.bind(&value).await {
                    Some(record) => {
                        bound.insert(param, record);
                    }
                    None => {
                        debug!(param = %param, value = %value, "route binding not found");
                        return Response::error(StatusCode::NOT_FOUND, "Not Found.");
                    }
                }
            }
            req.extensions_mut().insert(Bound(bound));
            next.run(req).await
        })
    }
}
