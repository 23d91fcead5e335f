//! Typed registry of middleware factories.
//!
//! The manifest names middleware by string; the registry is where those
//! strings meet Rust types. Each entry is a factory that receives the
//! reference's argument (`api` in `throttle:api`) and returns a configured
//! stage, or explains why the argument is unusable. Factories run once per
//! distinct reference while the kernel is composing routes, never per request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::middleware::{BoxedMiddleware, Middleware};

type Factory = Arc<dyn Fn(Option<&str>) -> Result<BoxedMiddleware, String> + Send + Sync>;

/// Stage id → factory.
#[derive(Clone, Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
    duplicates: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a parameterized stage under `id`.
    ///
    /// ```rust
    /// use strata::Registry;
    /// use strata::middleware::post_size::ValidatePostSize;
    ///
    /// let registry = Registry::new().factory("http.post_size", |arg| {
    ///     let limit = arg.unwrap_or("8388608").parse().map_err(|_| "expected a byte count")?;
    ///     Ok(ValidatePostSize::new(limit))
    /// });
    /// # let _ = registry;
    /// ```
    pub fn factory<F, M>(mut self, id: &str, factory: F) -> Self
    where
        F: Fn(Option<&str>) -> Result<M, String> + Send + Sync + 'static,
        M: Middleware,
    {
        let erased: Factory = Arc::new(move |arg| {
            factory(arg).map(|stage| Arc::new(stage) as BoxedMiddleware)
        });
        if self.factories.insert(id.to_owned(), erased).is_some() {
            self.duplicates.push(id.to_owned());
        }
        self
    }

    /// Registers a stage that takes no argument. Every chain shares the same
    /// instance.
    pub fn stage<M: Middleware>(self, id: &str, stage: M) -> Self {
        let shared: BoxedMiddleware = Arc::new(stage);
        let owner = id.to_owned();
        self.factory(id, move |arg| match arg {
            None => Ok(Shared(Arc::clone(&shared))),
            Some(arg) => Err(format!("`{owner}` takes no argument, got `{arg}`")),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub(crate) fn check(&self) -> Result<(), ConfigError> {
        match self.duplicates.first() {
            Some(id) => Err(ConfigError::DuplicateStage { id: id.clone() }),
            None => Ok(()),
        }
    }

    pub(crate) fn instantiate(
        &self,
        id: &str,
        argument: Option<&str>,
    ) -> Result<BoxedMiddleware, ConfigError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| ConfigError::UnknownStage { name: id.to_owned() })?;
        factory(argument).map_err(|reason| ConfigError::InvalidArgument {
            stage: id.to_owned(),
            reason,
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("Registry").field("stages", &ids).finish()
    }
}

/// Re-exposes an already boxed stage through the factory interface.
struct Shared(BoxedMiddleware);

impl Middleware for Shared {
    fn handle(
        &self,
        req: crate::Request,
        next: crate::middleware::Next,
    ) -> crate::handler::BoxFuture<'static, crate::Response> {
        self.0.handle(req, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::post_size::ValidatePostSize;

    fn registry() -> Registry {
        Registry::new()
            .stage("fixed", ValidatePostSize::new(1))
            .factory("sized", |arg| {
                let limit = arg
                    .ok_or("a byte limit is required")?
                    .parse()
                    .map_err(|_| "not a number")?;
                Ok(ValidatePostSize::new(limit))
            })
    }

    #[test]
    fn unknown_id_is_reported_by_name() {
        let err = registry().instantiate("frobnicate", None).err().unwrap();
        assert_eq!(err.to_string(), "unknown middleware `frobnicate`");
    }

    #[test]
    fn factory_receives_the_argument() {
        assert!(registry().instantiate("sized", Some("1024")).is_ok());
        let err = registry().instantiate("sized", Some("lots")).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidArgument { ref stage, .. } if stage == "sized"));
    }

    #[test]
    fn plain_stage_rejects_arguments() {
        assert!(registry().instantiate("fixed", None).is_ok());
        assert!(registry().instantiate("fixed", Some("x")).is_err());
    }

    #[test]
    fn registering_an_id_twice_is_a_configuration_error() {
        let reg = registry().stage("fixed", ValidatePostSize::new(2));
        assert!(matches!(reg.check(), Err(ConfigError::DuplicateStage { .. })));
    }
}
