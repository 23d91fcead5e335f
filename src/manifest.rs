//! Declarative middleware manifest.
//!
//! The manifest is a TOML document with four sections:
//!
//! ```toml
//! # Run on every request, in this order.
//! global = ["http.trace", "http.cors"]
//!
//! # Stages that must keep this relative order whenever they meet in a chain.
//! priority = ["session.start", "auth.authenticate", "routing.bindings"]
//!
//! [groups]
//! web = ["session.start", "session.csrf", "bindings"]
//! api = ["throttle:api", "bindings"]
//!
//! [aliases]
//! auth = "auth.authenticate"
//! bindings = "routing.bindings"
//! throttle = "limit.throttle"
//! ```
//!
//! Loading only checks the document's shape. Names are resolved against a
//! [`Registry`](crate::Registry) by [`Kernel::from_manifest`](crate::Kernel::from_manifest).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub global: Vec<String>,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: Vec<String>,
}

impl Manifest {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source)
    }
}
