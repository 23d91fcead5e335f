//! Error types.
//!
//! Application-level failures (401, 404, 429, ...) are [`Response`](crate::Response)
//! values produced by handlers and middleware, never `Error`s. What lives here
//! is everything that stops the process from serving at all: a broken
//! middleware manifest, a bad bind address, a socket that will not open.

use std::path::PathBuf;

use thiserror::Error;

/// A middleware or routing configuration problem detected at startup.
///
/// Every variant names the offending entry so the operator can fix the
/// manifest without guessing. None of these can occur at request time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown middleware `{name}`")]
    UnknownStage { name: String },

    #[error("malformed middleware reference `{reference}`: {reason}")]
    MalformedReference { reference: String, reason: &'static str },

    #[error("invalid alias `{alias}`: {reason}")]
    InvalidAlias { alias: String, reason: String },

    #[error("middleware group `{group}` is defined more than once or shadows an alias")]
    DuplicateGroup { group: String },

    #[error("middleware group `{group}` includes itself")]
    GroupCycle { group: String },

    #[error("stage `{id}` appears more than once in the priority list")]
    DuplicatePriority { id: String },

    #[error("stage `{id}` is in the priority list and cannot also be global")]
    PrioritizedGlobal { id: String },

    #[error("stage `{id}` is registered more than once")]
    DuplicateStage { id: String },

    #[error("invalid argument for `{stage}`: {reason}")]
    InvalidArgument { stage: String, reason: String },

    #[error("invalid url signing key: {reason}")]
    SigningKey { reason: &'static str },

    #[error("invalid route `{path}`: {source}")]
    Route {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("failed to read manifest {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The error type returned by strata's fallible server operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid socket address `{0}`")]
    Addr(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
