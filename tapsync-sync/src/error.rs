//! Error types for tapsync-sync.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tapsync_core::{ConfigError, RecipeError, StoreError};

/// Failure classification carried into batch reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    NotFound,
    UpstreamUnavailable,
    HashComputation,
    Timeout,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parse => "parse",
            Self::NotFound => "not_found",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::HashComputation => "hash_computation",
            Self::Timeout => "timeout",
            Self::Io => "io",
        };
        f.write_str(s)
    }
}

/// Errors from reconciling one package against its upstream index.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The index does not know the package.
    #[error("package `{package}` not found upstream: {reason}")]
    NotFound { package: String, reason: String },

    /// Network or service failure talking to the index. Not retried.
    #[error("upstream index unavailable for `{package}`: {message}")]
    UpstreamUnavailable { package: String, message: String },

    /// The artifact could not be fetched or its digest is unusable.
    #[error("cannot hash {url}: {message}")]
    HashComputation { url: String, message: String },

    /// Neither the index nor the recipe's URL template yields a source URL.
    #[error("no source url for `{package}` {version}")]
    NoSourceUrl { package: String, version: String },
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::NoSourceUrl { .. } => ErrorKind::NotFound,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::HashComputation { .. } => ErrorKind::HashComputation,
        }
    }
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("recipe `{name}`: {source}")]
    Recipe {
        name: String,
        #[source]
        source: RecipeError,
    },

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// A worker did not finish within the per-package budget.
    #[error("package `{package}` timed out after {after:?}")]
    Timeout { package: String, after: Duration },

    /// A worker panicked or was cancelled.
    #[error("worker for `{package}` failed: {message}")]
    Worker { package: String, message: String },

    /// Invalid trigger payload or report serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The batch runtime could not be started.
    #[error("failed to start batch runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Store(StoreError::Recipe { .. }) | Self::Recipe { .. } => ErrorKind::Parse,
            Self::Store(StoreError::Io { .. }) => ErrorKind::Io,
            Self::Config(_) | Self::Json(_) => ErrorKind::Parse,
            Self::Reconcile(e) => e.kind(),
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Worker { .. } | Self::Io { .. } | Self::Runtime(_) => ErrorKind::Io,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
