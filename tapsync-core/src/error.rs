//! Error types for tapsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from reading or writing a single recipe's text.
#[derive(Debug, Error)]
pub enum RecipeError {
    /// A required field (`class`, `url`, `sha256`, or a derivable version) is absent.
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    /// A field or block is present but unusable.
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    /// The model changes something the writer cannot express as a span edit.
    #[error("cannot write `{field}`: {reason}")]
    Unwritable { field: String, reason: String },
}

impl RecipeError {
    /// `true` for errors that mean the recipe text itself is bad.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::MissingField { .. } | Self::Malformed { .. })
    }
}

/// Errors from the recipe repository.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No recipe with that name exists in the store.
    #[error("recipe `{name}` not found at {location}")]
    NotFound { name: String, location: String },

    /// The recipe exists but its text could not be read.
    #[error("recipe `{name}`: {source}")]
    Recipe {
        name: String,
        #[source]
        source: RecipeError,
    },
}

/// Errors from loading `tapsync.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Parsed, but a value is out of range.
    #[error("invalid config at {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
