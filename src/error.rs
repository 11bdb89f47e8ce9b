//! Typed errors for the parts of the crate that fail in structured ways.
//!
//! Text readers use the boxed [`crate::Err`] instead, like the rest of the
//! crate's parsing code.

use std::path::PathBuf;

use thiserror::Error;

/// Construction-time failures. These abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to parse config TOML: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("unknown atomic type '{0}'")]
  UnknownType(String),

  #[error("atomic type '{name}' redeclared with parent {parent:?}")]
  ConflictingType {
    name: String,
    parent: Option<String>,
  },

  #[error("unknown rule '{0}'")]
  UnknownRule(String),

  #[error("invalid config value for {field}: {reason}")]
  InvalidValue { field: String, reason: String },
}

impl ConfigError {
  pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::InvalidValue {
      field: field.into(),
      reason: reason.into(),
    }
  }
}

/// Failures of a single save or load call. They never touch in-memory state.
#[derive(Debug, Error)]
pub enum PersistError {
  #[error("i/o error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("corrupted blob in {path}: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Failures that stop training.
#[derive(Debug, Error)]
pub enum TrainError {
  /// The search or the stored training artifacts are inconsistent with each
  /// other. Continuing would train on garbage.
  #[error("internal invariant violated: {0}")]
  Invariant(String),

  #[error(transparent)]
  Persist(#[from] PersistError),
}

impl TrainError {
  pub fn invariant(msg: impl Into<String>) -> Self {
    Self::Invariant(msg.into())
  }
}
