//! Error types for `people-core`.
//!
//! The variants double as the reconciliation error taxonomy: callers decide
//! per variant whether an item is skipped or a whole run aborts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A malformed external key. The offending item is skipped.
  #[error("invalid identifier: {0:?}")]
  InvalidIdentifier(String),

  /// A referenced organization could not be looked up or created.
  #[error("unresolved reference to {reference}: {reason}")]
  UnresolvedReference { reference: String, reason: String },

  #[error("persistence failure: {0}")]
  Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// A stored secret could not be opened. Never silently dropped.
  #[error("unable to decrypt {namespace} secret")]
  SecretDecryption { namespace: String },

  #[error("external source failure: {0}")]
  Source(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("run cancelled")]
  Cancelled,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a store backend error.
  pub fn persistence<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Persistence(Box::new(err))
  }

  /// Wrap an external source error.
  pub fn external<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Source(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
