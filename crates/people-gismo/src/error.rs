//! Error types for the organization feed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed XML: {0}")]
  Xml(String),

  #[error("unable to find xml node {0}")]
  MissingNode(&'static str),

  #[error("invalid date {value:?}: {source}")]
  InvalidDate {
    value:  String,
    #[source]
    source: chrono::ParseError,
  },

  #[error(transparent)]
  Core(#[from] people_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
