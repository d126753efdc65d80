//! Namespaced external identifiers (URNs).
//!
//! An identifier is the only join key between an external source and a
//! canonical entity. Its textual form is `urn:<namespace>:<value>`; the value
//! may itself contain colons.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Well-known identifier namespaces.
pub mod ns {
  /// Durable self-identifier, minted once per person and never regenerated.
  pub const DURABLE: &str = "id";
  /// Historic directory key that follows a person across record boundaries.
  pub const HISTORIC_UGENT_ID: &str = "historic_ugent_id";
  pub const UGENT_ID: &str = "ugent_id";
  pub const UGENT_USERNAME: &str = "ugent_username";
  pub const UGENT_BARCODE: &str = "ugent_barcode";
  pub const UGENT_MEMORIALIS_ID: &str = "ugent_memorialis_id";
  pub const ORCID: &str = "orcid";
  pub const GISMO_ID: &str = "gismo_id";
  pub const BIBLIO_ID: &str = "biblio_id";
}

const PREFIX: &str = "urn";

// ─── Identifier ──────────────────────────────────────────────────────────────

/// A `{namespace, value}` pair. Ordering is by namespace, then value.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
  pub namespace: String,
  pub value:     String,
}

impl Identifier {
  pub fn new(namespace: impl Into<String>, value: impl Into<String>) -> Self {
    Self { namespace: namespace.into(), value: value.into() }
  }

  /// Parse `urn:<namespace>:<value>`.
  pub fn parse(s: &str) -> Result<Self> {
    let invalid = || Error::InvalidIdentifier(s.to_string());

    if s.chars().any(char::is_control) {
      return Err(invalid());
    }

    let mut parts = s.splitn(3, ':');
    let (Some(PREFIX), Some(namespace), Some(value)) =
      (parts.next(), parts.next(), parts.next())
    else {
      return Err(invalid());
    };
    if namespace.is_empty() {
      return Err(invalid());
    }

    Ok(Self::new(namespace, value))
  }

  /// Rejects identifiers that could never have been produced by [`parse`].
  ///
  /// [`parse`]: Identifier::parse
  pub fn validate(&self) -> Result<()> {
    if self.namespace.is_empty()
      || self.namespace.contains(':')
      || self.value.is_empty()
      || self.namespace.chars().any(char::is_control)
      || self.value.chars().any(char::is_control)
    {
      return Err(Error::InvalidIdentifier(self.to_string()));
    }
    Ok(())
  }

  pub fn is_in(&self, namespace: &str) -> bool { self.namespace == namespace }
}

impl fmt::Display for Identifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{PREFIX}:{}:{}", self.namespace, self.value)
  }
}

impl FromStr for Identifier {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl TryFrom<String> for Identifier {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { Self::parse(&s) }
}

impl From<Identifier> for String {
  fn from(id: Identifier) -> Self { id.to_string() }
}

// ─── Collections ─────────────────────────────────────────────────────────────

/// Sort by (namespace, value) and drop exact duplicates.
pub fn sort_identifiers(ids: &mut Vec<Identifier>) {
  ids.sort();
  ids.dedup();
}

/// All identifiers in `namespace`, in their existing order.
pub fn filter_by_namespace<'a>(
  ids: &'a [Identifier],
  namespace: &'a str,
) -> impl Iterator<Item = &'a Identifier> + 'a {
  ids.iter().filter(move |id| id.is_in(namespace))
}
