//! Secret values attached to people, and the seam through which they are
//! sealed before reaching storage.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

/// A plaintext secret token. `Debug` never shows the contents.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

  pub fn expose(&self) -> &str { &self.0 }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Secret(***)")
  }
}

/// Seals secrets on the way into storage and opens them on the way out.
///
/// `open` failures must surface as [`Error::SecretDecryption`] naming the
/// namespace; a secret that cannot be opened is never silently dropped.
///
/// [`Error::SecretDecryption`]: crate::Error::SecretDecryption
pub trait SecretCipher: Send + Sync {
  fn seal(&self, namespace: &str, secret: &Secret) -> Result<String>;

  fn open(&self, namespace: &str, sealed: &str) -> Result<Secret>;
}
