//! The bundled [`SecretCipher`]: URL-safe base64, no encryption.
//!
//! Deployments that need encryption at rest supply their own cipher through
//! [`SqliteStore::with_cipher`](crate::SqliteStore::with_cipher).

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use people_core::{
  Error, Result,
  secret::{Secret, SecretCipher},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl SecretCipher for Base64Codec {
  fn seal(&self, _namespace: &str, secret: &Secret) -> Result<String> {
    Ok(URL_SAFE.encode(secret.expose()))
  }

  fn open(&self, namespace: &str, sealed: &str) -> Result<Secret> {
    let decryption_failed =
      || Error::SecretDecryption { namespace: namespace.to_string() };

    let bytes = URL_SAFE.decode(sealed).map_err(|_| decryption_failed())?;
    let plain = String::from_utf8(bytes).map_err(|_| decryption_failed())?;
    Ok(Secret::new(plain))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn seal_then_open() {
    let sealed = Base64Codec.seal("orcid_token", &Secret::new("abc/+?")).unwrap();
    assert!(!sealed.contains('/'));
    let opened = Base64Codec.open("orcid_token", &sealed).unwrap();
    assert_eq!(opened.expose(), "abc/+?");
  }

  #[test]
  fn garbage_names_the_namespace() {
    let err = Base64Codec.open("orcid_token", "%%%").unwrap_err();
    assert!(matches!(
      err,
      Error::SecretDecryption { namespace } if namespace == "orcid_token"
    ));
  }
}
