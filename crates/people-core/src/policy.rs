//! The knobs that distinguish one reconciliation flavour from another.
//!
//! Directory sweeps, student imports, direct writes and the organization
//! feed all run the same merge algorithm; what differs is captured here.

use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

use crate::identifier::{Identifier, ns};

/// Which candidate identifiers are used to look up existing records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOn {
  /// Only identifiers in this namespace.
  Namespace(String),
  AllIdentifiers,
}

/// How candidate fields combine with the survivor's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMerge {
  /// The source owns the identity fields it emits; everything it does not
  /// emit stays with the survivor.
  FeedAuthoritative,
  /// The candidate overwrites, with preferred names and attribute scopes
  /// falling back to older records.
  NewestWins,
}

/// A scalar identity field a feed can be authoritative for.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
  Active,
  Name,
  GivenName,
  FamilyName,
  PreferredGivenName,
  PreferredFamilyName,
  HonorificPrefix,
  Email,
  BirthDate,
  ExpirationDate,
  JobCategories,
  ObjectClasses,
}

/// What to do with a reference that cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReferences {
  /// Drop the reference and carry on with the item.
  Skip,
  /// Fail the item.
  Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
  pub match_on:              MatchOn,
  pub field_merge:           FieldMerge,
  /// Namespace of the durable self-identifier minted on create.
  pub durable_namespace:     String,
  /// Namespaces the survivor keeps even when a source never mentions them.
  pub preserved_namespaces:  Vec<String>,
  /// Fields a `FeedAuthoritative` merge overwrites; the survivor keeps the
  /// rest.
  pub authoritative_fields:  Vec<IdentityField>,
  pub unresolved_references: UnresolvedReferences,
}

impl MergePolicy {
  /// Employee directory sweep keyed on the historic id. The employee
  /// directory carries no expiration date.
  pub fn directory_feed() -> Self {
    Self {
      match_on:              MatchOn::Namespace(
        ns::HISTORIC_UGENT_ID.to_string(),
      ),
      field_merge:           FieldMerge::FeedAuthoritative,
      durable_namespace:     ns::DURABLE.to_string(),
      preserved_namespaces:  default_preserved_namespaces(),
      authoritative_fields:  all_fields_except(&[IdentityField::ExpirationDate]),
      unresolved_references: UnresolvedReferences::Skip,
    }
  }

  /// Student import. Same keys as the employee sweep; students have no
  /// separate preferred names.
  pub fn student_feed() -> Self {
    Self {
      authoritative_fields: all_fields_except(&[
        IdentityField::PreferredGivenName,
        IdentityField::PreferredFamilyName,
      ]),
      ..Self::directory_feed()
    }
  }

  pub fn direct_write() -> Self {
    Self {
      match_on: MatchOn::AllIdentifiers,
      field_merge: FieldMerge::NewestWins,
      authoritative_fields: IdentityField::iter().collect(),
      ..Self::directory_feed()
    }
  }

  /// Organization feed: parents that cannot be resolved fail the message.
  pub fn organization_feed() -> Self {
    Self {
      match_on: MatchOn::Namespace(ns::GISMO_ID.to_string()),
      unresolved_references: UnresolvedReferences::Fatal,
      ..Self::directory_feed()
    }
  }

  pub fn with_durable_namespace(mut self, namespace: impl Into<String>) -> Self {
    self.durable_namespace = namespace.into();
    self
  }

  pub fn with_preserved_namespaces(mut self, namespaces: Vec<String>) -> Self {
    self.preserved_namespaces = namespaces;
    self
  }

  /// The candidate identifiers used as lookup keys.
  pub fn match_keys(&self, ids: &[Identifier]) -> Vec<Identifier> {
    ids
      .iter()
      .filter(|id| match &self.match_on {
        MatchOn::Namespace(namespace) => id.is_in(namespace),
        MatchOn::AllIdentifiers => true,
      })
      .cloned()
      .collect()
  }

  pub fn owns(&self, field: IdentityField) -> bool {
    self.authoritative_fields.contains(&field)
  }

  pub fn is_durable(&self, id: &Identifier) -> bool {
    id.is_in(&self.durable_namespace)
  }

  pub fn is_preserved(&self, id: &Identifier) -> bool {
    self.preserved_namespaces.iter().any(|ns| id.is_in(ns))
  }
}

pub fn default_preserved_namespaces() -> Vec<String> {
  [ns::ORCID, ns::GISMO_ID, ns::UGENT_MEMORIALIS_ID]
    .into_iter()
    .map(String::from)
    .collect()
}

fn all_fields_except(excluded: &[IdentityField]) -> Vec<IdentityField> {
  IdentityField::iter().filter(|f| !excluded.contains(f)).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn feed_matches_on_single_namespace() {
    let ids = vec![
      Identifier::new("historic_ugent_id", "1"),
      Identifier::new("ugent_id", "2"),
    ];
    let keys = MergePolicy::directory_feed().match_keys(&ids);
    assert_eq!(keys, vec![Identifier::new("historic_ugent_id", "1")]);
    assert_eq!(MergePolicy::direct_write().match_keys(&ids), ids);
  }

  #[test]
  fn preserved_namespaces_are_configurable() {
    let policy = MergePolicy::directory_feed()
      .with_preserved_namespaces(vec!["orcid".into()]);
    assert!(policy.is_preserved(&Identifier::new("orcid", "x")));
    assert!(!policy.is_preserved(&Identifier::new("gismo_id", "x")));
  }

  #[test]
  fn feeds_own_only_the_fields_they_emit() {
    let employees = MergePolicy::directory_feed();
    assert!(employees.owns(IdentityField::PreferredGivenName));
    assert!(!employees.owns(IdentityField::ExpirationDate));

    let students = MergePolicy::student_feed();
    assert!(students.owns(IdentityField::ExpirationDate));
    assert!(!students.owns(IdentityField::PreferredFamilyName));
    assert!(students.owns(IdentityField::GivenName));
  }
}
