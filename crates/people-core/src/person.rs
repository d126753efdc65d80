//! The canonical person record.
//!
//! A person carries identifiers contributed by every source that has ever
//! seen them, plus membership edges pointing at organizations by id. Every
//! collection is kept sorted so two records can be compared structurally.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  identifier::{Identifier, filter_by_namespace, sort_identifiers},
  secret::Secret,
};

// ─── Edges and attributes ────────────────────────────────────────────────────

/// A person's membership of one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationMembership {
  pub organization_id: Uuid,
  #[serde(default)]
  pub created_at:      Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at:      Option<DateTime<Utc>>,
}

impl OrganizationMembership {
  pub fn new(organization_id: Uuid) -> Self {
    Self { organization_id, created_at: None, updated_at: None }
  }
}

/// A free-form, scoped key/value pair. Written through the direct-write
/// path; scopes are claimed as a whole during merges.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Attribute {
  pub scope: String,
  pub key:   String,
  pub value: String,
}

impl Attribute {
  pub fn new(
    scope: impl Into<String>,
    key: impl Into<String>,
    value: impl Into<String>,
  ) -> Self {
    Self { scope: scope.into(), key: key.into(), value: value.into() }
  }
}

// ─── Person ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Person {
  /// Assigned by persistence on create; never changes afterwards.
  pub id:                    Option<Uuid>,
  pub active:                bool,
  /// Display name.
  pub name:                  Option<String>,
  pub given_name:            Option<String>,
  pub family_name:           Option<String>,
  pub preferred_name:        Option<String>,
  pub preferred_given_name:  Option<String>,
  pub preferred_family_name: Option<String>,
  pub honorific_prefix:      Option<String>,
  /// Lower-cased; write through [`Person::set_email`].
  pub email:                 Option<String>,
  pub birth_date:            Option<NaiveDate>,
  pub expiration_date:       Option<NaiveDate>,
  pub job_categories:        Vec<String>,
  pub roles:                 Vec<String>,
  pub object_classes:        Vec<String>,
  pub attributes:            Vec<Attribute>,
  pub settings:              BTreeMap<String, String>,
  #[serde(skip_serializing)]
  pub secrets:               BTreeMap<String, Secret>,
  pub identifiers:           Vec<Identifier>,
  pub organizations:         Vec<OrganizationMembership>,
  pub created_at:            Option<DateTime<Utc>>,
  pub updated_at:            Option<DateTime<Utc>>,
}

impl Person {
  pub fn is_stored(&self) -> bool { self.id.is_some() }

  /// Stores the address lower-cased.
  pub fn set_email(&mut self, email: Option<String>) {
    self.email = email.map(|e| e.to_lowercase());
  }

  // ── Identifiers ───────────────────────────────────────────────────────

  pub fn add_identifier(&mut self, id: Identifier) {
    self.identifiers.push(id);
    sort_identifiers(&mut self.identifiers);
  }

  pub fn set_identifiers(&mut self, ids: Vec<Identifier>) {
    self.identifiers = ids;
    sort_identifiers(&mut self.identifiers);
  }

  pub fn identifiers_by_namespace<'a>(
    &'a self,
    namespace: &'a str,
  ) -> impl Iterator<Item = &'a Identifier> + 'a {
    filter_by_namespace(&self.identifiers, namespace)
  }

  pub fn has_identifier(&self, id: &Identifier) -> bool {
    self.identifiers.contains(id)
  }

  // ── Memberships ───────────────────────────────────────────────────────

  /// No-op when a membership of that organization already exists.
  pub fn add_organization_membership(&mut self, m: OrganizationMembership) {
    match self
      .organizations
      .binary_search_by_key(&m.organization_id, |e| e.organization_id)
    {
      Ok(_) => {}
      Err(pos) => self.organizations.insert(pos, m),
    }
  }

  pub fn set_organization_memberships(
    &mut self,
    memberships: Vec<OrganizationMembership>,
  ) {
    self.organizations = Vec::with_capacity(memberships.len());
    for m in memberships {
      self.add_organization_membership(m);
    }
  }

  pub fn has_membership(&self, organization_id: Uuid) -> bool {
    self
      .organizations
      .binary_search_by_key(&organization_id, |e| e.organization_id)
      .is_ok()
  }

  // ── Comparison ────────────────────────────────────────────────────────

  /// A copy with empty strings collapsed to `None`, the email lower-cased
  /// and every collection sorted and de-duplicated.
  pub fn normalized(&self) -> Self {
    let mut p = self.clone();

    for field in [
      &mut p.name,
      &mut p.given_name,
      &mut p.family_name,
      &mut p.preferred_name,
      &mut p.preferred_given_name,
      &mut p.preferred_family_name,
      &mut p.honorific_prefix,
      &mut p.email,
    ] {
      collapse_empty(field);
    }
    p.email = p.email.map(|e| e.to_lowercase());

    for list in [&mut p.job_categories, &mut p.roles, &mut p.object_classes] {
      sort_strings(list);
    }
    p.attributes.sort();
    p.attributes.dedup();
    sort_identifiers(&mut p.identifiers);

    let memberships = std::mem::take(&mut p.organizations);
    p.set_organization_memberships(memberships);

    p
  }

  pub fn is_equivalent(&self, other: &Self) -> bool {
    self.normalized() == other.normalized()
  }
}

pub(crate) fn collapse_empty(field: &mut Option<String>) {
  if field.as_deref().is_some_and(str::is_empty) {
    *field = None;
  }
}

/// Sort and de-duplicate a list of strings, dropping empty entries.
pub fn sort_strings(list: &mut Vec<String>) {
  list.retain(|s| !s.is_empty());
  list.sort();
  list.dedup();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn email_is_lowercased() {
    let mut p = Person::default();
    p.set_email(Some("Jane.Doe@UGent.be".into()));
    assert_eq!(p.email.as_deref(), Some("jane.doe@ugent.be"));
  }

  #[test]
  fn identifiers_stay_sorted() {
    let mut p = Person::default();
    p.add_identifier(Identifier::new("ugent_id", "2"));
    p.add_identifier(Identifier::new("orcid", "1"));
    p.add_identifier(Identifier::new("ugent_id", "2"));
    assert_eq!(p.identifiers, vec![
      Identifier::new("orcid", "1"),
      Identifier::new("ugent_id", "2"),
    ]);
    assert_eq!(p.identifiers_by_namespace("ugent_id").count(), 1);
  }

  #[test]
  fn one_membership_per_organization() {
    let a = Uuid::from_u128(2);
    let b = Uuid::from_u128(1);
    let mut p = Person::default();
    p.set_organization_memberships(vec![
      OrganizationMembership::new(a),
      OrganizationMembership::new(b),
      OrganizationMembership::new(a),
    ]);
    let ids: Vec<Uuid> =
      p.organizations.iter().map(|m| m.organization_id).collect();
    assert_eq!(ids, vec![b, a]);
  }

  #[test]
  fn equivalence_ignores_ordering_and_empty_strings() {
    let mut a = Person {
      name: Some("Jane".into()),
      preferred_name: Some(String::new()),
      job_categories: vec!["b".into(), "a".into()],
      ..Default::default()
    };
    a.set_email(Some("J@X.BE".into()));

    let mut b = Person {
      name: Some("Jane".into()),
      job_categories: vec!["a".into(), "b".into(), "a".into()],
      ..Default::default()
    };
    b.set_email(Some("j@x.be".into()));

    assert!(a.is_equivalent(&b));

    b.family_name = Some("Doe".into());
    assert!(!a.is_equivalent(&b));
  }

  #[test]
  fn clone_is_independent() {
    let mut original = Person::default();
    original.add_identifier(Identifier::new("orcid", "1"));
    let mut copy = original.clone();
    copy.add_identifier(Identifier::new("orcid", "2"));
    assert_eq!(original.identifiers.len(), 1);
    assert_eq!(copy.identifiers.len(), 2);
  }

  #[test]
  fn secrets_are_not_serialized() {
    let mut p = Person::default();
    p.secrets.insert("orcid_token".into(), Secret::new("t0ken"));
    let json = serde_json::to_string(&p).unwrap();
    assert!(!json.contains("t0ken"));
    assert!(!json.contains("secrets"));
  }
}
