//! Organizational units and the parent edges between them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{
  identifier::{Identifier, filter_by_namespace, sort_identifiers},
  person::collapse_empty,
  temporal::{ValidityWindow, normalize_end_of_time},
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrganizationType {
  Department,
  Faculty,
  Campus,
  University,
  #[default]
  Organization,
}

// ─── OrganizationParent ──────────────────────────────────────────────────────

/// A time-bounded edge to a parent organization, by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationParent {
  pub parent_id:   Uuid,
  pub valid_from:  DateTime<Utc>,
  /// `None` is open-ended.
  #[serde(default)]
  pub valid_until: Option<DateTime<Utc>>,
}

impl OrganizationParent {
  pub fn new(
    parent_id: Uuid,
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
  ) -> Self {
    Self {
      parent_id,
      valid_from,
      valid_until: normalize_end_of_time(valid_until),
    }
  }

  pub fn window(&self) -> ValidityWindow {
    ValidityWindow::new(self.valid_from, self.valid_until)
  }

  pub fn valid_at(&self, now: DateTime<Utc>) -> bool {
    self.window().valid_at(now)
  }

  fn sort_key(&self) -> (DateTime<Utc>, Uuid, Option<DateTime<Utc>>) {
    (self.valid_from, self.parent_id, self.valid_until)
  }
}

// ─── Organization ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Organization {
  pub id:          Option<Uuid>,
  #[serde(rename = "type")]
  pub kind:        OrganizationType,
  /// Localized names keyed by language code (`dut`, `eng`, ...).
  pub names:       BTreeMap<String, String>,
  pub acronym:     Option<String>,
  pub identifiers: Vec<Identifier>,
  pub parents:     Vec<OrganizationParent>,
  pub created_at:  Option<DateTime<Utc>>,
  pub updated_at:  Option<DateTime<Utc>>,
}

impl Organization {
  pub fn is_stored(&self) -> bool { self.id.is_some() }

  pub fn name(&self, lang: &str) -> Option<&str> {
    self.names.get(lang).map(String::as_str)
  }

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

  pub fn add_parent(&mut self, parent: OrganizationParent) {
    self.parents.push(parent);
    sort_parents(&mut self.parents);
  }

  pub fn set_parents(&mut self, parents: Vec<OrganizationParent>) {
    self.parents = parents;
    sort_parents(&mut self.parents);
  }

  pub fn valid_parents_at(
    &self,
    now: DateTime<Utc>,
  ) -> impl Iterator<Item = &OrganizationParent> + '_ {
    self.parents.iter().filter(move |p| p.valid_at(now))
  }

  /// A department with exactly one valid parent edge at `now`.
  pub fn is_in_good_standing(&self, now: DateTime<Utc>) -> bool {
    self.kind == OrganizationType::Department
      && self.valid_parents_at(now).count() == 1
  }

  pub fn normalized(&self) -> Self {
    let mut org = self.clone();
    collapse_empty(&mut org.acronym);
    org.names.retain(|_, name| !name.is_empty());
    sort_identifiers(&mut org.identifiers);
    sort_parents(&mut org.parents);
    org
  }

  pub fn is_equivalent(&self, other: &Self) -> bool {
    self.normalized() == other.normalized()
  }
}

fn sort_parents(parents: &mut Vec<OrganizationParent>) {
  for p in parents.iter_mut() {
    p.valid_until = normalize_end_of_time(p.valid_until);
  }
  parents.sort_by_key(OrganizationParent::sort_key);
  parents.dedup();
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
  }

  fn department(parents: Vec<OrganizationParent>) -> Organization {
    let mut org =
      Organization { kind: OrganizationType::Department, ..Default::default() };
    org.set_parents(parents);
    org
  }

  #[test]
  fn type_parses_lowercase() {
    assert!("vakgroep".parse::<OrganizationType>().is_err());
    assert_eq!(
      "department".parse::<OrganizationType>().unwrap(),
      OrganizationType::Department
    );
    assert_eq!(OrganizationType::default().to_string(), "organization");
  }

  #[test]
  fn parents_sort_by_start_then_id() {
    let t = now();
    let late = OrganizationParent::new(Uuid::from_u128(1), t, None);
    let early_b =
      OrganizationParent::new(Uuid::from_u128(3), t - Duration::days(9), None);
    let early_a =
      OrganizationParent::new(Uuid::from_u128(2), t - Duration::days(9), None);
    let org = department(vec![late.clone(), early_b.clone(), early_a.clone()]);
    assert_eq!(org.parents, vec![early_a, early_b, late]);
  }

  #[test]
  fn good_standing_needs_exactly_one_valid_parent() {
    let t = now();
    let current = OrganizationParent::new(
      Uuid::from_u128(1),
      t - Duration::days(30),
      None,
    );
    let expired = OrganizationParent::new(
      Uuid::from_u128(2),
      t - Duration::days(60),
      Some(t - Duration::days(31)),
    );
    let other = OrganizationParent::new(
      Uuid::from_u128(3),
      t - Duration::days(10),
      None,
    );

    assert!(department(vec![current.clone(), expired.clone()])
      .is_in_good_standing(t));
    assert!(!department(vec![expired]).is_in_good_standing(t));
    assert!(!department(vec![current.clone(), other]).is_in_good_standing(t));

    let mut faculty = department(vec![current]);
    faculty.kind = OrganizationType::Faculty;
    assert!(!faculty.is_in_good_standing(t));
  }

  #[test]
  fn far_future_parent_end_is_open() {
    let edge = OrganizationParent::new(
      Uuid::nil(),
      now(),
      Some(Utc.with_ymd_and_hms(9999, 12, 31, 0, 0, 0).unwrap()),
    );
    assert_eq!(edge.valid_until, None);
  }

  #[test]
  fn equivalence_ignores_order_and_empty_names() {
    let mut a = Organization::default();
    a.names.insert("dut".into(), "Vakgroep".into());
    a.names.insert("eng".into(), String::new());
    a.identifiers =
      vec![Identifier::new("ugent_id", "X"), Identifier::new("gismo_id", "1")];

    let mut b = Organization::default();
    b.names.insert("dut".into(), "Vakgroep".into());
    b.acronym = Some(String::new());
    b.add_identifier(Identifier::new("gismo_id", "1"));
    b.add_identifier(Identifier::new("ugent_id", "X"));

    assert!(a.is_equivalent(&b));
  }
}
