//! Record matching and merge: one incoming candidate in, one canonical
//! survivor out.
//!
//! Every feed goes through [`reconcile`]; the [`MergePolicy`] decides which
//! identifiers are match keys, which namespaces survive a merge and how
//! scalar fields are combined.

use std::{
  cmp::Ordering,
  collections::{BTreeMap, BTreeSet},
};

use people_core::{
  Error, Identifier, MergePolicy, Person, Result,
  policy::{FieldMerge, IdentityField},
  store::PersonStore,
};
use tracing::{debug, info};
use uuid::Uuid;

/// The outcome of reconciling one candidate.
#[derive(Debug, Clone)]
pub struct Reconciled {
  /// The survivor as persisted (or as already stored when unchanged).
  pub person:      Person,
  pub was_created: bool,
  /// `false` when no write was issued.
  pub changed:     bool,
}

/// Match `candidate` against the store and fold it into a single survivor.
///
/// Duplicates sharing a match key are consolidated onto the most recently
/// updated record and deleted.
pub async fn reconcile<S: PersonStore>(
  store: &S,
  candidate: Person,
  policy: &MergePolicy,
) -> Result<Reconciled> {
  for id in &candidate.identifiers {
    id.validate()?;
  }

  let keys = policy.match_keys(&candidate.identifiers);
  let mut matches = if keys.is_empty() {
    Vec::new()
  } else {
    store
      .find_people_by_identifiers(keys)
      .await
      .map_err(Error::persistence)?
  };

  if matches.is_empty() {
    return create(store, candidate, policy).await;
  }

  matches.sort_by(newest_first);
  matches.dedup_by_key(|p| p.id);
  let mut survivor = matches.remove(0);
  let mut duplicates = matches;
  let consolidated = !duplicates.is_empty();
  let survivor_id = stored_id(&survivor)?;
  let snapshot = survivor.clone();

  // ── Consolidate duplicates ─────────────────────────────────────────────
  for dup in &duplicates {
    let dup_id = stored_id(dup)?;
    for id in &dup.identifiers {
      if policy.is_durable(id) {
        store
          .transfer_person_identifier(survivor_id, id.clone())
          .await
          .map_err(Error::persistence)?;
        survivor.add_identifier(id.clone());
      } else if policy.is_preserved(id) && !survivor.has_identifier(id) {
        survivor.add_identifier(id.clone());
      }
    }
    store.delete_person(dup_id).await.map_err(Error::persistence)?;
    info!(survivor = %survivor_id, duplicate = %dup_id, "merged duplicate person");
  }

  // ── Field merge ────────────────────────────────────────────────────────
  match policy.field_merge {
    FieldMerge::FeedAuthoritative => {
      merge_feed_authoritative(&mut survivor, candidate, policy)
    }
    FieldMerge::NewestWins => {
      // older records, newest first, for fallbacks
      let mut history = vec![snapshot.clone()];
      history.append(&mut duplicates);
      merge_newest_wins(&mut survivor, candidate, &history, policy)
    }
  }

  if !consolidated && survivor.is_equivalent(&snapshot) {
    debug!(person = %survivor_id, "person unchanged");
    return Ok(Reconciled {
      person:      snapshot,
      was_created: false,
      changed:     false,
    });
  }

  let person = store
    .update_person(survivor)
    .await
    .map_err(Error::persistence)?;
  debug!(person = %survivor_id, "updated person");
  Ok(Reconciled { person, was_created: false, changed: true })
}

async fn create<S: PersonStore>(
  store: &S,
  mut candidate: Person,
  policy: &MergePolicy,
) -> Result<Reconciled> {
  if !candidate.identifiers.iter().any(|id| policy.is_durable(id)) {
    candidate.add_identifier(Identifier::new(
      &policy.durable_namespace,
      Uuid::new_v4().to_string(),
    ));
  }
  candidate.id = None;

  let person = store
    .create_person(candidate)
    .await
    .map_err(Error::persistence)?;
  debug!(person = ?person.id, "created person");
  Ok(Reconciled { person, was_created: true, changed: true })
}

fn stored_id(person: &Person) -> Result<Uuid> {
  person.id.ok_or_else(|| Error::UnresolvedReference {
    reference: person
      .identifiers
      .first()
      .map(ToString::to_string)
      .unwrap_or_default(),
    reason:    "matched person has no id".into(),
  })
}

/// `updated_at` descending, then `created_at` descending, then id.
fn newest_first(a: &Person, b: &Person) -> Ordering {
  b.updated_at
    .cmp(&a.updated_at)
    .then_with(|| b.created_at.cmp(&a.created_at))
    .then_with(|| a.id.cmp(&b.id))
}

// ─── Field merge strategies ──────────────────────────────────────────────────

fn merge_feed_authoritative(
  survivor: &mut Person,
  candidate: Person,
  policy: &MergePolicy,
) {
  let kept: Vec<Identifier> = survivor
    .identifiers
    .iter()
    .filter(|id| policy.is_durable(id) || policy.is_preserved(id))
    .cloned()
    .collect();

  // fields the feed does not own belong to whichever source set them
  let owns = |field| policy.owns(field);
  if owns(IdentityField::Active) {
    survivor.active = candidate.active;
  }
  if owns(IdentityField::Name) {
    survivor.name = candidate.name;
  }
  if owns(IdentityField::GivenName) {
    survivor.given_name = candidate.given_name;
  }
  if owns(IdentityField::FamilyName) {
    survivor.family_name = candidate.family_name;
  }
  if owns(IdentityField::PreferredGivenName) {
    survivor.preferred_given_name = candidate.preferred_given_name;
  }
  if owns(IdentityField::PreferredFamilyName) {
    survivor.preferred_family_name = candidate.preferred_family_name;
  }
  if owns(IdentityField::HonorificPrefix) {
    survivor.honorific_prefix = candidate.honorific_prefix;
  }
  if owns(IdentityField::Email) {
    survivor.set_email(candidate.email);
  }
  if owns(IdentityField::BirthDate) {
    survivor.birth_date = candidate.birth_date;
  }
  if owns(IdentityField::ExpirationDate) {
    survivor.expiration_date = candidate.expiration_date;
  }
  if owns(IdentityField::JobCategories) {
    survivor.job_categories = candidate.job_categories;
  }
  if owns(IdentityField::ObjectClasses) {
    survivor.object_classes = candidate.object_classes;
  }

  let mut identifiers = candidate.identifiers;
  identifiers.extend(kept);
  survivor.set_identifiers(identifiers);

  for m in candidate.organizations {
    survivor.add_organization_membership(m);
  }
}

/// `history` holds the survivor as stored followed by the deleted
/// duplicates, newest first.
fn merge_newest_wins(
  survivor: &mut Person,
  candidate: Person,
  history: &[Person],
  policy: &MergePolicy,
) {
  let preferred = if has_preferred_name(&candidate) {
    Some(&candidate)
  } else {
    history.iter().find(|p| has_preferred_name(p))
  };
  if let Some(source) = preferred {
    survivor.preferred_name = source.preferred_name.clone();
    survivor.preferred_given_name = source.preferred_given_name.clone();
    survivor.preferred_family_name = source.preferred_family_name.clone();
  }

  // attributes: a scope belongs to the newest record that has it
  let mut claimed = BTreeSet::new();
  let mut attributes = Vec::new();
  for source in std::iter::once(&candidate).chain(history) {
    let scopes: BTreeSet<&str> =
      source.attributes.iter().map(|a| a.scope.as_str()).collect();
    attributes.extend(
      source
        .attributes
        .iter()
        .filter(|a| !claimed.contains(a.scope.as_str()))
        .cloned(),
    );
    claimed.extend(scopes);
  }

  let mut settings = BTreeMap::new();
  let mut secrets = BTreeMap::new();
  for source in history.iter().rev().chain(std::iter::once(&candidate)) {
    settings.extend(source.settings.clone());
    secrets.extend(source.secrets.clone());
  }

  let kept: Vec<Identifier> = survivor
    .identifiers
    .iter()
    .filter(|id| policy.is_durable(id) || policy.is_preserved(id))
    .cloned()
    .collect();
  let mut identifiers = candidate.identifiers.clone();
  identifiers.extend(kept);

  survivor.active = candidate.active;
  survivor.name = candidate.name;
  survivor.given_name = candidate.given_name;
  survivor.family_name = candidate.family_name;
  survivor.honorific_prefix = candidate.honorific_prefix;
  survivor.set_email(candidate.email);
  survivor.birth_date = candidate.birth_date;
  survivor.expiration_date = candidate.expiration_date;
  survivor.job_categories = candidate.job_categories;
  survivor.roles = candidate.roles;
  survivor.object_classes = candidate.object_classes;
  survivor.attributes = attributes;
  survivor.settings = settings;
  survivor.secrets = secrets;
  survivor.set_identifiers(identifiers);

  for m in candidate.organizations {
    survivor.add_organization_membership(m);
  }
}

fn has_preferred_name(p: &Person) -> bool {
  [
    &p.preferred_name,
    &p.preferred_given_name,
    &p.preferred_family_name,
  ]
  .into_iter()
  .any(|name| name.as_deref().is_some_and(|n| !n.is_empty()))
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use people_core::{
    OrganizationMembership,
    identifier::ns,
    person::Attribute,
    store::OrganizationStore,
  };
  use people_store_sqlite::SqliteStore;

  use super::*;

  fn employee(historic: &str, name: &str) -> Person {
    let mut p = Person { active: true, name: Some(name.into()), ..Default::default() };
    p.set_identifiers(vec![
      Identifier::new(ns::HISTORIC_UGENT_ID, historic),
      Identifier::new(ns::UGENT_USERNAME, name.to_lowercase()),
    ]);
    p
  }

  async fn store() -> SqliteStore { SqliteStore::open_in_memory().await.unwrap() }

  fn durable_ids(p: &Person) -> Vec<&Identifier> {
    p.identifiers_by_namespace(ns::DURABLE).collect()
  }

  #[tokio::test]
  async fn new_candidate_is_created_with_durable_id() {
    let store = store().await;
    let out = reconcile(&store, employee("H1", "Alice"), &MergePolicy::directory_feed())
      .await
      .unwrap();

    assert!(out.was_created);
    assert!(out.changed);
    assert!(out.person.is_stored());
    assert_eq!(durable_ids(&out.person).len(), 1);
  }

  #[tokio::test]
  async fn reconciling_twice_is_idempotent() {
    let store = store().await;
    let policy = MergePolicy::directory_feed();
    let first = reconcile(&store, employee("H1", "Alice"), &policy).await.unwrap();
    let second = reconcile(&store, employee("H1", "Alice"), &policy).await.unwrap();

    assert!(!second.was_created);
    assert!(!second.changed);
    assert_eq!(second.person.id, first.person.id);
    assert_eq!(second.person.identifiers, first.person.identifiers);
  }

  #[tokio::test]
  async fn duplicates_converge_onto_one_survivor() {
    let store = store().await;
    let mut a = employee("H1", "Alice");
    a.add_identifier(Identifier::new(ns::DURABLE, "aaa"));
    a.add_identifier(Identifier::new(ns::ORCID, "0000-0001"));
    let mut b = employee("H1", "Alice");
    b.add_identifier(Identifier::new(ns::DURABLE, "bbb"));
    store.create_person(a).await.unwrap();
    store.create_person(b).await.unwrap();

    let out = reconcile(&store, employee("H1", "Alice B."), &MergePolicy::directory_feed())
      .await
      .unwrap();
    assert!(out.changed);

    let all = store
      .find_people_by_identifiers(vec![Identifier::new(ns::HISTORIC_UGENT_ID, "H1")])
      .await
      .unwrap();
    assert_eq!(all.len(), 1);
    let survivor = &all[0];
    assert_eq!(survivor.name.as_deref(), Some("Alice B."));
    assert!(survivor.has_identifier(&Identifier::new(ns::DURABLE, "aaa")));
    assert!(survivor.has_identifier(&Identifier::new(ns::DURABLE, "bbb")));
    assert!(survivor.has_identifier(&Identifier::new(ns::ORCID, "0000-0001")));

    for durable in ["aaa", "bbb"] {
      let found = store
        .find_people_by_identifiers(vec![Identifier::new(ns::DURABLE, durable)])
        .await
        .unwrap();
      assert_eq!(found.len(), 1);
      assert_eq!(found[0].id, survivor.id);
    }
  }

  #[tokio::test]
  async fn feed_overwrites_identity_but_keeps_local_data() {
    let store = store().await;
    let policy = MergePolicy::directory_feed();
    let mut stored = employee("H1", "Alice");
    stored.add_identifier(Identifier::new(ns::GISMO_ID, "G1"));
    stored.add_identifier(Identifier::new(ns::UGENT_BARCODE, "OLD"));
    stored.roles = vec!["admin".into()];
    stored.preferred_name = Some("Al".into());
    stored.settings.insert("theme".into(), "dark".into());
    let stored = store.create_person(stored).await.unwrap();

    let mut candidate = employee("H1", "Alice Smith");
    candidate.set_email(Some("Alice@Example.org".into()));
    let out = reconcile(&store, candidate, &policy).await.unwrap();

    let p = out.person;
    assert_eq!(p.id, stored.id);
    assert_eq!(p.name.as_deref(), Some("Alice Smith"));
    assert_eq!(p.email.as_deref(), Some("alice@example.org"));
    assert_eq!(p.preferred_name.as_deref(), Some("Al"));
    assert_eq!(p.roles, vec!["admin".to_string()]);
    assert_eq!(p.settings.get("theme").map(String::as_str), Some("dark"));
    assert!(p.has_identifier(&Identifier::new(ns::GISMO_ID, "G1")));
    assert!(!p.has_identifier(&Identifier::new(ns::UGENT_BARCODE, "OLD")));
  }

  #[tokio::test]
  async fn feeds_keep_fields_owned_by_the_other_feed() {
    let store = store().await;
    let mut staff = employee("H1", "Alice");
    staff.preferred_given_name = Some("Ali".into());
    reconcile(&store, staff.clone(), &MergePolicy::directory_feed())
      .await
      .unwrap();

    let mut student = employee("H1", "Alice");
    student.expiration_date = NaiveDate::from_ymd_opt(2030, 1, 1);
    let out = reconcile(&store, student, &MergePolicy::student_feed())
      .await
      .unwrap();
    assert!(out.changed);
    assert_eq!(out.person.preferred_given_name.as_deref(), Some("Ali"));
    assert_eq!(out.person.expiration_date, NaiveDate::from_ymd_opt(2030, 1, 1));

    let out = reconcile(&store, staff, &MergePolicy::directory_feed())
      .await
      .unwrap();
    assert!(!out.changed);
    assert_eq!(out.person.expiration_date, NaiveDate::from_ymd_opt(2030, 1, 1));
  }

  #[tokio::test]
  async fn memberships_are_additive() {
    let store = store().await;
    let policy = MergePolicy::directory_feed();
    let org_a = store
      .create_organization(Default::default())
      .await
      .unwrap()
      .id
      .unwrap();
    let org_b = store
      .create_organization(Default::default())
      .await
      .unwrap()
      .id
      .unwrap();

    let mut first = employee("H1", "Alice");
    first.add_organization_membership(OrganizationMembership::new(org_a));
    reconcile(&store, first, &policy).await.unwrap();

    let mut second = employee("H1", "Alice");
    second.add_organization_membership(OrganizationMembership::new(org_b));
    let out = reconcile(&store, second, &policy).await.unwrap();

    assert!(out.person.has_membership(org_a));
    assert!(out.person.has_membership(org_b));
  }

  #[tokio::test]
  async fn invalid_candidate_identifier_is_rejected() {
    let store = store().await;
    let mut candidate = employee("H1", "Alice");
    candidate.identifiers.push(Identifier::new("", "x"));

    let err = reconcile(&store, candidate, &MergePolicy::directory_feed())
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));
  }

  #[tokio::test]
  async fn direct_write_falls_back_to_stored_preferred_names() {
    let store = store().await;
    let policy = MergePolicy::direct_write();
    let mut stored = employee("H1", "Alice");
    stored.preferred_given_name = Some("Ali".into());
    stored.attributes = vec![
      Attribute::new("biblio", "role", "curator"),
      Attribute::new("orcid", "verified", "yes"),
    ];
    stored.settings.insert("lang".into(), "nl".into());
    reconcile(&store, stored, &policy).await.unwrap();

    let mut candidate = employee("H1", "Alice");
    candidate.attributes = vec![Attribute::new("biblio", "role", "user")];
    candidate.settings.insert("theme".into(), "light".into());
    let out = reconcile(&store, candidate, &policy).await.unwrap();

    let p = out.person;
    assert_eq!(p.preferred_given_name.as_deref(), Some("Ali"));
    let mut attrs = p.attributes.clone();
    attrs.sort();
    assert_eq!(attrs, vec![
      Attribute::new("biblio", "role", "user"),
      Attribute::new("orcid", "verified", "yes"),
    ]);
    assert_eq!(p.settings.len(), 2);
  }

  #[tokio::test]
  async fn direct_write_uses_candidate_preferred_names_when_given() {
    let store = store().await;
    let policy = MergePolicy::direct_write();
    let mut stored = employee("H1", "Alice");
    stored.preferred_given_name = Some("Ali".into());
    stored.preferred_family_name = Some("S.".into());
    reconcile(&store, stored, &policy).await.unwrap();

    let mut candidate = employee("H1", "Alice");
    candidate.preferred_name = Some("Alice S".into());
    let out = reconcile(&store, candidate, &policy).await.unwrap();

    assert_eq!(out.person.preferred_name.as_deref(), Some("Alice S"));
    assert_eq!(out.person.preferred_given_name, None);
    assert_eq!(out.person.preferred_family_name, None);
  }
}
