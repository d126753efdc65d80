//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, NaiveDate, Utc};
use people_core::{
  Identifier, Organization, OrganizationMembership, OrganizationParent,
  OrganizationType, Person,
  secret::{Secret, SecretCipher},
  store::{OrganizationStore, PersonStore},
};
use uuid::Uuid;

use crate::{Error, MAX_ACTIVE_BATCH, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn person(historic_id: &str) -> Person {
  let mut p = Person {
    active: true,
    name: Some("Alice Liddell".into()),
    given_name: Some("Alice".into()),
    family_name: Some("Liddell".into()),
    ..Default::default()
  };
  p.add_identifier(Identifier::new("historic_ugent_id", historic_id));
  p
}

// ─── People ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_person() {
  let s = store().await;

  let mut input = person("1");
  input.set_email(Some("Alice@UGent.be".into()));
  input.birth_date = NaiveDate::from_ymd_opt(1990, 4, 2);
  input.job_categories = vec!["ZAP".into(), "ATP".into()];
  input.settings.insert("lang".into(), "en".into());

  let created = s.create_person(input).await.unwrap();
  let id = created.id.expect("id assigned");
  assert!(created.created_at.is_some());
  assert!(created.updated_at.is_some());

  let fetched = s.get_person(id).await.unwrap().unwrap();
  assert_eq!(fetched, created);
  assert_eq!(fetched.email.as_deref(), Some("alice@ugent.be"));
  assert_eq!(fetched.birth_date, NaiveDate::from_ymd_opt(1990, 4, 2));
  assert_eq!(fetched.job_categories, ["ATP", "ZAP"]);
  assert_eq!(fetched.identifiers, vec![Identifier::new(
    "historic_ugent_id",
    "1"
  )]);
}

#[tokio::test]
async fn get_person_missing_returns_none() {
  let s = store().await;
  assert!(s.get_person(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn find_people_returns_each_owner_once() {
  let s = store().await;

  let mut a = person("1");
  a.add_identifier(Identifier::new("ugent_id", "A"));
  let a = s.create_person(a).await.unwrap();
  let b = s.create_person(person("1")).await.unwrap();
  s.create_person(person("2")).await.unwrap();

  let found = s
    .find_people_by_identifiers(vec![
      Identifier::new("historic_ugent_id", "1"),
      Identifier::new("ugent_id", "A"),
    ])
    .await
    .unwrap();

  let mut ids: Vec<Uuid> = found.iter().filter_map(|p| p.id).collect();
  ids.sort();
  let mut expected = vec![a.id.unwrap(), b.id.unwrap()];
  expected.sort();
  assert_eq!(ids, expected);

  assert!(s.find_people_by_identifiers(vec![]).await.unwrap().is_empty());
}

#[tokio::test]
async fn update_replaces_identifiers_and_bumps_updated_at() {
  let s = store().await;
  let mut p = s.create_person(person("1")).await.unwrap();
  let before = p.updated_at.unwrap();
  let created_at = p.created_at;

  p.set_identifiers(vec![
    Identifier::new("historic_ugent_id", "1"),
    Identifier::new("orcid", "0000-0001"),
  ]);
  p.family_name = Some("Pleasance".into());
  let updated = s.update_person(p).await.unwrap();

  assert_eq!(updated.identifiers.len(), 2);
  assert_eq!(updated.family_name.as_deref(), Some("Pleasance"));
  assert!(updated.updated_at.unwrap() >= before);
  assert_eq!(updated.created_at, created_at);

  let by_orcid = s
    .find_people_by_identifiers(vec![Identifier::new("orcid", "0000-0001")])
    .await
    .unwrap();
  assert_eq!(by_orcid.len(), 1);
}

#[tokio::test]
async fn update_unknown_person_fails() {
  let s = store().await;

  let err = s.update_person(person("1")).await.unwrap_err();
  assert!(matches!(err, Error::NotStored));

  let mut ghost = person("1");
  ghost.id = Some(Uuid::new_v4());
  let err = s.update_person(ghost).await.unwrap_err();
  assert!(matches!(err, Error::PersonNotFound(_)));
}

#[tokio::test]
async fn delete_person_cascades_identifiers() {
  let s = store().await;
  let p = s.create_person(person("1")).await.unwrap();
  let id = p.id.unwrap();

  s.delete_person(id).await.unwrap();
  assert!(s.get_person(id).await.unwrap().is_none());
  assert!(
    s.find_people_by_identifiers(vec![Identifier::new(
      "historic_ugent_id",
      "1"
    )])
    .await
    .unwrap()
    .is_empty()
  );

  let err = s.delete_person(id).await.unwrap_err();
  assert!(matches!(err, Error::PersonNotFound(_)));
}

#[tokio::test]
async fn transfer_moves_identifier_between_people() {
  let s = store().await;

  let mut dup = person("1");
  dup.add_identifier(Identifier::new("id", "durable"));
  let dup = s.create_person(dup).await.unwrap();
  let survivor = s.create_person(person("1")).await.unwrap();

  s.transfer_person_identifier(
    survivor.id.unwrap(),
    Identifier::new("id", "durable"),
  )
  .await
  .unwrap();

  let dup = s.get_person(dup.id.unwrap()).await.unwrap().unwrap();
  let survivor = s.get_person(survivor.id.unwrap()).await.unwrap().unwrap();
  assert!(!dup.has_identifier(&Identifier::new("id", "durable")));
  assert!(survivor.has_identifier(&Identifier::new("id", "durable")));

  let err = s
    .transfer_person_identifier(Uuid::new_v4(), Identifier::new("id", "x"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::PersonNotFound(_)));
}

#[tokio::test]
async fn active_flags_round_trip() {
  let s = store().await;
  let a = s.create_person(person("1")).await.unwrap().id.unwrap();
  let b = s.create_person(person("2")).await.unwrap().id.unwrap();

  s.set_people_active(false, vec![a]).await.unwrap();

  assert_eq!(s.list_active_person_ids(true).await.unwrap(), vec![b]);
  assert_eq!(s.list_active_person_ids(false).await.unwrap(), vec![a]);
}

#[tokio::test]
async fn set_people_active_rejects_oversized_batch() {
  let s = store().await;
  let ids: Vec<Uuid> =
    (0..=MAX_ACTIVE_BATCH).map(|_| Uuid::new_v4()).collect();

  let err = s.set_people_active(false, ids).await.unwrap_err();
  assert!(matches!(err, Error::BatchTooLarge { size, max }
    if size == MAX_ACTIVE_BATCH + 1 && max == MAX_ACTIVE_BATCH));

  let ids: Vec<Uuid> = (0..MAX_ACTIVE_BATCH).map(|_| Uuid::new_v4()).collect();
  s.set_people_active(false, ids).await.unwrap();
}

#[tokio::test]
async fn expire_people_flags_past_expiration_dates() {
  let s = store().await;
  let today = Utc::now().date_naive();

  let mut expired = person("1");
  expired.expiration_date = Some(today - Duration::days(1));
  let expired = s.create_person(expired).await.unwrap().id.unwrap();

  let mut due = person("2");
  due.expiration_date = Some(today);
  let due = s.create_person(due).await.unwrap().id.unwrap();

  let mut later = person("3");
  later.expiration_date = Some(today + Duration::days(30));
  let later = s.create_person(later).await.unwrap().id.unwrap();

  let forever = s.create_person(person("4")).await.unwrap().id.unwrap();

  assert_eq!(s.expire_people(today).await.unwrap(), 2);
  assert_eq!(s.expire_people(today).await.unwrap(), 0);

  let mut active = s.list_active_person_ids(true).await.unwrap();
  active.sort();
  let mut expected = vec![later, forever];
  expected.sort();
  assert_eq!(active, expected);
  assert!(!s.get_person(expired).await.unwrap().unwrap().active);
  assert!(!s.get_person(due).await.unwrap().unwrap().active);
}

// ─── Secrets ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn secrets_survive_storage() {
  let s = store().await;
  let mut p = person("1");
  p.secrets.insert("orcid_token".into(), Secret::new("t0ken"));

  let created = s.create_person(p).await.unwrap();
  assert_eq!(
    created.secrets.get("orcid_token").map(Secret::expose),
    Some("t0ken")
  );
}

struct BrokenCipher;

impl SecretCipher for BrokenCipher {
  fn seal(&self, _: &str, secret: &Secret) -> people_core::Result<String> {
    Ok(secret.expose().to_string())
  }

  fn open(&self, namespace: &str, _: &str) -> people_core::Result<Secret> {
    Err(people_core::Error::SecretDecryption {
      namespace: namespace.to_string(),
    })
  }
}

#[tokio::test]
async fn undecryptable_secret_is_an_error() {
  let s = store().await.with_cipher(BrokenCipher);
  let mut p = person("1");
  p.secrets.insert("orcid_token".into(), Secret::new("t0ken"));

  let err = s.create_person(p).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Core(people_core::Error::SecretDecryption { ref namespace })
      if namespace == "orcid_token"
  ));
}

// ─── Organizations ───────────────────────────────────────────────────────────

fn organization(gismo_id: &str) -> Organization {
  let mut org = Organization {
    kind: OrganizationType::Department,
    acronym: Some("TW06".into()),
    ..Default::default()
  };
  org.names.insert("dut".into(), "Vakgroep Informatica".into());
  org.add_identifier(Identifier::new("gismo_id", gismo_id));
  org
}

#[tokio::test]
async fn create_and_find_organization_with_parents() {
  let s = store().await;
  let parent = s.create_organization(organization("P")).await.unwrap();
  let parent_id = parent.id.unwrap();

  let since = Utc::now() - Duration::days(10);
  let mut child = organization("C");
  child.add_parent(OrganizationParent::new(parent_id, since, None));
  let child = s.create_organization(child).await.unwrap();

  let found = s
    .find_organizations_by_identifiers(vec![Identifier::new("gismo_id", "C")])
    .await
    .unwrap();
  assert_eq!(found.len(), 1);
  let found = &found[0];
  assert_eq!(found.id, child.id);
  assert_eq!(found.kind, OrganizationType::Department);
  assert_eq!(found.name("dut"), Some("Vakgroep Informatica"));
  assert_eq!(found.parents.len(), 1);
  assert_eq!(found.parents[0].parent_id, parent_id);
  assert_eq!(found.parents[0].valid_until, None);
  assert!(found.is_in_good_standing(Utc::now()));
}

#[tokio::test]
async fn update_and_delete_organization() {
  let s = store().await;
  let mut org = s.create_organization(organization("X")).await.unwrap();
  let id = org.id.unwrap();

  org.kind = OrganizationType::Faculty;
  org.acronym = None;
  let updated = s.update_organization(org).await.unwrap();
  assert_eq!(updated.kind, OrganizationType::Faculty);
  assert_eq!(updated.acronym, None);

  s.delete_organization(id).await.unwrap();
  assert!(s.get_organization(id).await.unwrap().is_none());
  let err = s.delete_organization(id).await.unwrap_err();
  assert!(matches!(err, Error::OrganizationNotFound(_)));
}

#[tokio::test]
async fn memberships_keep_their_created_at() {
  let s = store().await;
  let org = s.create_organization(organization("X")).await.unwrap();
  let org_id = org.id.unwrap();

  let mut p = person("1");
  p.add_organization_membership(OrganizationMembership::new(org_id));
  let p = s.create_person(p).await.unwrap();
  let first = p.organizations[0].created_at;
  assert!(first.is_some());

  let p = s.update_person(p).await.unwrap();
  assert_eq!(p.organizations[0].created_at, first);
}

#[tokio::test]
async fn deleting_an_organization_drops_memberships() {
  let s = store().await;
  let org = s.create_organization(organization("X")).await.unwrap();
  let org_id = org.id.unwrap();

  let mut p = person("1");
  p.add_organization_membership(OrganizationMembership::new(org_id));
  let p = s.create_person(p).await.unwrap();

  s.delete_organization(org_id).await.unwrap();
  let p = s.get_person(p.id.unwrap()).await.unwrap().unwrap();
  assert!(p.organizations.is_empty());
}
