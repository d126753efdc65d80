//! [`SqliteStore`]: the SQLite implementation of [`PersonStore`] and
//! [`OrganizationStore`].

use std::{path::Path, sync::Arc};

use chrono::{NaiveDate, Utc};
use people_core::{
  Identifier, Organization, Person,
  secret::SecretCipher,
  store::{OrganizationStore, PersonStore},
};
use rusqlite::OptionalExtension as _;
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    RawMembership, RawOrganization, RawParent, RawPerson, encode_date,
    encode_dt, encode_uuid,
  },
  schema::SCHEMA,
  secret::Base64Codec,
};

/// Upper bound on the ids accepted by one
/// [`set_people_active`](PersonStore::set_people_active) call.
pub const MAX_ACTIVE_BATCH: usize = 500;

const PERSON_COLUMNS: &str = "person_id, active, name, given_name, \
  family_name, preferred_name, preferred_given_name, preferred_family_name, \
  honorific_prefix, email, birth_date, expiration_date, job_categories, \
  roles, object_classes, attributes, settings, secrets, created_at, \
  updated_at";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A people registry backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:   tokio_rusqlite::Connection,
  cipher: Arc<dyn SecretCipher>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  /// Replace the secret cipher. Secrets already sealed with another cipher
  /// will fail to open.
  pub fn with_cipher(mut self, cipher: impl SecretCipher + 'static) -> Self {
    self.cipher = Arc::new(cipher);
    self
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn, cipher: Arc::new(Base64Codec) })
  }
}

// ─── Row access ──────────────────────────────────────────────────────────────

fn read_person(
  conn: &rusqlite::Connection,
  id: &str,
) -> rusqlite::Result<Option<RawPerson>> {
  let raw = conn
    .query_row(
      &format!("SELECT {PERSON_COLUMNS} FROM people WHERE person_id = ?1"),
      rusqlite::params![id],
      |row| {
        Ok(RawPerson {
          person_id:             row.get(0)?,
          active:                row.get(1)?,
          name:                  row.get(2)?,
          given_name:            row.get(3)?,
          family_name:           row.get(4)?,
          preferred_name:        row.get(5)?,
          preferred_given_name:  row.get(6)?,
          preferred_family_name: row.get(7)?,
          honorific_prefix:      row.get(8)?,
          email:                 row.get(9)?,
          birth_date:            row.get(10)?,
          expiration_date:       row.get(11)?,
          job_categories:        row.get(12)?,
          roles:                 row.get(13)?,
          object_classes:        row.get(14)?,
          attributes:            row.get(15)?,
          settings:              row.get(16)?,
          secrets:               row.get(17)?,
          created_at:            row.get(18)?,
          updated_at:            row.get(19)?,
          identifiers:           Vec::new(),
          organizations:         Vec::new(),
        })
      },
    )
    .optional()?;

  let Some(mut raw) = raw else {
    return Ok(None);
  };

  let mut stmt = conn.prepare(
    "SELECT namespace, value FROM person_identifiers WHERE person_id = ?1",
  )?;
  raw.identifiers = stmt
    .query_map(rusqlite::params![id], |r| Ok((r.get(0)?, r.get(1)?)))?
    .collect::<rusqlite::Result<_>>()?;

  let mut stmt = conn.prepare(
    "SELECT organization_id, created_at, updated_at
     FROM person_organizations WHERE person_id = ?1",
  )?;
  raw.organizations = stmt
    .query_map(rusqlite::params![id], |r| {
      Ok(RawMembership {
        organization_id: r.get(0)?,
        created_at:      r.get(1)?,
        updated_at:      r.get(2)?,
      })
    })?
    .collect::<rusqlite::Result<_>>()?;

  Ok(Some(raw))
}

/// Insert or overwrite the `people` row, then replace its child rows.
/// Returns `false` when `must_exist` is set and there was no row to update.
fn write_person(
  tx: &rusqlite::Transaction<'_>,
  raw: &RawPerson,
  must_exist: bool,
) -> rusqlite::Result<bool> {
  let values: [&dyn rusqlite::ToSql; 20] = [
    &raw.person_id,
    &raw.active,
    &raw.name,
    &raw.given_name,
    &raw.family_name,
    &raw.preferred_name,
    &raw.preferred_given_name,
    &raw.preferred_family_name,
    &raw.honorific_prefix,
    &raw.email,
    &raw.birth_date,
    &raw.expiration_date,
    &raw.job_categories,
    &raw.roles,
    &raw.object_classes,
    &raw.attributes,
    &raw.settings,
    &raw.secrets,
    &raw.created_at,
    &raw.updated_at,
  ];

  if must_exist {
    let n = tx.execute(
      "UPDATE people SET
         active = ?2, name = ?3, given_name = ?4, family_name = ?5,
         preferred_name = ?6, preferred_given_name = ?7,
         preferred_family_name = ?8, honorific_prefix = ?9, email = ?10,
         birth_date = ?11, expiration_date = ?12, job_categories = ?13,
         roles = ?14, object_classes = ?15, attributes = ?16,
         settings = ?17, secrets = ?18, updated_at = ?20
       WHERE person_id = ?1",
      &values[..],
    )?;
    if n == 0 {
      return Ok(false);
    }
  } else {
    tx.execute(
      &format!(
        "INSERT INTO people ({PERSON_COLUMNS}) VALUES (
           ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
           ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
         )"
      ),
      &values[..],
    )?;
  }

  tx.execute(
    "DELETE FROM person_identifiers WHERE person_id = ?1",
    rusqlite::params![raw.person_id],
  )?;
  let mut stmt = tx.prepare(
    "INSERT INTO person_identifiers (person_id, namespace, value)
     VALUES (?1, ?2, ?3)",
  )?;
  for (namespace, value) in &raw.identifiers {
    stmt.execute(rusqlite::params![raw.person_id, namespace, value])?;
  }

  tx.execute(
    "DELETE FROM person_organizations WHERE person_id = ?1",
    rusqlite::params![raw.person_id],
  )?;
  let mut stmt = tx.prepare(
    "INSERT INTO person_organizations
       (person_id, organization_id, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4)",
  )?;
  for m in &raw.organizations {
    stmt.execute(rusqlite::params![
      raw.person_id,
      m.organization_id,
      m.created_at,
      m.updated_at,
    ])?;
  }

  Ok(true)
}

fn read_organization(
  conn: &rusqlite::Connection,
  id: &str,
) -> rusqlite::Result<Option<RawOrganization>> {
  let raw = conn
    .query_row(
      "SELECT organization_id, type, names, acronym, created_at, updated_at
       FROM organizations WHERE organization_id = ?1",
      rusqlite::params![id],
      |row| {
        Ok(RawOrganization {
          organization_id: row.get(0)?,
          kind:            row.get(1)?,
          names:           row.get(2)?,
          acronym:         row.get(3)?,
          created_at:      row.get(4)?,
          updated_at:      row.get(5)?,
          identifiers:     Vec::new(),
          parents:         Vec::new(),
        })
      },
    )
    .optional()?;

  let Some(mut raw) = raw else {
    return Ok(None);
  };

  let mut stmt = conn.prepare(
    "SELECT namespace, value FROM organization_identifiers
     WHERE organization_id = ?1",
  )?;
  raw.identifiers = stmt
    .query_map(rusqlite::params![id], |r| Ok((r.get(0)?, r.get(1)?)))?
    .collect::<rusqlite::Result<_>>()?;

  let mut stmt = conn.prepare(
    "SELECT parent_id, valid_from, valid_until FROM organization_parents
     WHERE organization_id = ?1",
  )?;
  raw.parents = stmt
    .query_map(rusqlite::params![id], |r| {
      Ok(RawParent {
        parent_id:   r.get(0)?,
        valid_from:  r.get(1)?,
        valid_until: r.get(2)?,
      })
    })?
    .collect::<rusqlite::Result<_>>()?;

  Ok(Some(raw))
}

fn write_organization(
  tx: &rusqlite::Transaction<'_>,
  raw: &RawOrganization,
  must_exist: bool,
) -> rusqlite::Result<bool> {
  if must_exist {
    let n = tx.execute(
      "UPDATE organizations SET type = ?2, names = ?3, acronym = ?4,
         updated_at = ?5
       WHERE organization_id = ?1",
      rusqlite::params![
        raw.organization_id,
        raw.kind,
        raw.names,
        raw.acronym,
        raw.updated_at,
      ],
    )?;
    if n == 0 {
      return Ok(false);
    }
  } else {
    tx.execute(
      "INSERT INTO organizations
         (organization_id, type, names, acronym, created_at, updated_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      rusqlite::params![
        raw.organization_id,
        raw.kind,
        raw.names,
        raw.acronym,
        raw.created_at,
        raw.updated_at,
      ],
    )?;
  }

  tx.execute(
    "DELETE FROM organization_identifiers WHERE organization_id = ?1",
    rusqlite::params![raw.organization_id],
  )?;
  let mut stmt = tx.prepare(
    "INSERT INTO organization_identifiers (organization_id, namespace, value)
     VALUES (?1, ?2, ?3)",
  )?;
  for (namespace, value) in &raw.identifiers {
    stmt.execute(rusqlite::params![raw.organization_id, namespace, value])?;
  }

  tx.execute(
    "DELETE FROM organization_parents WHERE organization_id = ?1",
    rusqlite::params![raw.organization_id],
  )?;
  let mut stmt = tx.prepare(
    "INSERT OR IGNORE INTO organization_parents
       (organization_id, parent_id, valid_from, valid_until)
     VALUES (?1, ?2, ?3, ?4)",
  )?;
  for p in &raw.parents {
    stmt.execute(rusqlite::params![
      raw.organization_id,
      p.parent_id,
      p.valid_from,
      p.valid_until,
    ])?;
  }

  Ok(true)
}

/// Distinct owner ids of any of `ids` in the given identifier table, in
/// first-match order.
fn find_owners(
  conn: &rusqlite::Connection,
  sql: &str,
  ids: &[Identifier],
) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare(sql)?;
  let mut owners: Vec<String> = Vec::new();
  for id in ids {
    let rows = stmt
      .query_map(rusqlite::params![id.namespace, id.value], |r| {
        r.get::<_, String>(0)
      })?;
    for owner in rows {
      let owner = owner?;
      if !owners.contains(&owner) {
        owners.push(owner);
      }
    }
  }
  Ok(owners)
}

// ─── PersonStore impl ────────────────────────────────────────────────────────

impl PersonStore for SqliteStore {
  type Error = Error;

  async fn find_people_by_identifiers(
    &self,
    ids: Vec<Identifier>,
  ) -> Result<Vec<Person>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let raws: Vec<RawPerson> = self
      .conn
      .call(move |conn| {
        let owners = find_owners(
          conn,
          "SELECT DISTINCT person_id FROM person_identifiers
           WHERE namespace = ?1 AND value = ?2",
          &ids,
        )?;
        let mut raws = Vec::with_capacity(owners.len());
        for owner in &owners {
          if let Some(raw) = read_person(conn, owner)? {
            raws.push(raw);
          }
        }
        Ok(raws)
      })
      .await?;

    raws
      .into_iter()
      .map(|raw| raw.into_person(self.cipher.as_ref()))
      .collect()
  }

  async fn get_person(&self, id: Uuid) -> Result<Option<Person>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| Ok(read_person(conn, &id_str)?))
      .await?;
    raw.map(|raw| raw.into_person(self.cipher.as_ref())).transpose()
  }

  async fn create_person(&self, person: Person) -> Result<Person> {
    let id = Uuid::new_v4();
    let raw = RawPerson::from_person(
      &Person { created_at: None, ..person },
      id,
      Utc::now(),
      self.cipher.as_ref(),
    )?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        write_person(&tx, &raw, false)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    debug!(person_id = %id, "created person");

    self.get_person(id).await?.ok_or(Error::PersonNotFound(id))
  }

  async fn update_person(&self, person: Person) -> Result<Person> {
    let id = person.id.ok_or(Error::NotStored)?;
    let raw =
      RawPerson::from_person(&person, id, Utc::now(), self.cipher.as_ref())?;

    let found = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let found = write_person(&tx, &raw, true)?;
        tx.commit()?;
        Ok(found)
      })
      .await?;
    if !found {
      return Err(Error::PersonNotFound(id));
    }
    debug!(person_id = %id, "updated person");

    self.get_person(id).await?.ok_or(Error::PersonNotFound(id))
  }

  async fn delete_person(&self, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM people WHERE person_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    if n == 0 {
      return Err(Error::PersonNotFound(id));
    }
    debug!(person_id = %id, "deleted person");
    Ok(())
  }

  async fn transfer_person_identifier(
    &self,
    to: Uuid,
    id: Identifier,
  ) -> Result<()> {
    let to_str = encode_uuid(to);
    let found = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let exists = tx
          .query_row(
            "SELECT 1 FROM people WHERE person_id = ?1",
            rusqlite::params![to_str],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if !exists {
          return Ok(false);
        }
        tx.execute(
          "INSERT OR IGNORE INTO person_identifiers (person_id, namespace, value)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![to_str, id.namespace, id.value],
        )?;
        tx.execute(
          "DELETE FROM person_identifiers
           WHERE namespace = ?2 AND value = ?3 AND person_id != ?1",
          rusqlite::params![to_str, id.namespace, id.value],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !found {
      return Err(Error::PersonNotFound(to));
    }
    Ok(())
  }

  async fn list_active_person_ids(&self, active: bool) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT person_id FROM people WHERE active = ?1")?;
        let rows = stmt
          .query_map(rusqlite::params![active], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    ids.iter().map(|s| Ok(Uuid::parse_str(s)?)).collect()
  }

  async fn set_people_active(&self, active: bool, ids: Vec<Uuid>) -> Result<()> {
    if ids.len() > MAX_ACTIVE_BATCH {
      return Err(Error::BatchTooLarge {
        size: ids.len(),
        max:  MAX_ACTIVE_BATCH,
      });
    }
    if ids.is_empty() {
      return Ok(());
    }

    let now_str = encode_dt(Utc::now());
    let id_strs: Vec<String> = ids.into_iter().map(encode_uuid).collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "UPDATE people SET active = ?1, updated_at = ?2
             WHERE person_id = ?3 AND active != ?1",
          )?;
          for id in &id_strs {
            stmt.execute(rusqlite::params![active, now_str, id])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn expire_people(&self, today: NaiveDate) -> Result<u64> {
    let today_str = encode_date(today);
    let now_str = encode_dt(Utc::now());

    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE people SET active = 0, updated_at = ?2
           WHERE active = 1
             AND expiration_date IS NOT NULL
             AND expiration_date <= ?1",
          rusqlite::params![today_str, now_str],
        )?)
      })
      .await?;
    Ok(n as u64)
  }
}

// ─── OrganizationStore impl ──────────────────────────────────────────────────

impl OrganizationStore for SqliteStore {
  type Error = Error;

  async fn find_organizations_by_identifiers(
    &self,
    ids: Vec<Identifier>,
  ) -> Result<Vec<Organization>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let raws: Vec<RawOrganization> = self
      .conn
      .call(move |conn| {
        let owners = find_owners(
          conn,
          "SELECT DISTINCT organization_id FROM organization_identifiers
           WHERE namespace = ?1 AND value = ?2",
          &ids,
        )?;
        let mut raws = Vec::with_capacity(owners.len());
        for owner in &owners {
          if let Some(raw) = read_organization(conn, owner)? {
            raws.push(raw);
          }
        }
        Ok(raws)
      })
      .await?;

    raws.into_iter().map(RawOrganization::into_organization).collect()
  }

  async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| Ok(read_organization(conn, &id_str)?))
      .await?;
    raw.map(RawOrganization::into_organization).transpose()
  }

  async fn create_organization(
    &self,
    organization: Organization,
  ) -> Result<Organization> {
    let id = Uuid::new_v4();
    let raw = RawOrganization::from_organization(
      &Organization { created_at: None, ..organization },
      id,
      Utc::now(),
    )?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        write_organization(&tx, &raw, false)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    debug!(organization_id = %id, "created organization");

    self
      .get_organization(id)
      .await?
      .ok_or(Error::OrganizationNotFound(id))
  }

  async fn update_organization(
    &self,
    organization: Organization,
  ) -> Result<Organization> {
    let id = organization.id.ok_or(Error::NotStored)?;
    let raw = RawOrganization::from_organization(&organization, id, Utc::now())?;

    let found = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let found = write_organization(&tx, &raw, true)?;
        tx.commit()?;
        Ok(found)
      })
      .await?;
    if !found {
      return Err(Error::OrganizationNotFound(id));
    }
    debug!(organization_id = %id, "updated organization");

    self
      .get_organization(id)
      .await?
      .ok_or(Error::OrganizationNotFound(id))
  }

  async fn delete_organization(&self, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM organizations WHERE organization_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    if n == 0 {
      return Err(Error::OrganizationNotFound(id));
    }
    debug!(organization_id = %id, "deleted organization");
    Ok(())
  }
}
