//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, calendar dates are `YYYY-MM-DD`, UUIDs
//! are hyphenated lowercase strings. Collections without their own table are
//! compact JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use people_core::{
  Identifier, Organization, OrganizationMembership, OrganizationParent,
  Person, secret::SecretCipher,
};
use uuid::Uuid;

use crate::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format(DATE_FORMAT).to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, DATE_FORMAT)
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

fn decode_opt_date(s: Option<String>) -> Result<Option<NaiveDate>> {
  s.as_deref().map(decode_date).transpose()
}

// ─── Secrets ─────────────────────────────────────────────────────────────────

pub fn encode_secrets(
  person: &Person,
  cipher: &dyn SecretCipher,
) -> Result<String> {
  let sealed = person
    .secrets
    .iter()
    .map(|(ns, secret)| Ok((ns.clone(), cipher.seal(ns, secret)?)))
    .collect::<Result<BTreeMap<String, String>>>()?;
  Ok(serde_json::to_string(&sealed)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// An `(namespace, value)` pair straight from an identifiers table.
pub type RawIdentifier = (String, String);

/// Raw strings read from a `person_organizations` row.
pub struct RawMembership {
  pub organization_id: String,
  pub created_at:      String,
  pub updated_at:      String,
}

impl RawMembership {
  fn from_membership(m: &OrganizationMembership, now: DateTime<Utc>) -> Self {
    Self {
      organization_id: encode_uuid(m.organization_id),
      created_at:      encode_dt(m.created_at.unwrap_or(now)),
      updated_at:      encode_dt(m.updated_at.unwrap_or(now)),
    }
  }

  fn into_membership(self) -> Result<OrganizationMembership> {
    Ok(OrganizationMembership {
      organization_id: decode_uuid(&self.organization_id)?,
      created_at:      Some(decode_dt(&self.created_at)?),
      updated_at:      Some(decode_dt(&self.updated_at)?),
    })
  }
}

/// Raw strings read from a `people` row plus its child tables.
pub struct RawPerson {
  pub person_id:             String,
  pub active:                bool,
  pub name:                  Option<String>,
  pub given_name:            Option<String>,
  pub family_name:           Option<String>,
  pub preferred_name:        Option<String>,
  pub preferred_given_name:  Option<String>,
  pub preferred_family_name: Option<String>,
  pub honorific_prefix:      Option<String>,
  pub email:                 Option<String>,
  pub birth_date:            Option<String>,
  pub expiration_date:       Option<String>,
  pub job_categories:        String,
  pub roles:                 String,
  pub object_classes:        String,
  pub attributes:            String,
  pub settings:              String,
  pub secrets:               String,
  pub created_at:            String,
  pub updated_at:            String,
  pub identifiers:           Vec<RawIdentifier>,
  pub organizations:         Vec<RawMembership>,
}

impl RawPerson {
  /// Row values for `person`, stamped with `now`. `created_at` is only
  /// written on insert.
  pub fn from_person(
    person: &Person,
    id: Uuid,
    now: DateTime<Utc>,
    cipher: &dyn SecretCipher,
  ) -> Result<Self> {
    let person = person.normalized();
    Ok(Self {
      person_id:             encode_uuid(id),
      active:                person.active,
      secrets:               encode_secrets(&person, cipher)?,
      name:                  person.name,
      given_name:            person.given_name,
      family_name:           person.family_name,
      preferred_name:        person.preferred_name,
      preferred_given_name:  person.preferred_given_name,
      preferred_family_name: person.preferred_family_name,
      honorific_prefix:      person.honorific_prefix,
      email:                 person.email,
      birth_date:            person.birth_date.map(encode_date),
      expiration_date:       person.expiration_date.map(encode_date),
      job_categories:        serde_json::to_string(&person.job_categories)?,
      roles:                 serde_json::to_string(&person.roles)?,
      object_classes:        serde_json::to_string(&person.object_classes)?,
      attributes:            serde_json::to_string(&person.attributes)?,
      settings:              serde_json::to_string(&person.settings)?,
      created_at:            encode_dt(person.created_at.unwrap_or(now)),
      updated_at:            encode_dt(now),
      identifiers:           person
        .identifiers
        .into_iter()
        .map(|id| (id.namespace, id.value))
        .collect(),
      organizations:         person
        .organizations
        .iter()
        .map(|m| RawMembership::from_membership(m, now))
        .collect(),
    })
  }

  pub fn into_person(self, cipher: &dyn SecretCipher) -> Result<Person> {
    let sealed: BTreeMap<String, String> = serde_json::from_str(&self.secrets)?;
    let secrets = sealed
      .into_iter()
      .map(|(ns, value)| {
        let secret = cipher.open(&ns, &value)?;
        Ok((ns, secret))
      })
      .collect::<Result<_>>()?;

    let mut person = Person {
      id: Some(decode_uuid(&self.person_id)?),
      active: self.active,
      name: self.name,
      given_name: self.given_name,
      family_name: self.family_name,
      preferred_name: self.preferred_name,
      preferred_given_name: self.preferred_given_name,
      preferred_family_name: self.preferred_family_name,
      honorific_prefix: self.honorific_prefix,
      email: self.email,
      birth_date: decode_opt_date(self.birth_date)?,
      expiration_date: decode_opt_date(self.expiration_date)?,
      job_categories: serde_json::from_str(&self.job_categories)?,
      roles: serde_json::from_str(&self.roles)?,
      object_classes: serde_json::from_str(&self.object_classes)?,
      attributes: serde_json::from_str(&self.attributes)?,
      settings: serde_json::from_str(&self.settings)?,
      secrets,
      created_at: Some(decode_dt(&self.created_at)?),
      updated_at: Some(decode_dt(&self.updated_at)?),
      ..Default::default()
    };

    person.set_identifiers(
      self
        .identifiers
        .into_iter()
        .map(|(ns, value)| Identifier::new(ns, value))
        .collect(),
    );
    person.set_organization_memberships(
      self
        .organizations
        .into_iter()
        .map(RawMembership::into_membership)
        .collect::<Result<_>>()?,
    );

    Ok(person)
  }
}

/// Raw strings read from an `organization_parents` row.
pub struct RawParent {
  pub parent_id:   String,
  pub valid_from:  String,
  pub valid_until: Option<String>,
}

/// Raw strings read from an `organizations` row plus its child tables.
pub struct RawOrganization {
  pub organization_id: String,
  pub kind:            String,
  pub names:           String,
  pub acronym:         Option<String>,
  pub created_at:      String,
  pub updated_at:      String,
  pub identifiers:     Vec<RawIdentifier>,
  pub parents:         Vec<RawParent>,
}

impl RawOrganization {
  pub fn from_organization(
    org: &Organization,
    id: Uuid,
    now: DateTime<Utc>,
  ) -> Result<Self> {
    let org = org.normalized();
    Ok(Self {
      organization_id: encode_uuid(id),
      kind:            org.kind.to_string(),
      names:           serde_json::to_string(&org.names)?,
      acronym:         org.acronym,
      created_at:      encode_dt(org.created_at.unwrap_or(now)),
      updated_at:      encode_dt(now),
      identifiers:     org
        .identifiers
        .into_iter()
        .map(|id| (id.namespace, id.value))
        .collect(),
      parents:         org
        .parents
        .iter()
        .map(|p| RawParent {
          parent_id:   encode_uuid(p.parent_id),
          valid_from:  encode_dt(p.valid_from),
          valid_until: p.valid_until.map(encode_dt),
        })
        .collect(),
    })
  }

  pub fn into_organization(self) -> Result<Organization> {
    let kind = self.kind.parse().map_err(|_| {
      Error::InvalidColumn(format!("organization type {:?}", self.kind))
    })?;

    let mut org = Organization {
      id: Some(decode_uuid(&self.organization_id)?),
      kind,
      names: serde_json::from_str(&self.names)?,
      acronym: self.acronym,
      created_at: Some(decode_dt(&self.created_at)?),
      updated_at: Some(decode_dt(&self.updated_at)?),
      ..Default::default()
    };

    org.set_identifiers(
      self
        .identifiers
        .into_iter()
        .map(|(ns, value)| Identifier::new(ns, value))
        .collect(),
    );
    org.set_parents(
      self
        .parents
        .into_iter()
        .map(|p| {
          Ok(OrganizationParent::new(
            decode_uuid(&p.parent_id)?,
            decode_dt(&p.valid_from)?,
            decode_opt_dt(p.valid_until)?,
          ))
        })
        .collect::<Result<_>>()?,
    );

    Ok(org)
  }
}
