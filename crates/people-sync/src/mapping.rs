//! Directory entry → candidate person, one dispatch table per feed.
//!
//! Mapping is pure: `departmentNumber` codes are collected but resolved to
//! organizations by the caller, which owns the store and the cache.

use chrono::NaiveDate;
use people_core::{Identifier, Person, identifier::ns};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directory::DirectoryEntry;

#[derive(Debug, Error)]
pub enum MappingError {
  #[error("attribute {attribute}: invalid date {value:?}")]
  InvalidDate { attribute: &'static str, value: String },
}

/// Which directory population an entry comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
  Employee,
  Student,
}

#[derive(Debug, Clone, Copy)]
enum Field {
  Identifier(&'static str),
  Name,
  GivenName,
  FamilyName,
  PreferredGivenName,
  PreferredFamilyName,
  HonorificPrefix,
  Email,
  BirthDate,
  ExpirationDate,
  JobCategory,
  ObjectClass,
  Department,
}

const EMPLOYEE: &[(&str, Field)] = &[
  ("uid", Field::Identifier(ns::UGENT_USERNAME)),
  ("ugentHistoricIDs", Field::Identifier(ns::HISTORIC_UGENT_ID)),
  ("ugentBarcode", Field::Identifier(ns::UGENT_BARCODE)),
  ("givenName", Field::GivenName),
  ("ugentPreferredGivenName", Field::PreferredGivenName),
  ("sn", Field::FamilyName),
  ("ugentPreferredSn", Field::PreferredFamilyName),
  ("displayName", Field::Name),
  ("ugentBirthDate", Field::BirthDate),
  ("mail", Field::Email),
  ("ugentJobCategory", Field::JobCategory),
  ("ugentAddressingTitle", Field::HonorificPrefix),
  ("objectClass", Field::ObjectClass),
  ("departmentNumber", Field::Department),
];

// students only carry the preferred name variants, stored as the plain ones
const STUDENT: &[(&str, Field)] = &[
  ("uid", Field::Identifier(ns::UGENT_USERNAME)),
  ("ugentID", Field::Identifier(ns::UGENT_ID)),
  ("ugentHistoricIDs", Field::Identifier(ns::HISTORIC_UGENT_ID)),
  ("ugentBarcode", Field::Identifier(ns::UGENT_BARCODE)),
  ("ugentPreferredGivenName", Field::GivenName),
  ("ugentPreferredSn", Field::FamilyName),
  ("displayName", Field::Name),
  ("ugentBirthDate", Field::BirthDate),
  ("mail", Field::Email),
  ("ugentJobCategory", Field::JobCategory),
  ("ugentAddressingTitle", Field::HonorificPrefix),
  ("objectClass", Field::ObjectClass),
  ("ugentExpirationDate", Field::ExpirationDate),
  ("departmentNumber", Field::Department),
];

impl Feed {
  fn table(self) -> &'static [(&'static str, Field)] {
    match self {
      Feed::Employee => EMPLOYEE,
      Feed::Student => STUDENT,
    }
  }

  /// The directory attributes this feed reads.
  pub fn attributes(self) -> Vec<String> {
    self.table().iter().map(|(name, _)| name.to_string()).collect()
  }

  /// Students without an e-mail address are not imported.
  pub fn requires_email(self) -> bool { self == Feed::Student }

  pub fn map(self, entry: &DirectoryEntry) -> Result<Mapped, MappingError> {
    let mut person = Person { active: true, ..Default::default() };
    let mut department_codes: Vec<String> = Vec::new();

    for &(attribute, field) in self.table() {
      for value in entry.values(attribute) {
        let value = value.trim();
        if value.is_empty() {
          continue;
        }
        let text = Some(value.to_string());
        match field {
          Field::Identifier(namespace) => {
            person.add_identifier(Identifier::new(namespace, value))
          }
          Field::Name => person.name = text,
          Field::GivenName => person.given_name = text,
          Field::FamilyName => person.family_name = text,
          Field::PreferredGivenName => person.preferred_given_name = text,
          Field::PreferredFamilyName => person.preferred_family_name = text,
          Field::HonorificPrefix => person.honorific_prefix = text,
          Field::Email => person.set_email(text),
          Field::BirthDate => person.birth_date = Some(parse_date(attribute, value)?),
          Field::ExpirationDate => {
            person.expiration_date = Some(parse_date(attribute, value)?)
          }
          Field::JobCategory => person.job_categories.push(value.to_string()),
          Field::ObjectClass => person.object_classes.push(value.to_string()),
          Field::Department => {
            if !department_codes.iter().any(|c| c == value) {
              department_codes.push(value.to_string());
            }
          }
        }
      }
    }

    people_core::person::sort_strings(&mut person.job_categories);
    people_core::person::sort_strings(&mut person.object_classes);
    Ok(Mapped { person, department_codes })
  }
}

/// A candidate before its department codes are resolved.
#[derive(Debug, Clone)]
pub struct Mapped {
  pub person:           Person,
  pub department_codes: Vec<String>,
}

/// Directory dates are `YYYYMMDD`; ISO dates are accepted too.
fn parse_date(attribute: &'static str, value: &str) -> Result<NaiveDate, MappingError> {
  NaiveDate::parse_from_str(value, "%Y%m%d")
    .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
    .map_err(|_| MappingError::InvalidDate { attribute, value: value.to_string() })
}
