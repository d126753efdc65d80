//! Persistence contracts for canonical people and organizations.
//!
//! The traits are implemented by storage backends (e.g.
//! `people-store-sqlite`). The reconciliation crates depend on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{identifier::Identifier, organization::Organization, person::Person};

// ─── People ──────────────────────────────────────────────────────────────────

/// Abstraction over a person store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait PersonStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Every person owning at least one of `ids`, each returned once.
  fn find_people_by_identifiers(
    &self,
    ids: Vec<Identifier>,
  ) -> impl Future<Output = Result<Vec<Person>, Self::Error>> + Send + '_;

  fn get_person(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  /// Persist a new person. The store assigns the id and both timestamps.
  fn create_person(
    &self,
    person: Person,
  ) -> impl Future<Output = Result<Person, Self::Error>> + Send + '_;

  /// Replace a stored person wholesale. Bumps `updated_at`.
  fn update_person(
    &self,
    person: Person,
  ) -> impl Future<Output = Result<Person, Self::Error>> + Send + '_;

  /// Delete a person together with its identifiers and memberships.
  fn delete_person(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Move one identifier from whichever person owns it onto `to`.
  fn transfer_person_identifier(
    &self,
    to: Uuid,
    id: Identifier,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_active_person_ids(
    &self,
    active: bool,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// Set the active flag for a batch of people. Backends may bound the
  /// batch size.
  fn set_people_active(
    &self,
    active: bool,
    ids: Vec<Uuid>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Deactivate active people whose expiration date is on or before
  /// `today`. Returns how many were flagged.
  fn expire_people(
    &self,
    today: NaiveDate,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}

// ─── Organizations ───────────────────────────────────────────────────────────

pub trait OrganizationStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn find_organizations_by_identifiers(
    &self,
    ids: Vec<Identifier>,
  ) -> impl Future<Output = Result<Vec<Organization>, Self::Error>> + Send + '_;

  fn get_organization(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Organization>, Self::Error>> + Send + '_;

  fn create_organization(
    &self,
    organization: Organization,
  ) -> impl Future<Output = Result<Organization, Self::Error>> + Send + '_;

  fn update_organization(
    &self,
    organization: Organization,
  ) -> impl Future<Output = Result<Organization, Self::Error>> + Send + '_;

  fn delete_organization(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
