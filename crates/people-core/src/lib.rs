//! Core types and trait definitions for the people registry.
//!
//! This crate is free of database and directory dependencies. The store,
//! feed and synchronizer crates all depend on it.

pub mod error;
pub mod identifier;
pub mod organization;
pub mod person;
pub mod policy;
pub mod secret;
pub mod store;
pub mod temporal;

pub use error::{Error, Result};
pub use identifier::Identifier;
pub use organization::{Organization, OrganizationParent, OrganizationType};
pub use person::{Attribute, OrganizationMembership, Person};
pub use policy::MergePolicy;
