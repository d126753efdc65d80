//! Folds a CERIF message onto the stored organization.
//!
//! An update rebuilds the organization from the message alone: names,
//! acronym, type, parents and identifiers are reset and then re-derived from
//! the observations. Scalar fields only take observations valid at `now`;
//! parent edges and identifiers are recorded whatever their window, edges
//! keeping their own.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use people_core::{
  Identifier, MergePolicy, Organization, OrganizationParent, OrganizationType,
  identifier::ns,
  policy::UnresolvedReferences,
  store::OrganizationStore,
  temporal::AttributeObservation,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  cerif::{Intent, Message},
  error::Result,
};

/// Observation names that become identifiers, and their namespaces.
const IDENTIFIER_ATTRIBUTES: &[(&str, &str)] = &[
  ("ugent_memorialis_id", ns::UGENT_MEMORIALIS_ID),
  ("code", ns::UGENT_ID),
  ("biblio_code", ns::BIBLIO_ID),
];

/// The result of applying one message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
  Projected {
    organization: Organization,
    was_created:  bool,
    changed:      bool,
  },
  /// `id` is `None` when there was nothing stored to delete.
  Deleted { id: Option<Uuid> },
}

pub struct OrganizationProjector<S> {
  store:  S,
  policy: MergePolicy,
}

impl<S: OrganizationStore> OrganizationProjector<S> {
  pub fn new(store: S) -> Self {
    Self { store, policy: MergePolicy::organization_feed() }
  }

  pub fn with_policy(mut self, policy: MergePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub async fn apply(&self, msg: &Message, now: DateTime<Utc>) -> Result<Outcome> {
    let key = Identifier::new(ns::GISMO_ID, &msg.id);
    let existing = self.find_one(key.clone()).await?;

    match &msg.intent {
      Intent::Delete => {
        let Some(id) = existing.and_then(|org| org.id) else {
          debug!(gismo_id = %msg.id, "delete for unknown organization");
          return Ok(Outcome::Deleted { id: None });
        };
        self
          .store
          .delete_organization(id)
          .await
          .map_err(people_core::Error::persistence)?;
        info!(gismo_id = %msg.id, organization_id = %id, "deleted organization");
        Ok(Outcome::Deleted { id: Some(id) })
      }
      Intent::Update(observations) => {
        let snapshot = existing.unwrap_or_default();
        let mut org = snapshot.clone();
        org.names.clear();
        org.acronym = None;
        org.kind = OrganizationType::Organization;
        org.parents.clear();
        org.set_identifiers(vec![key]);

        self.project(&mut org, &msg.id, observations, now).await?;

        if snapshot.is_stored() && org.is_equivalent(&snapshot) {
          debug!(gismo_id = %msg.id, "organization unchanged");
          return Ok(Outcome::Projected {
            organization: snapshot,
            was_created:  false,
            changed:      false,
          });
        }

        let was_created = !org.is_stored();
        let organization = if was_created {
          self.store.create_organization(org).await
        } else {
          self.store.update_organization(org).await
        }
        .map_err(people_core::Error::persistence)?;

        info!(
          gismo_id = %msg.id,
          organization_id = ?organization.id,
          was_created,
          "projected organization"
        );
        Ok(Outcome::Projected { organization, was_created, changed: true })
      }
    }
  }

  async fn project(
    &self,
    org: &mut Organization,
    external_id: &str,
    observations: &[AttributeObservation],
    now: DateTime<Utc>,
  ) -> Result<()> {
    let parents = self.resolve_parents(external_id, observations).await?;

    for obs in observations {
      let valid = obs.valid_at(now);
      let name = obs.name.as_str();

      if let Some((_, namespace)) =
        IDENTIFIER_ATTRIBUTES.iter().find(|(attr, _)| *attr == name)
      {
        org.add_identifier(Identifier::new(*namespace, &obs.value));
        continue;
      }

      match name {
        "parent_id" => {
          if obs.value == external_id {
            warn!(gismo_id = %external_id, "ignoring self-referencing parent");
            continue;
          }
          // skipped while resolving
          let Some(&parent_id) = parents.get(obs.value.as_str()) else {
            continue;
          };
          org.add_parent(OrganizationParent::new(
            parent_id,
            obs.window.start,
            obs.window.end,
          ));
        }
        _ if !valid => {}
        "acronym" => org.acronym = Some(obs.value.clone()),
        "type" => match obs.value.parse::<OrganizationType>() {
          Ok(kind) => org.kind = kind,
          Err(_) => warn!(value = %obs.value, "unknown organization type"),
        },
        _ => {
          if let Some(lang) = name.strip_prefix("name_") {
            org.names.insert(lang.to_string(), obs.value.clone());
          }
        }
      }
    }

    Ok(())
  }

  /// Stored ids for every parent the message references. Placeholders for
  /// missing parents are only created once every lookup has succeeded.
  async fn resolve_parents<'m>(
    &self,
    external_id: &str,
    observations: &'m [AttributeObservation],
  ) -> Result<HashMap<&'m str, Uuid>> {
    let mut resolved = HashMap::new();
    let mut missing: Vec<&str> = Vec::new();

    for obs in observations {
      let parent = obs.value.as_str();
      if obs.name != "parent_id"
        || parent == external_id
        || resolved.contains_key(parent)
        || missing.contains(&parent)
      {
        continue;
      }
      match self.find_parent(parent).await {
        Ok(Some(id)) => {
          resolved.insert(parent, id);
        }
        Ok(None) => missing.push(parent),
        Err(err) => self.unresolved_parent(parent, err)?,
      }
    }

    for parent in missing {
      match self.create_placeholder(parent).await {
        Ok(id) => {
          resolved.insert(parent, id);
        }
        Err(err) => self.unresolved_parent(parent, err)?,
      }
    }
    Ok(resolved)
  }

  fn unresolved_parent(&self, parent: &str, err: people_core::Error) -> Result<()> {
    match self.policy.unresolved_references {
      UnresolvedReferences::Skip => {
        warn!(parent, error = %err, "skipping parent");
        Ok(())
      }
      UnresolvedReferences::Fatal => Err(err.into()),
    }
  }

  async fn find_parent(&self, external_id: &str) -> Result<Option<Uuid>, people_core::Error> {
    let key = Identifier::new(ns::GISMO_ID, external_id);
    let found = self
      .store
      .find_organizations_by_identifiers(vec![key.clone()])
      .await
      .map_err(|e| unresolved(&key, e.to_string()))?;
    Ok(found.first().and_then(|org| org.id))
  }

  /// A stand-in carrying only `gismo_id:<value>`, filled in when the
  /// parent's own message arrives.
  async fn create_placeholder(&self, external_id: &str) -> Result<Uuid, people_core::Error> {
    let key = Identifier::new(ns::GISMO_ID, external_id);
    let mut placeholder = Organization::default();
    placeholder.add_identifier(key.clone());
    let created = self
      .store
      .create_organization(placeholder)
      .await
      .map_err(|e| unresolved(&key, e.to_string()))?;
    debug!(parent = %key, "created placeholder parent");
    created
      .id
      .ok_or_else(|| unresolved(&key, "store returned no id".to_string()))
  }

  async fn find_one(&self, key: Identifier) -> Result<Option<Organization>> {
    let found = self
      .store
      .find_organizations_by_identifiers(vec![key])
      .await
      .map_err(people_core::Error::persistence)?;
    Ok(found.into_iter().next())
  }
}

fn unresolved(key: &Identifier, reason: String) -> people_core::Error {
  people_core::Error::UnresolvedReference { reference: key.to_string(), reason }
}
