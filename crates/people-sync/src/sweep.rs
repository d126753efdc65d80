//! Full-sweep synchronizer: read every entry of a directory feed, reconcile
//! each one, then deactivate whoever the sweep did not see.

use std::{
  collections::HashSet,
  time::{Duration, Instant},
};

use chrono::Utc;
use people_core::{
  Error, Identifier, MergePolicy, Organization, OrganizationMembership,
  OrganizationType, Result,
  identifier::ns,
  policy::UnresolvedReferences,
  store::{OrganizationStore, PersonStore},
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
  cache::{OrganizationCache, Resolution},
  directory::{DirectoryEntry, DirectorySource, SearchRequest},
  mapping::Feed,
  merge::{Reconciled, reconcile},
};

pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_PAGE_SIZE: usize = 2_000;
pub const EMPLOYEE_FILTER: &str = "(objectClass=ugentEmployee)";
pub const STUDENT_FILTER: &str = "(objectClass=ugentStudent)";

// ─── Run context ─────────────────────────────────────────────────────────────

/// An organization created on demand when a person references its code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchAll {
  pub code: String,
  pub name: String,
}

impl CatchAll {
  pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
    Self { code: code.into(), name: name.into() }
  }
}

pub fn default_catch_alls() -> Vec<CatchAll> {
  vec![
    CatchAll::new("UGENT-FORMER", "Former personnel"),
    CatchAll::new("UGENT-AFFILIATED", "Affiliated personnel"),
  ]
}

/// Everything one sweep needs besides its store and source.
#[derive(Debug, Clone)]
pub struct RunContext {
  pub feed:       Feed,
  pub filter:     String,
  pub page_size:  usize,
  /// People per deactivation batch.
  pub batch_size: usize,
  /// Flag active people the sweep did not observe as inactive.
  pub deactivate: bool,
  pub policy:     MergePolicy,
  pub catch_alls: Vec<CatchAll>,
  pub cache_ttl:  Duration,
  pub cache_size: usize,
  /// Set to `true` to stop the sweep before the next entry.
  pub cancel:     watch::Receiver<bool>,
}

impl RunContext {
  /// Employee sweep: deactivates people it does not see.
  pub fn employees(cancel: watch::Receiver<bool>) -> Self {
    Self {
      feed: Feed::Employee,
      filter: EMPLOYEE_FILTER.into(),
      page_size: DEFAULT_PAGE_SIZE,
      batch_size: DEFAULT_BATCH_SIZE,
      deactivate: true,
      policy: MergePolicy::directory_feed(),
      catch_alls: default_catch_alls(),
      cache_ttl: crate::cache::DEFAULT_TTL,
      cache_size: crate::cache::DEFAULT_CAPACITY,
      cancel,
    }
  }

  /// Student import: never deactivates.
  pub fn students(cancel: watch::Receiver<bool>) -> Self {
    Self {
      feed: Feed::Student,
      filter: STUDENT_FILTER.into(),
      deactivate: false,
      policy: MergePolicy::student_feed(),
      ..Self::employees(cancel)
    }
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
  pub processed:   usize,
  pub created:     usize,
  pub updated:     usize,
  pub unchanged:   usize,
  pub skipped:     usize,
  pub deactivated: usize,
  pub warnings:    Vec<String>,
}

/// A sweep that stopped early, with what it managed before stopping.
#[derive(Debug, thiserror::Error)]
#[error("sweep aborted: {error}")]
pub struct SweepError {
  #[source]
  pub error:  Error,
  pub report: SweepReport,
}

// ─── Synchronizer ────────────────────────────────────────────────────────────

pub struct Synchronizer<S, D> {
  store:    S,
  source:   D,
  ctx:      RunContext,
  cache:    OrganizationCache,
  observed: HashSet<Uuid>,
  report:   SweepReport,
}

impl<S, D> Synchronizer<S, D>
where
  S: PersonStore + OrganizationStore,
  D: DirectorySource,
{
  pub fn new(store: S, source: D, ctx: RunContext) -> Self {
    Self {
      store,
      source,
      cache: OrganizationCache::new(ctx.cache_ttl, ctx.cache_size),
      ctx,
      observed: HashSet::new(),
      report: SweepReport::default(),
    }
  }

  pub async fn run(mut self) -> Result<SweepReport, SweepError> {
    let span = info_span!("sweep", feed = ?self.ctx.feed);
    match self.phases().instrument(span).await {
      Ok(()) => Ok(self.report),
      Err(error) => {
        warn!(%error, "sweep aborted");
        Err(SweepError { error, report: self.report })
      }
    }
  }

  async fn phases(&mut self) -> Result<()> {
    self.ingest().await?;
    info!(
      processed = self.report.processed,
      created = self.report.created,
      updated = self.report.updated,
      unchanged = self.report.unchanged,
      skipped = self.report.skipped,
      "ingest finished"
    );

    if self.ctx.deactivate {
      if self.cancelled() {
        return Err(Error::Cancelled);
      }
      self.deactivate().await?;
      info!(deactivated = self.report.deactivated, "deactivation finished");
    }
    Ok(())
  }

  fn cancelled(&self) -> bool { *self.ctx.cancel.borrow() }

  // ── Ingest ───────────────────────────────────────────────────────────

  async fn ingest(&mut self) -> Result<()> {
    let request = SearchRequest {
      filter:     self.ctx.filter.clone(),
      attributes: self.ctx.feed.attributes(),
      page_size:  self.ctx.page_size,
    };
    let mut cookie = None;

    loop {
      if self.cancelled() {
        return self.cancel_search(&request, cookie).await;
      }
      let page = self
        .source
        .search_page(request.clone(), cookie.take())
        .await
        .map_err(Error::external)?;
      debug!(entries = page.entries.len(), "fetched page");

      for entry in &page.entries {
        if self.cancelled() {
          return self.cancel_search(&request, page.cookie.clone()).await;
        }
        self.ingest_entry(entry).await;
      }

      match page.cookie {
        Some(next) => cookie = Some(next),
        None => return Ok(()),
      }
    }
  }

  async fn cancel_search(
    &self,
    request: &SearchRequest,
    cookie: Option<Vec<u8>>,
  ) -> Result<()> {
    if let Some(cookie) = cookie {
      if let Err(error) = self.source.abandon(request.clone(), cookie).await {
        warn!(%error, "failed to abandon paged search");
      }
    }
    Err(Error::Cancelled)
  }

  async fn ingest_entry(&mut self, entry: &DirectoryEntry) {
    self.report.processed += 1;
    match self.process(entry).await {
      Ok(Some(Reconciled { person, was_created, changed })) => {
        if let Some(id) = person.id {
          self.observed.insert(id);
        }
        match (was_created, changed) {
          (true, _) => self.report.created += 1,
          (false, true) => self.report.updated += 1,
          (false, false) => self.report.unchanged += 1,
        }
      }
      Ok(None) => self.report.skipped += 1,
      Err(error) => {
        warn!(dn = %entry.dn, %error, "skipping entry");
        self.report.skipped += 1;
        self.report.warnings.push(format!("{}: {error}", entry.dn));
      }
    }
  }

  async fn process(&mut self, entry: &DirectoryEntry) -> Result<Option<Reconciled>> {
    let mapped = self.ctx.feed.map(entry).map_err(Error::external)?;
    let mut person = mapped.person;

    if self.ctx.feed.requires_email() && person.email.is_none() {
      warn!(dn = %entry.dn, "ignoring entry without email");
      self.report.warnings.push(format!("{}: no email", entry.dn));
      return Ok(None);
    }

    for code in &mapped.department_codes {
      if let Some(id) = self.resolve_department(code).await? {
        person.add_organization_membership(OrganizationMembership::new(id));
      }
    }

    // nothing to match on: every sweep creates this person afresh
    if self.ctx.policy.match_keys(&person.identifiers).is_empty() {
      warn!(dn = %entry.dn, "entry has no match key");
      self.report.warnings.push(format!("{}: no match key", entry.dn));
    }

    let reconciled = reconcile(&self.store, person, &self.ctx.policy).await?;
    debug!(
      dn = %entry.dn,
      person = ?reconciled.person.id,
      was_created = reconciled.was_created,
      changed = reconciled.changed,
      "reconciled entry"
    );
    Ok(Some(reconciled))
  }

  /// The department a `departmentNumber` code refers to today, if any.
  async fn resolve_department(&mut self, code: &str) -> Result<Option<Uuid>> {
    let clock = Instant::now();
    if let Some(resolution) = self.cache.get(code, clock) {
      return Ok(resolution.id());
    }

    let catch_all = self.ctx.catch_alls.iter().find(|c| c.code == code).cloned();
    let resolution = match catch_all {
      Some(catch_all) => Resolution::Resolved(self.ensure_catch_all(&catch_all).await?),
      None => {
        let now = Utc::now();
        self
          .store
          .find_organizations_by_identifiers(vec![Identifier::new(ns::UGENT_ID, code)])
          .await
          .map_err(Error::persistence)?
          .iter()
          .find(|org| org.is_in_good_standing(now))
          .and_then(|org| org.id)
          .into()
      }
    };
    self.cache.insert(code, resolution, clock);

    match resolution {
      Resolution::Resolved(id) => Ok(Some(id)),
      Resolution::Unresolved => match self.ctx.policy.unresolved_references {
        UnresolvedReferences::Skip => {
          debug!(code, "no department in good standing");
          Ok(None)
        }
        UnresolvedReferences::Fatal => Err(Error::UnresolvedReference {
          reference: Identifier::new(ns::UGENT_ID, code).to_string(),
          reason:    "no department in good standing".into(),
        }),
      },
    }
  }

  /// Catch-all organizations match on code alone and are created when
  /// missing.
  async fn ensure_catch_all(&self, catch_all: &CatchAll) -> Result<Uuid> {
    let key = Identifier::new(ns::UGENT_ID, &catch_all.code);
    let found = self
      .store
      .find_organizations_by_identifiers(vec![key.clone()])
      .await
      .map_err(Error::persistence)?;
    if let Some(id) = found.iter().find_map(|org| org.id) {
      return Ok(id);
    }

    let mut org = Organization { kind: OrganizationType::Organization, ..Default::default() };
    org.names.insert("eng".into(), catch_all.name.clone());
    org.add_identifier(key.clone());
    let created = self
      .store
      .create_organization(org)
      .await
      .map_err(Error::persistence)?;
    info!(code = %catch_all.code, "created catch-all organization");
    created.id.ok_or_else(|| Error::UnresolvedReference {
      reference: key.to_string(),
      reason:    "store returned no id".into(),
    })
  }

  // ── Deactivate ───────────────────────────────────────────────────────

  async fn deactivate(&mut self) -> Result<()> {
    let active = self
      .store
      .list_active_person_ids(true)
      .await
      .map_err(Error::persistence)?;
    let stale: Vec<Uuid> =
      active.into_iter().filter(|id| !self.observed.contains(id)).collect();
    debug!(active_unseen = stale.len(), "deactivating unseen people");

    for batch in stale.chunks(self.ctx.batch_size.max(1)) {
      self
        .store
        .set_people_active(false, batch.to_vec())
        .await
        .map_err(Error::persistence)?;
      self.report.deactivated += batch.len();
    }
    Ok(())
  }
}
