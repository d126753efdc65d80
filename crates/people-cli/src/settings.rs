//! Runtime configuration, deserialised from `people.toml` and `PEOPLE_*`
//! environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use people_core::{MergePolicy, policy::default_preserved_namespaces};
use people_sync::{
  RunContext,
  mapping::Feed,
  sweep::{
    CatchAll, DEFAULT_BATCH_SIZE, DEFAULT_PAGE_SIZE, EMPLOYEE_FILTER,
    STUDENT_FILTER, default_catch_alls,
  },
};
use serde::Deserialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path: PathBuf,
  pub sync:       SyncSettings,
  pub policy:     PolicySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  pub batch_size:              usize,
  pub page_size:               usize,
  pub cache_ttl_secs:          u64,
  pub cache_capacity:          usize,
  pub employee_filter:         String,
  pub student_filter:          String,
  pub catch_all_organizations: Vec<CatchAllSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatchAllSettings {
  pub code: String,
  pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
  pub durable_namespace:    String,
  pub preserved_namespaces: Vec<String>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("people.db"),
      sync:       SyncSettings::default(),
      policy:     PolicySettings::default(),
    }
  }
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      batch_size:              DEFAULT_BATCH_SIZE,
      page_size:               DEFAULT_PAGE_SIZE,
      cache_ttl_secs:          people_sync::cache::DEFAULT_TTL.as_secs(),
      cache_capacity:          people_sync::cache::DEFAULT_CAPACITY,
      employee_filter:         EMPLOYEE_FILTER.to_string(),
      student_filter:          STUDENT_FILTER.to_string(),
      catch_all_organizations: default_catch_alls()
        .into_iter()
        .map(|c| CatchAllSettings { code: c.code, name: c.name })
        .collect(),
    }
  }
}

impl Default for PolicySettings {
  fn default() -> Self {
    Self {
      durable_namespace:    people_core::identifier::ns::DURABLE.to_string(),
      preserved_namespaces: default_preserved_namespaces(),
    }
  }
}

impl Settings {
  /// Layer the optional file at `path` with the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("PEOPLE")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()
  }

  /// `base` with the configured durable and preserved namespaces.
  pub fn policy(&self, base: MergePolicy) -> MergePolicy {
    base
      .with_durable_namespace(self.policy.durable_namespace.clone())
      .with_preserved_namespaces(self.policy.preserved_namespaces.clone())
  }

  pub fn run_context(&self, feed: Feed, cancel: watch::Receiver<bool>) -> RunContext {
    let base = match feed {
      Feed::Employee => RunContext::employees(cancel),
      Feed::Student => RunContext::students(cancel),
    };
    let filter = match feed {
      Feed::Employee => self.sync.employee_filter.clone(),
      Feed::Student => self.sync.student_filter.clone(),
    };
    RunContext {
      filter,
      page_size: self.sync.page_size,
      batch_size: self.sync.batch_size,
      policy: self.policy(base.policy.clone()),
      catch_alls: self
        .sync
        .catch_all_organizations
        .iter()
        .map(|c| CatchAll::new(&c.code, &c.name))
        .collect(),
      cache_ttl: Duration::from_secs(self.sync.cache_ttl_secs),
      cache_size: self.sync.cache_capacity,
      ..base
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn missing_file_yields_defaults() {
    let settings = Settings::load(Path::new("/nonexistent/people.toml")).unwrap();
    assert_eq!(settings.store_path, PathBuf::from("people.db"));
    assert_eq!(settings.sync.batch_size, DEFAULT_BATCH_SIZE);
    assert_eq!(settings.sync.catch_all_organizations.len(), 2);
    assert_eq!(settings.policy.durable_namespace, "id");
  }

  #[test]
  fn file_overrides_nested_values() {
    let dir = std::env::temp_dir().join(format!("people-settings-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("people.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
      file,
      r#"
store_path = "/var/lib/people.db"

[sync]
batch_size = 50
catch_all_organizations = [{{ code = "X", name = "Elsewhere" }}]

[policy]
preserved_namespaces = ["orcid"]
"#
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.store_path, PathBuf::from("/var/lib/people.db"));
    assert_eq!(settings.sync.batch_size, 50);
    assert_eq!(settings.sync.page_size, DEFAULT_PAGE_SIZE);

    let (_tx, rx) = watch::channel(false);
    let ctx = settings.run_context(Feed::Student, rx);
    assert!(!ctx.deactivate);
    assert_eq!(ctx.batch_size, 50);
    assert_eq!(ctx.catch_alls, vec![CatchAll::new("X", "Elsewhere")]);
    assert_eq!(ctx.policy.preserved_namespaces, vec!["orcid".to_string()]);

    std::fs::remove_dir_all(dir).unwrap();
  }
}
