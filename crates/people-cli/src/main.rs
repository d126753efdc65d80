//! people-sync binary.
//!
//! Reads `people.toml` (or the path given with `--config`), opens the SQLite
//! registry and runs one reconciliation pipeline per invocation.

mod settings;

use std::{
  fs::File,
  io::{self, BufRead, BufReader, Read, Write},
  path::{Path, PathBuf},
};

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use flate2::read::GzDecoder;
use people_core::{MergePolicy, Person, store::OrganizationStore};
use people_gismo::{OrganizationProjector, parse_message};
use people_store_sqlite::SqliteStore;
use people_sync::{
  Synchronizer,
  directory::StaticSource,
  mapping::Feed,
  reconcile,
};
use serde_json::json;
use settings::Settings;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "People and organization registry sync")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "people.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Sweep the employee directory and deactivate everyone not seen.
  Ldapsync {
    /// JSON-lines dump of directory entries.
    #[arg(long)]
    entries: PathBuf,
  },
  /// Import student records from the directory.
  ImportStudents {
    #[arg(long)]
    entries: PathBuf,
  },
  /// Project CERIF organization messages; reads file paths (`.xml` or
  /// `.xml.gz`) from stdin.
  Procorgs,
  /// Reconcile one JSON person read from stdin.
  PutPerson,
  /// Deactivate people whose expiration date has passed.
  ExpirePeople,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = Settings::load(&cli.config).context("failed to read config file")?;
  let store_path = expand_tilde(&settings.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Ldapsync { entries } => sweep(store, &settings, Feed::Employee, &entries).await,
    Command::ImportStudents { entries } => {
      sweep(store, &settings, Feed::Student, &entries).await
    }
    Command::Procorgs => procorgs(store, &settings).await,
    Command::PutPerson => put_person(store, &settings).await,
    Command::ExpirePeople => {
      use people_core::store::PersonStore as _;
      let today = chrono::Local::now().date_naive();
      let expired = store
        .expire_people(today)
        .await
        .context("failed to expire people")?;
      tracing::info!(expired, %today, "expired people");
      Ok(())
    }
  }
}

async fn sweep(
  store: SqliteStore,
  settings: &Settings,
  feed: Feed,
  entries: &Path,
) -> anyhow::Result<()> {
  let file = File::open(entries)
    .with_context(|| format!("failed to open {}", entries.display()))?;
  let source = StaticSource::from_json_lines(BufReader::new(file))
    .with_context(|| format!("failed to load {}", entries.display()))?;
  tracing::info!(entries = source.len(), "loaded directory dump");

  let (cancel_tx, cancel_rx) = watch::channel(false);
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupted, stopping after the current entry");
      let _ = cancel_tx.send(true);
    }
  });

  let ctx = settings.run_context(feed, cancel_rx);
  match Synchronizer::new(store, source, ctx).run().await {
    Ok(report) => {
      println!("{}", serde_json::to_string(&report)?);
      Ok(())
    }
    Err(err) => {
      println!("{}", serde_json::to_string(&err.report)?);
      Err(err).context("sweep failed")
    }
  }
}

async fn procorgs(store: SqliteStore, settings: &Settings) -> anyhow::Result<()> {
  let projector = OrganizationProjector::new(store)
    .with_policy(settings.policy(MergePolicy::organization_feed()));

  let stdin = io::stdin();
  let stdout = io::stdout();
  let (processed, failed) =
    project_files(&projector, stdin.lock(), &mut stdout.lock()).await?;
  tracing::info!(processed, failed, "processed organization messages");
  Ok(())
}

/// Apply every message listed in `paths`, one JSON line per success on `out`.
/// A bad message is logged and skipped. Returns `(processed, failed)`.
async fn project_files<S: OrganizationStore>(
  projector: &OrganizationProjector<S>,
  paths: impl BufRead,
  out: &mut impl Write,
) -> anyhow::Result<(usize, usize)> {
  let (mut processed, mut failed) = (0, 0);
  for line in paths.lines() {
    let line = line.context("failed to read stdin")?;
    let path = line.trim();
    if path.is_empty() {
      continue;
    }
    match project_file(projector, Path::new(path)).await {
      Ok((id, outcome)) => {
        writeln!(out, "{}", json!({ "file": path, "id": id, "result": outcome }))?;
        processed += 1;
      }
      Err(err) => {
        tracing::error!(file = path, error = %format!("{err:#}"), "skipping message");
        failed += 1;
      }
    }
  }
  Ok((processed, failed))
}

async fn project_file<S: OrganizationStore>(
  projector: &OrganizationProjector<S>,
  path: &Path,
) -> anyhow::Result<(String, people_gismo::Outcome)> {
  let xml = read_message(path)?;
  let msg = parse_message(&xml).context("failed to parse message")?;
  let outcome = projector
    .apply(&msg, chrono::Utc::now())
    .await
    .context("failed to project message")?;
  Ok((msg.id, outcome))
}

/// Raw message bytes; `.gz` files are decompressed.
fn read_message(path: &Path) -> anyhow::Result<Vec<u8>> {
  let file = File::open(path).context("failed to open file")?;
  let mut xml = Vec::new();
  if path.extension().is_some_and(|ext| ext == "gz") {
    GzDecoder::new(file)
      .read_to_end(&mut xml)
      .context("failed to decompress file")?;
  } else {
    BufReader::new(file)
      .read_to_end(&mut xml)
      .context("failed to read file")?;
  }
  Ok(xml)
}

async fn put_person(store: SqliteStore, settings: &Settings) -> anyhow::Result<()> {
  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read stdin")?;
  let candidate: Person =
    serde_json::from_str(&input).context("stdin is not a JSON person")?;
  if candidate.identifiers.is_empty() {
    bail!("person has no identifiers");
  }

  let policy = settings.policy(MergePolicy::direct_write());
  let reconciled = reconcile(&store, candidate, &policy)
    .await
    .context("failed to reconcile person")?;
  tracing::info!(
    person = ?reconciled.person.id,
    was_created = reconciled.was_created,
    changed = reconciled.changed,
    "stored person"
  );
  println!("{}", serde_json::to_string(&reconciled.person)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
