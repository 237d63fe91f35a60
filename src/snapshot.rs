use std::{
  path::Path,
  sync::{Arc, RwLock},
  time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::finding::{ReleaseDeprecation, ReleaseStat};

/// The shared result set the metrics and health surfaces read from
///
/// The `processing`/`refresh_requested` flags are in-memory lifecycle state
/// and are not part of the durable copy
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
  pub deprecations: Vec<ReleaseDeprecation>,
  pub release_stats: Vec<ReleaseStat>,
  pub number_deployed_releases: usize,
  pub number_releases_with_deprecated_api_versions: usize,
  pub number_releases_with_removed_api_versions: usize,
  pub last_run: Option<DateTime<Utc>>,
  pub duration_seconds: u64,
  #[serde(skip)]
  pub processing: bool,
  #[serde(skip)]
  pub refresh_requested: bool,
}

impl Snapshot {
  fn from_results(deprecations: Vec<ReleaseDeprecation>, release_stats: Vec<ReleaseStat>, duration: Duration) -> Self {
    Self {
      number_deployed_releases: release_stats.len(),
      number_releases_with_deprecated_api_versions: release_stats
        .iter()
        .filter(|stat| stat.has_deprecated_api_versions)
        .count(),
      number_releases_with_removed_api_versions: release_stats
        .iter()
        .filter(|stat| stat.has_removed_api_versions)
        .count(),
      deprecations,
      release_stats,
      last_run: None,
      duration_seconds: duration.as_secs(),
      processing: false,
      refresh_requested: false,
    }
  }

  /// Whether the snapshot is older than `interval` (a never-run snapshot is stale)
  pub fn is_stale(&self, interval: Duration) -> bool {
    match self.last_run {
      Some(last_run) => age(last_run) >= interval,
      None => true,
    }
  }
}

fn age(last_run: DateTime<Utc>) -> Duration {
  Utc::now()
    .signed_duration_since(last_run)
    .to_std()
    .unwrap_or(Duration::ZERO)
}

/// Lock-guarded owner of the one shared [`Snapshot`]
///
/// The lock never escapes this type: callers only get atomic read-copies and
/// whole-snapshot replacement, so readers observe either the pre-cycle or
/// post-cycle state, never a partially merged one. Critical sections are
/// field assignments; all expensive work happens outside the lock
#[derive(Clone, Default)]
pub struct SnapshotStore {
  inner: Arc<RwLock<Snapshot>>,
}

impl SnapshotStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Atomic read-copy of the current snapshot
  pub fn snapshot(&self) -> Snapshot {
    self.inner.read().expect("snapshot lock poisoned").clone()
  }

  /// Flag that the next scheduler tick should run a scan cycle
  ///
  /// Idempotent: repeated calls while a refresh is pending or active only
  /// keep the flag set
  pub fn request_refresh(&self) {
    self.inner.write().expect("snapshot lock poisoned").refresh_requested = true;
  }

  /// Read-copy for the metrics surface: marks a refresh as requested when the
  /// snapshot has never been built or is older than `interval`
  ///
  /// The returned copy is taken before the flag flip; the internal lifecycle
  /// state does not leak into the response
  pub fn snapshot_requesting_refresh(&self, interval: Duration) -> Snapshot {
    let mut guard = self.inner.write().expect("snapshot lock poisoned");
    let copy = guard.clone();
    if guard.is_stale(interval) {
      guard.refresh_requested = true;
    }

    copy
  }

  /// Claim the single scan slot
  ///
  /// Returns false while another cycle is processing; the at-most-one-cycle
  /// invariant lives here. On success the refresh flag is consumed.
  /// `last_run` is untouched until the cycle completes, so a failed cycle
  /// cannot make stale data look fresh
  pub fn begin_cycle(&self) -> bool {
    let mut guard = self.inner.write().expect("snapshot lock poisoned");
    if guard.processing {
      return false;
    }

    guard.processing = true;
    guard.refresh_requested = false;

    true
  }

  /// Replace the snapshot wholesale with the results of a completed cycle,
  /// stamping `last_run` at publication
  pub fn publish(&self, deprecations: Vec<ReleaseDeprecation>, release_stats: Vec<ReleaseStat>, duration: Duration) {
    let mut next = Snapshot::from_results(deprecations, release_stats, duration);
    next.last_run = Some(Utc::now());

    let mut guard = self.inner.write().expect("snapshot lock poisoned");
    *guard = next;
  }

  /// Replace the snapshot with a rehydrated durable copy (cache hit)
  pub fn restore(&self, snapshot: Snapshot) {
    let mut guard = self.inner.write().expect("snapshot lock poisoned");
    *guard = Snapshot {
      processing: false,
      refresh_requested: false,
      ..snapshot
    };
  }

  /// Release the scan slot after a failed cycle, leaving the previous
  /// results and `last_run` untouched
  pub fn abort_cycle(&self) {
    let mut guard = self.inner.write().expect("snapshot lock poisoned");
    guard.processing = false;
  }

  pub fn is_stale(&self, interval: Duration) -> bool {
    self.inner.read().expect("snapshot lock poisoned").is_stale(interval)
  }

  /// Health gate: unhealthy only when a run exists and is older than
  /// `interval + delay`. The grace window absorbs one missed tick plus a
  /// worst-case scan. A process that has not scanned yet is healthy
  pub fn is_healthy(&self, interval: Duration, delay: Duration) -> bool {
    let guard = self.inner.read().expect("snapshot lock poisoned");
    match guard.last_run {
      Some(last_run) => age(last_run) < interval + delay,
      None => true,
    }
  }
}

/// Load the durable snapshot copy; absent, empty, or unparsable is "no cache"
pub fn load_cache(path: &str) -> Option<Snapshot> {
  let contents = std::fs::read_to_string(path).ok()?;
  if contents.trim().is_empty() {
    return None;
  }

  match serde_json::from_str(&contents) {
    Ok(snapshot) => Some(snapshot),
    Err(err) => {
      tracing::warn!("Ignoring unparsable data file {path}: {err}");
      None
    }
  }
}

/// Load the durable copy only if it is still fresh relative to `interval`
pub fn fresh_cache(path: &str, interval: Duration) -> Option<Snapshot> {
  load_cache(path).filter(|snapshot| !snapshot.is_stale(interval))
}

/// Write the durable snapshot copy; callers treat failure as non-fatal
pub fn persist(path: &str, snapshot: &Snapshot) -> Result<()> {
  if let Some(parent) = Path::new(path).parent() {
    if !parent.as_os_str().is_empty() {
      std::fs::create_dir_all(parent).with_context(|| format!("Failed to create data directory for {path}"))?;
    }
  }

  let contents = serde_json::to_string(snapshot)?;
  std::fs::write(path, contents).with_context(|| format!("Failed to write data file: {path}"))?;

  Ok(())
}
