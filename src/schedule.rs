use std::{sync::Arc, time::Duration};

use anyhow::Result;

use crate::{
  clients::ReleaseSource,
  rules::RuleTable,
  scan::{self, RetryPolicy},
  snapshot::{self, SnapshotStore},
  version::Version,
};

/// Polling period of the control loop
const TICK: Duration = Duration::from_secs(2);

/// Single owner of the transition into a running scan cycle
///
/// Only this loop may start a cycle, so the at-most-one-concurrent-scan
/// invariant is structural: a refresh request observed mid-cycle is consumed
/// by the next free slot, never by a second concurrent run
pub struct Scheduler<S> {
  pub store: SnapshotStore,
  pub source: Arc<S>,
  pub versions_file: String,
  pub cluster_version: Version,
  pub workers: usize,
  pub retry: RetryPolicy,
  pub interval: Duration,
  pub data_file: String,
}

impl<S> Scheduler<S>
where
  S: ReleaseSource + Send + Sync + 'static,
{
  /// Run the control loop
  pub async fn run(&self) {
    loop {
      tokio::time::sleep(TICK).await;
      self.tick().await;
    }
  }

  /// One scheduler tick: start a cycle when one is requested and none is running
  pub async fn tick(&self) {
    if !self.store.snapshot().refresh_requested {
      return;
    }
    if !self.store.begin_cycle() {
      return;
    }

    tracing::info!("Fetching helm releases to update the current data");
    if let Err(err) = self.cycle().await {
      tracing::error!("Scan cycle failed: {err:#}");
      self.store.abort_cycle();
    }
  }

  /// One end-to-end cycle: cache check, scan, publish, persist
  async fn cycle(&self) -> Result<()> {
    // A fresh durable copy replaces the expensive scan entirely
    if let Some(cached) = snapshot::fresh_cache(&self.data_file, self.interval) {
      tracing::info!("Loading data from data file: {}", self.data_file);
      self.store.restore(cached);
      return Ok(());
    }

    let rules = Arc::new(RuleTable::load(&self.versions_file)?);
    let outcome = scan::run_cycle(
      Arc::clone(&self.source),
      rules,
      self.cluster_version,
      self.workers,
      self.retry,
    )
    .await?;

    self
      .store
      .publish(outcome.deprecations, outcome.release_stats, outcome.duration);

    tracing::info!("Writing data to data file: {}", self.data_file);
    if let Err(err) = snapshot::persist(&self.data_file, &self.store.snapshot()) {
      tracing::warn!("Failed to persist snapshot (in-memory data remains authoritative): {err:#}");
    }

    Ok(())
  }
}
