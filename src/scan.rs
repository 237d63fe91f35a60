use std::{
  collections::HashSet,
  hash::Hash,
  sync::Arc,
  time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tokio::sync::{Mutex, mpsc};

use crate::{
  clients::{ReleaseIdentity, ReleaseSource},
  finding::{ReleaseDeprecation, ReleaseStat},
  rules::RuleTable,
  version::Version,
};

/// Bound on the release queue; the producer backpressures against slow workers
const QUEUE_DEPTH: usize = 64;

/// Explicit retry policy for the release listing call
///
/// Retry lives at this one call site only: listing failures are transient
/// (the collaborator is an external process), while per-release failures are
/// skipped rather than retried
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub multiplier: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 10,
      base_delay: Duration::from_secs(5),
      multiplier: 2,
    }
  }
}

/// Merged results of one scan cycle
#[derive(Clone, Debug, Default)]
pub struct ScanOutcome {
  pub deprecations: Vec<ReleaseDeprecation>,
  pub release_stats: Vec<ReleaseStat>,
  pub duration: Duration,
}

/// Run one full scan cycle: enumerate releases, evaluate, merge
///
/// The producer drains every page of the release source into a bounded
/// channel; dropping the sender is the "no more items" signal, so workers
/// exit exactly when the queue is empty *and* production has finished - there
/// is no window where a worker can observe a momentarily empty queue and quit
/// early. Workers accumulate into cycle-local buffers; merging happens once,
/// after all workers have joined
pub async fn run_cycle<S>(
  source: Arc<S>,
  rules: Arc<RuleTable>,
  cluster_version: Version,
  workers: usize,
  retry: RetryPolicy,
) -> Result<ScanOutcome>
where
  S: ReleaseSource + Send + Sync + 'static,
{
  let start = Instant::now();

  let (tx, rx) = mpsc::channel::<ReleaseIdentity>(QUEUE_DEPTH);
  let rx = Arc::new(Mutex::new(rx));

  let producer = tokio::spawn({
    let source = Arc::clone(&source);
    async move {
      let mut offset: Option<String> = None;
      let mut total = 0usize;

      loop {
        let page = list_with_retry(source.as_ref(), offset.clone(), retry).await?;
        for release in page.releases {
          total += 1;
          if tx.send(release).await.is_err() {
            // All workers gone; nothing left to feed
            return Ok(total);
          }
        }

        match page.next {
          Some(next) => offset = Some(next),
          None => break,
        }
      }

      Ok::<usize, anyhow::Error>(total)
    }
  });

  let worker_handles: Vec<_> = (0..workers.max(1))
    .map(|_| {
      let rx = Arc::clone(&rx);
      let source = Arc::clone(&source);
      let rules = Arc::clone(&rules);
      tokio::spawn(worker(rx, source, rules, cluster_version))
    })
    .collect();

  let mut deprecations = vec![];
  let mut release_stats = vec![];
  let mut seen_deprecations = HashSet::new();
  let mut seen_stats = HashSet::new();

  for handle in worker_handles {
    let (worker_deprecations, worker_stats) = handle.await.context("scan worker panicked")?;
    merge_unique(worker_deprecations, &mut deprecations, &mut seen_deprecations);
    merge_unique(worker_stats, &mut release_stats, &mut seen_stats);
  }

  let total = producer.await.context("release producer panicked")??;
  tracing::info!(
    "Scan cycle complete: {total} releases listed, {} scanned, {} deprecations",
    release_stats.len(),
    deprecations.len(),
  );

  Ok(ScanOutcome {
    deprecations,
    release_stats,
    duration: start.elapsed(),
  })
}

/// Worker loop: dequeue, fetch deployed objects, evaluate, buffer locally
///
/// A failed fetch skips the release - it contributes neither verdicts nor a
/// release stat, and never aborts the pool
async fn worker<S>(
  rx: Arc<Mutex<mpsc::Receiver<ReleaseIdentity>>>,
  source: Arc<S>,
  rules: Arc<RuleTable>,
  cluster_version: Version,
) -> (Vec<ReleaseDeprecation>, Vec<ReleaseStat>)
where
  S: ReleaseSource + Send + Sync,
{
  let mut deprecations = vec![];
  let mut release_stats = vec![];

  loop {
    // Hold the receiver lock only for the dequeue, not the fetch
    let release = { rx.lock().await.recv().await };
    let Some(release) = release else {
      break;
    };

    let objects = match source.get_release_objects(&release.name, Some(&release.namespace)).await {
      Ok(objects) => objects,
      Err(err) => {
        tracing::warn!("Skipping release {}: {err:#}", release.name);
        continue;
      }
    };

    tracing::info!("Checking the used apiVersions for release: {}", release.name);

    let mut has_deprecated = false;
    let mut has_removed = false;
    for object in &objects {
      if let Some(verdict) = rules.evaluate(object, cluster_version) {
        has_deprecated |= verdict.deprecated;
        has_removed |= verdict.removed;
        deprecations.push(ReleaseDeprecation {
          release_name: release.name.clone(),
          namespace: release.namespace.clone(),
          release_last_update: release.last_updated.clone(),
          verdict,
        });
      }
    }

    release_stats.push(ReleaseStat {
      release_name: release.name,
      has_deprecated_api_versions: has_deprecated,
      has_removed_api_versions: has_removed,
    });
  }

  (deprecations, release_stats)
}

async fn list_with_retry<S: ReleaseSource>(source: &S, offset: Option<String>, retry: RetryPolicy) -> Result<crate::clients::ReleasePage> {
  let mut delay = retry.base_delay;

  for attempt in 1..=retry.max_attempts.max(1) {
    match source.list_releases(offset.clone()).await {
      Ok(page) => return Ok(page),
      Err(err) if attempt == retry.max_attempts.max(1) => {
        return Err(err).with_context(|| format!("Failed to list releases after {attempt} attempts"));
      }
      Err(err) => {
        tracing::warn!("Failed to list releases (attempt {attempt}): {err:#}");
        tracing::warn!("Retrying in {delay:?}");
        tokio::time::sleep(delay).await;
        delay *= retry.multiplier;
      }
    }
  }

  unreachable!("retry loop returns on the final attempt")
}

/// Append-if-absent merge keyed by structural equality
fn merge_unique<T: Clone + Eq + Hash>(items: Vec<T>, merged: &mut Vec<T>, seen: &mut HashSet<T>) {
  for item in items {
    if seen.insert(item.clone()) {
      merged.push(item);
    }
  }
}
