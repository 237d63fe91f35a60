mod common;

use std::{
  collections::HashSet,
  sync::{Arc, atomic::Ordering},
  time::Duration,
};

use kdave::{
  scan::{self, RetryPolicy},
  schedule::Scheduler,
  snapshot::{self, SnapshotStore},
  version::Version,
};

use crate::common::{fixtures, mock_helm::MockReleaseSource};

/// Retry policy tuned for tests; production delays would dominate the suite
fn fast_retry(max_attempts: u32) -> RetryPolicy {
  RetryPolicy {
    max_attempts,
    base_delay: Duration::from_millis(1),
    multiplier: 2,
  }
}

fn cluster(version: &str) -> Version {
  version.parse().unwrap()
}

#[tokio::test]
async fn empty_release_list_yields_empty_outcome() {
  let source = Arc::new(MockReleaseSource::default());

  let outcome = scan::run_cycle(source, Arc::new(fixtures::rules()), cluster("1.19.0"), 4, fast_retry(1))
    .await
    .unwrap();

  assert!(outcome.deprecations.is_empty());
  assert!(outcome.release_stats.is_empty());

  let store = SnapshotStore::new();
  assert!(store.begin_cycle());
  store.publish(outcome.deprecations, outcome.release_stats, outcome.duration);
  assert_eq!(store.snapshot().number_deployed_releases, 0);
}

#[tokio::test]
async fn multi_page_scan_evaluates_every_release() {
  let source = Arc::new(MockReleaseSource {
    pages: fixtures::pages(vec![
      vec![fixtures::release("alpha", "default")],
      vec![fixtures::release("bravo", "default"), fixtures::release("charlie", "kube-system")],
    ]),
    objects: fixtures::mixed_fleet_objects(),
    ..Default::default()
  });

  let outcome = scan::run_cycle(
    Arc::clone(&source),
    Arc::new(fixtures::rules()),
    cluster("1.19.0"),
    4,
    fast_retry(1),
  )
  .await
  .unwrap();

  // Both pages were consumed
  assert_eq!(source.list_calls.load(Ordering::SeqCst), 2);
  assert_eq!(outcome.release_stats.len(), 3);

  // alpha carries a Deployment removed at 1.16, so at 1.19 it is removed
  assert_eq!(outcome.deprecations.len(), 1);
  let finding = &outcome.deprecations[0];
  assert_eq!(finding.release_name, "alpha");
  assert!(finding.verdict.deprecated);
  assert!(finding.verdict.removed);
  assert_eq!(finding.verdict.replacement_api, "apps/v1");

  let alpha = outcome.release_stats.iter().find(|stat| stat.release_name == "alpha").unwrap();
  assert!(alpha.has_deprecated_api_versions);
  assert!(alpha.has_removed_api_versions);

  // bravo migrated to apps/v1; charlie has no manifest and scans clean
  for name in ["bravo", "charlie"] {
    let stat = outcome.release_stats.iter().find(|stat| stat.release_name == name).unwrap();
    assert!(!stat.has_deprecated_api_versions);
    assert!(!stat.has_removed_api_versions);
  }

  let store = SnapshotStore::new();
  assert!(store.begin_cycle());
  store.publish(outcome.deprecations, outcome.release_stats, outcome.duration);

  let snapshot = store.snapshot();
  assert_eq!(snapshot.number_deployed_releases, 3);
  assert_eq!(snapshot.number_releases_with_deprecated_api_versions, 1);
  assert_eq!(snapshot.number_releases_with_removed_api_versions, 1);
}

#[tokio::test]
async fn scan_results_carry_no_duplicates() {
  // The same release listed on two pages must be evaluated without
  // duplicating its stat or findings in the merged outcome
  let source = Arc::new(MockReleaseSource {
    pages: fixtures::pages(vec![
      vec![fixtures::release("alpha", "default")],
      vec![fixtures::release("alpha", "default")],
    ]),
    objects: fixtures::mixed_fleet_objects(),
    ..Default::default()
  });

  let outcome = scan::run_cycle(source, Arc::new(fixtures::rules()), cluster("1.12.0"), 2, fast_retry(1))
    .await
    .unwrap();

  let names: HashSet<_> = outcome.release_stats.iter().map(|stat| &stat.release_name).collect();
  assert_eq!(outcome.release_stats.len(), names.len());
  assert_eq!(outcome.deprecations.len(), 1);
}

#[tokio::test]
async fn listing_recovers_within_the_retry_budget() {
  let source = Arc::new(MockReleaseSource {
    pages: fixtures::pages(vec![vec![fixtures::release("alpha", "default")]]),
    objects: fixtures::mixed_fleet_objects(),
    ..Default::default()
  });
  source.list_failures.store(3, Ordering::SeqCst);

  let outcome = scan::run_cycle(
    Arc::clone(&source),
    Arc::new(fixtures::rules()),
    cluster("1.12.0"),
    2,
    fast_retry(10),
  )
  .await
  .unwrap();

  assert_eq!(source.list_calls.load(Ordering::SeqCst), 4, "3 failures then success");
  assert_eq!(outcome.release_stats.len(), 1);
}

#[tokio::test]
async fn listing_failure_beyond_the_budget_fails_the_cycle() {
  let source = Arc::new(MockReleaseSource::default());
  source.list_failures.store(u32::MAX, Ordering::SeqCst);

  let result = scan::run_cycle(
    Arc::clone(&source),
    Arc::new(fixtures::rules()),
    cluster("1.12.0"),
    2,
    fast_retry(3),
  )
  .await;

  assert!(result.is_err());
  assert_eq!(source.list_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_release_is_skipped_without_aborting_the_scan() {
  let source = Arc::new(MockReleaseSource {
    pages: fixtures::pages(vec![vec![
      fixtures::release("alpha", "default"),
      fixtures::release("broken", "default"),
      fixtures::release("bravo", "default"),
    ]]),
    objects: fixtures::mixed_fleet_objects(),
    failing_releases: HashSet::from(["broken".to_string()]),
    ..Default::default()
  });

  let outcome = scan::run_cycle(source, Arc::new(fixtures::rules()), cluster("1.12.0"), 3, fast_retry(1))
    .await
    .unwrap();

  // The failed release contributes neither a stat nor findings
  assert_eq!(outcome.release_stats.len(), 2);
  assert!(outcome.release_stats.iter().all(|stat| stat.release_name != "broken"));
  assert_eq!(outcome.deprecations.len(), 1);
}

fn scheduler(source: Arc<MockReleaseSource>, store: SnapshotStore, dir: &std::path::Path) -> Scheduler<MockReleaseSource> {
  Scheduler {
    store,
    source,
    versions_file: fixtures::rules_file(dir),
    cluster_version: cluster("1.19.0"),
    workers: 2,
    retry: fast_retry(2),
    interval: Duration::from_secs(3600),
    data_file: dir.join("data.json").to_string_lossy().into_owned(),
  }
}

#[tokio::test]
async fn tick_runs_only_when_a_refresh_is_requested() {
  let tmp = tempfile::tempdir().unwrap();
  let source = Arc::new(MockReleaseSource {
    pages: fixtures::pages(vec![vec![fixtures::release("alpha", "default")]]),
    objects: fixtures::mixed_fleet_objects(),
    ..Default::default()
  });
  let store = SnapshotStore::new();
  let scheduler = scheduler(Arc::clone(&source), store.clone(), tmp.path());

  scheduler.tick().await;
  assert_eq!(source.list_calls.load(Ordering::SeqCst), 0, "no request, no scan");

  store.request_refresh();
  scheduler.tick().await;

  let snapshot = store.snapshot();
  assert!(!snapshot.refresh_requested, "request consumed");
  assert!(!snapshot.processing);
  assert_eq!(snapshot.number_deployed_releases, 1);
  assert_eq!(snapshot.number_releases_with_removed_api_versions, 1);
  assert!(snapshot.last_run.is_some());
}

#[tokio::test]
async fn cycle_persists_a_durable_copy() {
  let tmp = tempfile::tempdir().unwrap();
  let source = Arc::new(MockReleaseSource {
    pages: fixtures::pages(vec![vec![fixtures::release("alpha", "default")]]),
    objects: fixtures::mixed_fleet_objects(),
    ..Default::default()
  });
  let store = SnapshotStore::new();
  let scheduler = scheduler(source, store.clone(), tmp.path());

  store.request_refresh();
  scheduler.tick().await;

  let cached = snapshot::load_cache(&scheduler.data_file).expect("durable copy written after the cycle");
  assert_eq!(cached.deprecations, store.snapshot().deprecations);
  assert_eq!(cached.release_stats, store.snapshot().release_stats);
  assert_eq!(cached.last_run, store.snapshot().last_run);
}

#[tokio::test]
async fn fresh_durable_copy_replaces_the_scan() {
  let tmp = tempfile::tempdir().unwrap();
  let source = Arc::new(MockReleaseSource {
    pages: fixtures::pages(vec![vec![fixtures::release("alpha", "default")]]),
    objects: fixtures::mixed_fleet_objects(),
    ..Default::default()
  });

  // First process scans and persists
  let first_store = SnapshotStore::new();
  let first = scheduler(Arc::clone(&source), first_store.clone(), tmp.path());
  first_store.request_refresh();
  first.tick().await;
  let scans_so_far = source.list_calls.load(Ordering::SeqCst);

  // A restarted process finds the fresh copy and skips the scan entirely
  let second_store = SnapshotStore::new();
  let second = scheduler(Arc::clone(&source), second_store.clone(), tmp.path());
  second_store.request_refresh();
  second.tick().await;

  assert_eq!(source.list_calls.load(Ordering::SeqCst), scans_so_far, "cache hit must not re-list");
  assert_eq!(second_store.snapshot().deprecations, first_store.snapshot().deprecations);
  assert_eq!(second_store.snapshot().last_run, first_store.snapshot().last_run);
  assert!(!second_store.snapshot().processing);
}

#[tokio::test]
async fn failed_cycle_keeps_the_previous_snapshot() {
  let tmp = tempfile::tempdir().unwrap();
  let source = Arc::new(MockReleaseSource {
    pages: fixtures::pages(vec![vec![fixtures::release("alpha", "default")]]),
    objects: fixtures::mixed_fleet_objects(),
    ..Default::default()
  });
  let store = SnapshotStore::new();
  let scheduler = scheduler(Arc::clone(&source), store.clone(), tmp.path());

  store.request_refresh();
  scheduler.tick().await;
  let before = store.snapshot();
  assert_eq!(before.number_deployed_releases, 1);

  // Expire the durable copy so the next cycle must scan, then make listing fail
  std::fs::remove_file(&scheduler.data_file).unwrap();
  source.list_failures.store(u32::MAX, Ordering::SeqCst);
  store.request_refresh();
  scheduler.tick().await;

  let after = store.snapshot();
  assert!(!after.processing, "slot released after the failed cycle");
  assert_eq!(after.deprecations, before.deprecations, "previous results remain served");
  assert_eq!(after.release_stats, before.release_stats);
  assert_eq!(after.last_run, before.last_run, "a failed cycle must not refresh last_run");
}
