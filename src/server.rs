use std::{fmt::Write, time::Duration};

use axum::{
  Router,
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::get,
};

use crate::snapshot::{Snapshot, SnapshotStore};

#[derive(Clone)]
pub struct AppState {
  pub store: SnapshotStore,
  pub interval: Duration,
  pub delay: Duration,
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/metrics", get(metrics))
    .route("/health", get(health))
    .with_state(state)
}

/// Serve the current snapshot as Prometheus text exposition
///
/// Reading the metrics is also the refresh trigger: a stale or never-built
/// snapshot flags the scheduler, while the response itself always reflects
/// whatever snapshot exists right now - it never waits for an in-flight scan
async fn metrics(State(state): State<AppState>) -> Response {
  let snapshot = state.store.snapshot_requesting_refresh(state.interval);
  let body = render_metrics(&snapshot);

  ([("content-type", "text/plain; version=0.0.4")], body).into_response()
}

/// Liveness of the scan job: unhealthy once the snapshot has outlived
/// interval plus the accepted delay
async fn health(State(state): State<AppState>) -> Response {
  if state.store.is_healthy(state.interval, state.delay) {
    (StatusCode::OK, "OK").into_response()
  } else {
    let accepted = state.interval + state.delay;
    tracing::error!("The helm check releases job didn't run for {accepted:?}");
    (
      StatusCode::SERVICE_UNAVAILABLE,
      format!("The helm check releases job didn't run for {accepted:?}"),
    )
      .into_response()
  }
}

pub fn render_metrics(snapshot: &Snapshot) -> String {
  let mut out = String::new();

  let _ = writeln!(out, "# HELP kdave_deprecated_version_info Deprecated API versions");
  let _ = writeln!(out, "# TYPE kdave_deprecated_version_info gauge");
  for deprecation in &snapshot.deprecations {
    let verdict = &deprecation.verdict;
    let labels = [
      ("deprecated", verdict.deprecated.to_string()),
      ("removed", verdict.removed.to_string()),
      ("kind", verdict.kind.clone()),
      ("api_version", verdict.api_version.clone()),
      ("name", verdict.name.clone()),
      ("release_name", deprecation.release_name.clone()),
      ("namespace", deprecation.namespace.clone()),
      ("replacement_api", verdict.replacement_api.clone()),
      ("deprecated_in_version", verdict.deprecated_in_version.clone()),
      ("removed_in_version", verdict.removed_in_version.clone()),
      ("release_last_update", deprecation.release_last_update.clone()),
      ("k8s_version", verdict.k8s_version.clone()),
      ("removed_in_next_release", verdict.removed_in_next_release.to_string()),
      (
        "removed_in_next_2_releases",
        verdict.removed_in_next_two_releases.to_string(),
      ),
    ];
    let _ = writeln!(out, "kdave_deprecated_version_info{{{}}} 1", format_labels(&labels));
  }

  let last_run = snapshot
    .last_run
    .map(|last_run| last_run.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    .unwrap_or_default();
  let _ = writeln!(out, "# HELP kdave_job_info Deprecated API versions job information");
  let _ = writeln!(out, "# TYPE kdave_job_info gauge");
  let job_labels = [
    ("last_run", last_run),
    ("duration_seconds", snapshot.duration_seconds.to_string()),
  ];
  let _ = writeln!(out, "kdave_job_info{{{}}} 1", format_labels(&job_labels));

  let gauges = [
    (
      "kdave_deployed_releases",
      "Total number of the deployed releases",
      snapshot.number_deployed_releases,
    ),
    (
      "kdave_deployed_releases_with_deprecated_api_version",
      "Total number of the deployed releases that have deprecated apiVersions",
      snapshot.number_releases_with_deprecated_api_versions,
    ),
    (
      "kdave_deployed_releases_with_removed_api_version",
      "Total number of the deployed releases that have removed apiVersions",
      snapshot.number_releases_with_removed_api_versions,
    ),
  ];
  for (name, help, value) in gauges {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
  }

  out
}

fn format_labels(labels: &[(&str, String)]) -> String {
  labels
    .iter()
    .map(|(key, value)| format!("{key}=\"{}\"", escape_label(value)))
    .collect::<Vec<_>>()
    .join(",")
}

/// Escape per the Prometheus text format: backslash, double quote, newline
fn escape_label(value: &str) -> String {
  value
    .replace('\\', "\\\\")
    .replace('"', "\\\"")
    .replace('\n', "\\n")
}
