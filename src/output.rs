use tabled::{Table, Tabled, settings::Style};

use crate::finding::{FileDeprecation, ReleaseDeprecation, Verdict};

/// Findings of a one-shot check, attributed to either releases or files
pub enum CheckFindings {
  Releases(Vec<ReleaseDeprecation>),
  Files(Vec<FileDeprecation>),
}

impl CheckFindings {
  pub fn verdicts(&self) -> Vec<&Verdict> {
    match self {
      CheckFindings::Releases(deprecations) => deprecations.iter().map(|d| &d.verdict).collect(),
      CheckFindings::Files(deprecations) => deprecations.iter().map(|d| &d.verdict).collect(),
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      CheckFindings::Releases(deprecations) => deprecations.is_empty(),
      CheckFindings::Files(deprecations) => deprecations.is_empty(),
    }
  }

  pub fn to_stdout_table(&self) -> String {
    match self {
      CheckFindings::Releases(deprecations) => render_table(deprecations),
      CheckFindings::Files(deprecations) => render_table(deprecations),
    }
  }
}

fn render_table<T: Tabled>(items: &[T]) -> String {
  if items.is_empty() {
    return String::new();
  }

  let mut table = Table::new(items);
  table.with(Style::sharp());

  format!("{table}\n")
}

/// One-line remediation advice for a single verdict
pub fn recommendation(verdict: &Verdict) -> String {
  let status = if verdict.removed { "removed" } else { "deprecated" };
  format!(
    "The {}: {} uses the {status} apiVersion: {}. Use {} instead.",
    verdict.kind, verdict.name, verdict.api_version, verdict.replacement_api,
  )
}

/// Print recommendation messages, optionally levelled by severity
pub fn report(findings: &CheckFindings, levelled: bool) {
  for verdict in findings.verdicts() {
    let message = recommendation(verdict);
    match (levelled, verdict.removed) {
      (true, true) => tracing::error!("{message}"),
      (true, false) => tracing::warn!("{message}"),
      (false, _) => println!("{message}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn verdict(removed: bool) -> Verdict {
    Verdict {
      kind: "Deployment".to_string(),
      api_version: "extensions/v1beta1".to_string(),
      name: "my-app".to_string(),
      k8s_version: "1.16.0".to_string(),
      deprecated: true,
      removed,
      removed_in_next_release: removed,
      removed_in_next_two_releases: removed,
      deprecated_in_version: "v1.9.0".to_string(),
      removed_in_version: "v1.16.0".to_string(),
      replacement_api: "apps/v1".to_string(),
    }
  }

  #[test]
  fn recommendation_mentions_status_and_replacement() {
    let message = recommendation(&verdict(false));
    assert_eq!(
      message,
      "The Deployment: my-app uses the deprecated apiVersion: extensions/v1beta1. Use apps/v1 instead."
    );

    let message = recommendation(&verdict(true));
    assert!(message.contains("uses the removed apiVersion"));
  }

  #[test]
  fn table_for_file_findings() {
    let findings = CheckFindings::Files(vec![FileDeprecation {
      file_name: "deployment.yaml".to_string(),
      verdict: verdict(false),
    }]);

    let table = findings.to_stdout_table();
    assert!(table.contains("File Name"));
    assert!(table.contains("deployment.yaml"));
    assert!(table.contains("Replacement API"));
  }

  #[test]
  fn table_for_release_findings() {
    let findings = CheckFindings::Releases(vec![ReleaseDeprecation {
      release_name: "alpha".to_string(),
      namespace: "default".to_string(),
      release_last_update: String::new(),
      verdict: verdict(true),
    }]);

    let table = findings.to_stdout_table();
    assert!(table.contains("Release Name"));
    assert!(table.contains("alpha"));
  }

  #[test]
  fn empty_findings_render_nothing() {
    let findings = CheckFindings::Files(vec![]);
    assert!(findings.to_stdout_table().is_empty());
    assert!(findings.is_empty());
  }
}
