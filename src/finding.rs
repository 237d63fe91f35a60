use serde::{Deserialize, Serialize};
use tabled::Tabled;

/// One deployed (or templated) Kubernetes object to evaluate
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct K8sObject {
  pub kind: String,
  pub api_version: String,
  pub name: String,
}

/// The evaluated deprecation/removal status for one concrete object
///
/// Produced by the rule table only when at least one axis triggers; immutable
/// once produced. Display-only fields carry `n/a` when the rule left them unset
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Tabled)]
pub struct Verdict {
  #[tabled(rename = "Kind")]
  pub kind: String,
  #[tabled(rename = "API Version")]
  pub api_version: String,
  #[tabled(rename = "Name")]
  pub name: String,
  #[tabled(skip)]
  pub k8s_version: String,
  #[tabled(rename = "Deprecated")]
  pub deprecated: bool,
  #[tabled(rename = "Removed")]
  pub removed: bool,
  #[tabled(skip)]
  pub removed_in_next_release: bool,
  #[tabled(skip)]
  pub removed_in_next_two_releases: bool,
  #[tabled(rename = "Deprecated In Version")]
  pub deprecated_in_version: String,
  #[tabled(rename = "Removed In Version")]
  pub removed_in_version: String,
  #[tabled(rename = "Replacement API")]
  pub replacement_api: String,
}

/// A verdict attributed to the deployed release it was found in
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Tabled)]
pub struct ReleaseDeprecation {
  #[tabled(rename = "Release Name")]
  pub release_name: String,
  #[tabled(skip)]
  pub namespace: String,
  #[tabled(skip)]
  pub release_last_update: String,
  #[serde(flatten)]
  #[tabled(inline)]
  pub verdict: Verdict,
}

/// A verdict attributed to the manifest file it was found in
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Tabled)]
pub struct FileDeprecation {
  #[tabled(rename = "File Name")]
  pub file_name: String,
  #[serde(flatten)]
  #[tabled(inline)]
  pub verdict: Verdict,
}

/// Per-release rollup: does the release contain any deprecated/removed apiVersion
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseStat {
  pub release_name: String,
  pub has_deprecated_api_versions: bool,
  pub has_removed_api_versions: bool,
}

/// Worst finding across a set of verdicts, in exit-code precedence order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
  Clean,
  Deprecated,
  RemovedInNextRelease,
  Removed,
}

impl Severity {
  pub fn of<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> Self {
    let mut worst = Severity::Clean;
    for verdict in verdicts {
      let severity = if verdict.removed {
        Severity::Removed
      } else if verdict.removed_in_next_release {
        Severity::RemovedInNextRelease
      } else {
        Severity::Deprecated
      };
      worst = worst.max(severity);
    }

    worst
  }
}

/// Caller-supplied exit codes for the `check` command
///
/// Defaults keep deprecated-only and removed-in-next-release findings
/// non-fatal so CI pipelines opt in to failing on them
#[derive(Clone, Copy, Debug)]
pub struct ExitCodes {
  pub deprecated: u8,
  pub removed_in_next_release: u8,
  pub removed: u8,
}

impl Default for ExitCodes {
  fn default() -> Self {
    Self {
      deprecated: 0,
      removed_in_next_release: 0,
      removed: 10,
    }
  }
}

impl ExitCodes {
  pub fn for_severity(&self, severity: Severity) -> u8 {
    match severity {
      Severity::Clean => 0,
      Severity::Deprecated => self.deprecated,
      Severity::RemovedInNextRelease => self.removed_in_next_release,
      Severity::Removed => self.removed,
    }
  }
}
