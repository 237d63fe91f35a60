use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
  finding::{K8sObject, Verdict},
  version::Version,
};

pub const DEFAULT_VERSIONS_FILE: &str = "config/versions.yaml";

/// A single deprecation/removal fact for a (kind, apiVersion) pair
///
/// Thresholds are parsed once at load time so that malformed rule files fail
/// fast, before any scan starts. The raw strings are kept for display
#[derive(Clone, Debug)]
pub struct Rule {
  pub kind: String,
  pub api_version: String,
  pub deprecated_in: Option<Version>,
  pub removed_in: Option<Version>,
  pub deprecated_in_raw: Option<String>,
  pub removed_in_raw: Option<String>,
  pub replacement_api: Option<String>,
}

/// Rule entry as it appears in the versions file, under `deprecatedVersions`
///
/// Empty strings mean "unset/never" for the optional fields
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
  kind: String,
  version: String,
  #[serde(default)]
  deprecated_in_version: String,
  #[serde(default)]
  removed_in_version: String,
  #[serde(default)]
  replacement_api: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionsFile {
  deprecated_versions: Vec<RawRule>,
}

/// Immutable index of deprecation rules, keyed by kind
#[derive(Clone, Debug, Default)]
pub struct RuleTable {
  rules: HashMap<String, Vec<Rule>>,
}

impl RuleTable {
  /// Load the rule table from a versions file
  ///
  /// A missing file is a fatal configuration error. `$HOME/.kdave/versions.yaml`
  /// takes precedence over the provided path when it exists
  pub fn load(path: &str) -> Result<Self> {
    let home_override = std::env::var("HOME")
      .ok()
      .map(|home| format!("{home}/.kdave/versions.yaml"))
      .filter(|p| Path::new(p).exists());
    let path = home_override.as_deref().unwrap_or(path);

    if !Path::new(path).is_file() {
      anyhow::bail!("Versions file {path} doesn't exist");
    }

    let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read versions file: {path}"))?;
    Self::from_yaml(&contents).with_context(|| format!("Failed to parse versions file: {path}"))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let file: VersionsFile = serde_yaml::from_str(contents)?;

    let mut rules: HashMap<String, Vec<Rule>> = HashMap::new();
    for raw in file.deprecated_versions {
      let rule = Rule {
        deprecated_in: parse_threshold(&raw.deprecated_in_version, &raw.kind)?,
        removed_in: parse_threshold(&raw.removed_in_version, &raw.kind)?,
        deprecated_in_raw: non_empty(&raw.deprecated_in_version),
        removed_in_raw: non_empty(&raw.removed_in_version),
        replacement_api: non_empty(&raw.replacement_api),
        kind: raw.kind,
        api_version: raw.version,
      };
      rules.entry(rule.kind.clone()).or_default().push(rule);
    }

    Ok(Self { rules })
  }

  /// Find the rule matching a (kind, apiVersion) pair exactly, if any
  pub fn lookup(&self, kind: &str, api_version: &str) -> Option<&Rule> {
    self
      .rules
      .get(kind)?
      .iter()
      .find(|rule| rule.api_version == api_version)
  }

  /// Evaluate one object against the rule table at a given cluster version
  ///
  /// Returns `None` when the object's apiVersion is neither deprecated nor
  /// removed at `cluster_version` - callers must not emit empty records.
  /// Pure: no I/O, no shared state, safe for unlimited concurrent invocation
  pub fn evaluate(&self, object: &K8sObject, cluster_version: Version) -> Option<Verdict> {
    let rule = self.lookup(&object.kind, &object.api_version)?;

    let deprecated = triggers(rule.deprecated_in, cluster_version);
    let removed = triggers(rule.removed_in, cluster_version);

    if !deprecated && !removed {
      return None;
    }

    Some(Verdict {
      kind: object.kind.clone(),
      api_version: object.api_version.clone(),
      name: object.name.clone(),
      k8s_version: cluster_version.to_string(),
      deprecated,
      removed,
      removed_in_next_release: triggers(rule.removed_in, cluster_version.with_minor_offset(1)),
      removed_in_next_two_releases: triggers(rule.removed_in, cluster_version.with_minor_offset(2)),
      replacement_api: display_or_na(&rule.replacement_api),
      deprecated_in_version: display_or_na(&rule.deprecated_in_raw),
      removed_in_version: display_or_na(&rule.removed_in_raw),
    })
  }
}

/// A threshold triggers when the cluster version is at or beyond it (>=, not >)
fn triggers(threshold: Option<Version>, cluster_version: Version) -> bool {
  match threshold {
    Some(threshold) => cluster_version >= threshold,
    None => false,
  }
}

fn parse_threshold(value: &str, kind: &str) -> Result<Option<Version>> {
  if value.is_empty() {
    return Ok(None);
  }
  let version = value
    .parse()
    .with_context(|| format!("Invalid version '{value}' in rule for kind {kind}"))?;
  Ok(Some(version))
}

fn non_empty(value: &str) -> Option<String> {
  if value.is_empty() { None } else { Some(value.to_string()) }
}

fn display_or_na(value: &Option<String>) -> String {
  value.clone().unwrap_or_else(|| "n/a".to_string())
}
