use std::collections::HashMap;

use kdave::{
  clients::{ReleaseIdentity, ReleasePage},
  finding::K8sObject,
  rules::RuleTable,
};

pub const RULES_YAML: &str = r#"
deprecatedVersions:
  - kind: Deployment
    version: extensions/v1beta1
    deprecatedInVersion: v1.9.0
    removedInVersion: v1.16.0
    replacementApi: apps/v1
  - kind: Ingress
    version: extensions/v1beta1
    deprecatedInVersion: v1.14.0
    removedInVersion: v1.22.0
    replacementApi: networking.k8s.io/v1
"#;

pub fn rules() -> RuleTable {
  RuleTable::from_yaml(RULES_YAML).unwrap()
}

/// Write the fixture rules to a file, for code paths that load from disk
pub fn rules_file(dir: &std::path::Path) -> String {
  let path = dir.join("versions.yaml");
  std::fs::write(&path, RULES_YAML).unwrap();
  path.to_string_lossy().into_owned()
}

pub fn release(name: &str, namespace: &str) -> ReleaseIdentity {
  ReleaseIdentity {
    name: name.to_string(),
    namespace: namespace.to_string(),
    last_updated: "Mon Jan 10 14:00:00 2022".to_string(),
  }
}

pub fn object(kind: &str, api_version: &str, name: &str) -> K8sObject {
  K8sObject {
    kind: kind.to_string(),
    api_version: api_version.to_string(),
    name: name.to_string(),
  }
}

/// Chain pages together with index-based continuation tokens
pub fn pages(page_releases: Vec<Vec<ReleaseIdentity>>) -> Vec<ReleasePage> {
  let count = page_releases.len();

  page_releases
    .into_iter()
    .enumerate()
    .map(|(index, releases)| ReleasePage {
      releases,
      next: if index + 1 < count { Some((index + 1).to_string()) } else { None },
    })
    .collect()
}

/// Deployed objects for a typical mixed fleet: one release with a deprecated
/// (and at 1.19, removed) Deployment, one clean release
pub fn mixed_fleet_objects() -> HashMap<String, Vec<K8sObject>> {
  HashMap::from([
    (
      "alpha".to_string(),
      vec![
        object("Deployment", "extensions/v1beta1", "alpha-app"),
        object("Service", "v1", "alpha-svc"),
      ],
    ),
    ("bravo".to_string(), vec![object("Deployment", "apps/v1", "bravo-app")]),
  ])
}
