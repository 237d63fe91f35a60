use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::finding::K8sObject;

/// Kubernetes object header, the only part of a manifest the scanner reads
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectHeader {
  kind: String,
  api_version: String,
  metadata: ObjectMetadata,
}

#[derive(Debug, Deserialize)]
struct ObjectMetadata {
  name: String,
}

/// Extract object headers from a (possibly multi-document) YAML string
///
/// Documents that are not Kubernetes objects (helm release bookkeeping, null
/// documents, comment-only fragments) are skipped rather than rejected
pub fn objects_from_yaml(contents: &str) -> Result<Vec<K8sObject>> {
  let mut objects = vec![];

  for document in serde_yaml::Deserializer::from_str(contents) {
    let value = serde_yaml::Value::deserialize(document).context("Failed to parse yaml document")?;
    if value.is_null() {
      continue;
    }

    // Anything without the object header keys is not an object manifest
    let Ok(header) = serde_yaml::from_value::<ObjectHeader>(value) else {
      continue;
    };

    objects.push(K8sObject {
      kind: header.kind,
      api_version: header.api_version,
      name: header.metadata.name,
    });
  }

  Ok(objects)
}

/// Read object headers from one manifest file
pub fn objects_from_file(path: &Path) -> Result<Vec<K8sObject>> {
  let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  objects_from_yaml(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Collect all `*.yaml` files under a path
///
/// A file path returns itself; a directory is walked recursively. A path
/// that does not exist yields an empty list with an error log, matching the
/// skip-on-miss behavior of the release source
pub fn yaml_files(path: &str) -> Vec<PathBuf> {
  let path = Path::new(path);

  if path.is_file() {
    return vec![path.to_path_buf()];
  }

  if !path.is_dir() {
    tracing::error!("The provided path: {} doesn't exist or is not a directory", path.display());
    return vec![];
  }

  let mut files = vec![];
  walk(path, &mut files);
  files.sort();

  files
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) {
  let Ok(entries) = std::fs::read_dir(dir) else {
    return;
  };

  for entry in entries.flatten() {
    let path = entry.path();
    if path.is_dir() {
      walk(&path, files);
    } else if path.extension().is_some_and(|ext| ext == "yaml") {
      files.push(path);
    }
  }
}
