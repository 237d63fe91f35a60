use std::{
  collections::{HashMap, HashSet},
  sync::atomic::{AtomicU32, Ordering},
};

use anyhow::{Result, bail};
use kdave::{
  clients::{ReleasePage, ReleaseSource},
  finding::K8sObject,
};

/// Mock release source for testing the scan pipeline
///
/// Pages are addressed by their index encoded in the continuation token.
/// `list_failures` makes the first N listing calls fail, to exercise the
/// retry policy
#[derive(Default)]
pub struct MockReleaseSource {
  pub pages: Vec<ReleasePage>,
  pub objects: HashMap<String, Vec<K8sObject>>,
  pub failing_releases: HashSet<String>,
  pub list_failures: AtomicU32,
  pub list_calls: AtomicU32,
}

impl ReleaseSource for MockReleaseSource {
  async fn list_releases(&self, offset: Option<String>) -> Result<ReleasePage> {
    self.list_calls.fetch_add(1, Ordering::SeqCst);

    let remaining = self.list_failures.load(Ordering::SeqCst);
    if remaining > 0 {
      self.list_failures.store(remaining - 1, Ordering::SeqCst);
      bail!("mock helm list error");
    }

    let index: usize = match offset {
      Some(token) => token.parse().expect("mock continuation token"),
      None => 0,
    };

    Ok(self.pages.get(index).cloned().unwrap_or_default())
  }

  async fn get_release_objects(&self, name: &str, _namespace: Option<&str>) -> Result<Vec<K8sObject>> {
    if self.failing_releases.contains(name) {
      bail!("mock helm get error for {name}");
    }

    // Unknown release behaves like "not found": empty, not an error
    Ok(self.objects.get(name).cloned().unwrap_or_default())
  }
}
