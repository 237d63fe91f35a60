use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{finding::K8sObject, helm, manifest};

/// Identity of one deployed release, as reported by the release listing
///
/// `last_updated` is carried verbatim from the listing output; it is display
/// data, not something the scanner interprets
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseIdentity {
  pub name: String,
  pub namespace: String,
  pub last_updated: String,
}

/// One page of the release listing, with an opaque continuation token
#[derive(Clone, Debug, Default)]
pub struct ReleasePage {
  pub releases: Vec<ReleaseIdentity>,
  pub next: Option<String>,
}

/// Trait abstracting the release collaborator used by the scan pipeline
pub trait ReleaseSource {
  /// List deployed releases, one page at a time
  fn list_releases(&self, offset: Option<String>) -> impl std::future::Future<Output = Result<ReleasePage>> + Send;

  /// Fetch the deployed object kinds of one release
  ///
  /// Returns an empty list when the release does not exist - a missing
  /// release is skipped, not an error
  fn get_release_objects(
    &self,
    name: &str,
    namespace: Option<&str>,
  ) -> impl std::future::Future<Output = Result<Vec<K8sObject>>> + Send;
}

/// Release source backed by the helm binary
#[derive(Clone, Debug)]
pub struct HelmCli {
  pub binary: String,
  /// Cap on the number of releases fetched per listing page
  pub max: Option<u32>,
}

impl HelmCli {
  pub fn new(binary: &str, max: Option<u32>) -> Self {
    Self {
      binary: binary.to_string(),
      max,
    }
  }
}

impl ReleaseSource for HelmCli {
  async fn list_releases(&self, offset: Option<String>) -> Result<ReleasePage> {
    helm::list_releases(&self.binary, self.max, offset.as_deref()).await
  }

  async fn get_release_objects(&self, name: &str, _namespace: Option<&str>) -> Result<Vec<K8sObject>> {
    let release_manifest = match helm::get_manifest(&self.binary, name).await {
      Ok(contents) => contents,
      Err(err) => {
        tracing::warn!("Release {name} not found: {err:#}");
        return Ok(vec![]);
      }
    };

    match manifest::objects_from_yaml(&release_manifest) {
      Ok(objects) => Ok(objects),
      Err(err) => {
        tracing::warn!("Failed to parse the yaml content for release {name}: {err:#}");
        Ok(vec![])
      }
    }
  }
}

/// Get the current Kubernetes cluster version from the API server
///
/// Only needed when no explicit version was supplied. An authorization
/// failure here is fatal for live-cluster checks
pub async fn cluster_version(client: &kube::Client) -> Result<String> {
  let info = client.apiserver_version().await.map_err(|err| match err {
    kube::Error::Api(ref response) if response.code == 401 => {
      anyhow::anyhow!("Unauthorized to read the cluster version from the API server: {err}")
    }
    _ => anyhow::Error::new(err).context("Failed to read the cluster version from the API server"),
  })?;

  Ok(info.git_version)
}
