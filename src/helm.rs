use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::process::Command;

use crate::clients::{ReleaseIdentity, ReleasePage};

pub const DEFAULT_TEMPLATE_DIR: &str = "/tmp/helm_template_tmp_dir";

/// Run a helm command, capturing stdout and folding stderr into the error
async fn run(binary: &str, args: &[&str]) -> Result<String> {
  tracing::info!("Calling the helm command: [{binary} {}]", args.join(" "));

  let output = Command::new(binary)
    .args(args)
    .output()
    .await
    .with_context(|| format!("Failed to execute {binary}"))?;

  if !output.status.success() {
    bail!(
      "Error while executing helm command [{binary} {}]: {}\nCaptured helm stderr: {}",
      args.join(" "),
      output.status,
      String::from_utf8_lossy(&output.stderr).trim(),
    );
  }

  Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `helm list --output yaml` wire format (helm v2 field casing)
#[derive(Debug, Default, Deserialize)]
struct ListOutput {
  #[serde(rename = "Next")]
  next: Option<String>,
  #[serde(rename = "Releases", default)]
  releases: Vec<ListedRelease>,
}

#[derive(Debug, Deserialize)]
struct ListedRelease {
  #[serde(rename = "Name")]
  name: String,
  #[serde(rename = "Namespace")]
  namespace: String,
  #[serde(rename = "Updated")]
  updated: String,
}

fn parse_list_output(contents: &str) -> Result<ReleasePage> {
  if contents.trim().is_empty() {
    return Ok(ReleasePage::default());
  }

  let output: Option<ListOutput> = serde_yaml::from_str(contents).context("Failed to parse helm list output")?;
  let output = output.unwrap_or_default();

  Ok(ReleasePage {
    releases: output
      .releases
      .into_iter()
      .map(|release| ReleaseIdentity {
        name: release.name,
        namespace: release.namespace,
        last_updated: release.updated,
      })
      .collect(),
    next: output.next.filter(|next| !next.is_empty()),
  })
}

/// List deployed releases across all namespaces, one page at a time
pub async fn list_releases(binary: &str, max: Option<u32>, offset: Option<&str>) -> Result<ReleasePage> {
  let mut args = vec!["list", "--output", "yaml"];

  // helm v3 scopes `list` to a namespace by default
  if binary.ends_with("helm3") {
    args.push("--all-namespaces");
  }

  let max_arg;
  if let Some(max) = max {
    max_arg = max.to_string();
    args.extend(["--max", &max_arg]);
  }
  if let Some(offset) = offset {
    args.extend(["--offset", offset]);
  }

  let stdout = run(binary, &args).await?;
  parse_list_output(&stdout)
}

/// List the releases deployed in one namespace
pub async fn list_namespace_releases(binary: &str, namespace: &str) -> Result<Vec<ReleaseIdentity>> {
  let stdout = run(binary, &["list", "--namespace", namespace, "--output", "yaml"]).await?;
  Ok(parse_list_output(&stdout)?.releases)
}

/// Fetch the rendered manifest of a deployed release
pub async fn get_manifest(binary: &str, release: &str) -> Result<String> {
  run(binary, &["get", "manifest", release]).await
}

/// Whether a release is known to helm
pub async fn release_exists(binary: &str, release: &str) -> bool {
  run(binary, &["get", release]).await.is_ok()
}

#[derive(Debug, Deserialize)]
struct ChartInfo {
  name: String,
}

fn chart_name(chart_path: &str) -> Result<String> {
  let chart_yaml = Path::new(chart_path).join("Chart.yaml");
  let metadata = match std::fs::metadata(&chart_yaml) {
    Ok(metadata) => metadata,
    Err(_) => bail!("The Chart.yaml file is missing or is empty for chart: {chart_path}"),
  };
  if metadata.len() == 0 {
    bail!("The Chart.yaml file is missing or is empty for chart: {chart_path}");
  }

  let contents = std::fs::read_to_string(&chart_yaml)?;
  let info: ChartInfo =
    serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse {}", chart_yaml.display()))?;

  Ok(info.name)
}

async fn build_dependencies(binary: &str, chart_path: &str) -> Result<()> {
  tracing::info!("Updating chart dependencies");
  run(binary, &["dependency", "update", chart_path]).await?;
  Ok(())
}

fn prepare_output_dir(output_dir: &str) -> Result<()> {
  let path = Path::new(output_dir);
  if path.is_dir() {
    std::fs::remove_dir_all(path).with_context(|| format!("Failed to clear template directory {output_dir}"))?;
  }
  std::fs::create_dir_all(path).with_context(|| format!("Failed to create template directory {output_dir}"))?;

  Ok(())
}

/// Options for templating a chart into rendered manifests
#[derive(Clone, Debug, Default)]
pub struct TemplateOptions {
  pub values: Option<String>,
  pub custom_values: Option<String>,
  pub skip_dependencies: bool,
}

/// Render a chart into `output_dir` with `helm template`
///
/// With an explicit values file the chart is rendered once. Without one, a
/// `values/` directory inside the chart renders the chart once per values
/// file into a per-instance/site subdirectory; otherwise the chart defaults
/// are used
pub async fn template(binary: &str, chart_path: &str, output_dir: &str, options: &TemplateOptions) -> Result<()> {
  prepare_output_dir(output_dir)?;

  if Path::new(chart_path).join("requirements.yaml").is_file() && !options.skip_dependencies {
    build_dependencies(binary, chart_path).await?;
  }

  let name = chart_name(chart_path)?;
  let mut base_args = vec!["template".to_string(), chart_path.to_string(), "--name".to_string(), name];
  if let Some(custom_values) = &options.custom_values {
    base_args.extend(["--set".to_string(), custom_values.to_string()]);
  }

  if let Some(values) = &options.values {
    let mut args = base_args.clone();
    args.extend([
      "--values".to_string(),
      values.to_string(),
      "--output-dir".to_string(),
      output_dir.to_string(),
    ]);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run(binary, &args).await?;
    return Ok(());
  }

  let values_dir = Path::new(chart_path).join("values");
  if values_dir.is_dir() {
    for values_file in site_values_files(&values_dir)? {
      let target = site_output_dir(output_dir, &values_file);
      std::fs::create_dir_all(&target)?;

      let mut args = base_args.clone();
      args.extend([
        "--output-dir".to_string(),
        target.to_string_lossy().into_owned(),
        "--values".to_string(),
        values_file.to_string_lossy().into_owned(),
      ]);
      let args: Vec<&str> = args.iter().map(String::as_str).collect();
      if let Err(err) = run(binary, &args).await {
        tracing::error!("Failed while templating with values {}: {err:#}", values_file.display());
      }
    }
    return Ok(());
  }

  let mut args = base_args;
  args.extend(["--output-dir".to_string(), output_dir.to_string()]);
  let args: Vec<&str> = args.iter().map(String::as_str).collect();
  run(binary, &args).await?;

  Ok(())
}

fn site_values_files(values_dir: &Path) -> Result<Vec<PathBuf>> {
  let mut files = vec![];
  collect_yaml_files(values_dir, &mut files)?;
  files.sort();

  Ok(files)
}

fn collect_yaml_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
  for entry in std::fs::read_dir(dir)? {
    let path = entry?.path();
    if path.is_dir() {
      collect_yaml_files(&path, files)?;
    } else if path.extension().is_some_and(|ext| ext == "yaml") {
      files.push(path);
    }
  }

  Ok(())
}

/// Output subdirectory for one site values file: `<out>/<instance>/<site>`,
/// or `<out>/<site>` when the file sits directly under `values/`
fn site_output_dir(output_dir: &str, values_file: &Path) -> PathBuf {
  let site = values_file.file_stem().unwrap_or_default();
  let instance = values_file
    .parent()
    .and_then(|parent| parent.file_name())
    .unwrap_or_default();

  if instance == "values" {
    Path::new(output_dir).join(site)
  } else {
    Path::new(output_dir).join(instance).join(site)
  }
}
