pub mod clients;
pub mod config;
pub mod finding;
pub mod helm;
pub mod manifest;
pub mod output;
pub mod rules;
pub mod scan;
pub mod schedule;
pub mod server;
pub mod snapshot;
pub mod version;

use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::Verbosity;

use crate::{
  clients::{HelmCli, ReleaseSource},
  finding::{ExitCodes, FileDeprecation, ReleaseDeprecation, Severity},
  output::CheckFindings,
  rules::RuleTable,
  scan::RetryPolicy,
  schedule::Scheduler,
  server::AppState,
  snapshot::SnapshotStore,
  version::Version,
};

#[derive(Parser, Debug)]
#[command(author, about, version)]
#[command(propagate_version = true)]
pub struct Cli {
  #[command(subcommand)]
  pub commands: Commands,

  #[clap(flatten)]
  pub verbose: Verbosity,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  #[command(arg_required_else_help = true)]
  Check(Check),
  Serve(Serve),
}

/// Check the deprecated apiVersions of a release, namespace, chart, directory, or file
#[derive(Args, Debug)]
pub struct Check {
  /// The full path of a manifest file or directory
  #[arg(short, long)]
  pub source: Option<String>,

  /// The full path of a chart to template and check
  #[arg(short, long)]
  pub chart: Option<String>,

  /// The name of a deployed release to check
  #[arg(short, long)]
  pub release: Option<String>,

  /// The name of a namespace whose releases are checked
  #[arg(short, long)]
  pub namespace: Option<String>,

  /// The Kubernetes version to check against; defaults to the current cluster version
  #[arg(short, long)]
  pub kubernetes_version: Option<String>,

  /// The values file used to template the chart
  #[arg(long)]
  pub values: Option<String>,

  /// Custom values used to template the chart (key1=val1,key2=val2)
  #[arg(long)]
  pub custom_values: Option<String>,

  /// Skip building dependencies for the given chart
  #[arg(long)]
  pub skip_dependencies: bool,

  /// The output directory used to template the chart
  #[arg(short, long, default_value = helm::DEFAULT_TEMPLATE_DIR)]
  pub output_dir: String,

  /// Print a recommendation message with the replacement apiVersion instead of a table
  #[arg(short, long)]
  pub message: bool,

  /// Level the recommendation messages by severity
  #[arg(short, long)]
  pub format: bool,

  /// The helm binary used for running helm commands
  #[arg(short = 'b', long, default_value = config::DEFAULT_HELM_BINARY)]
  pub helm_binary: String,

  /// The deprecation rules file
  #[arg(long, default_value = rules::DEFAULT_VERSIONS_FILE)]
  pub versions_file: String,

  /// Exit code used when deprecated apiVersions are found
  #[arg(long, default_value_t = 0)]
  pub deprecated_apis_exit_code: u8,

  /// Exit code used when apiVersions removed in the next release are found
  #[arg(long, default_value_t = 0)]
  pub removed_apis_in_next_release_exit_code: u8,

  /// Exit code used when removed apiVersions are found
  #[arg(long, default_value_t = 10)]
  pub removed_apis_exit_code: u8,
}

/// Serve the scan results as Prometheus metrics, refreshed in the background
#[derive(Args, Debug)]
pub struct Serve {
  /// IP address to listen on
  #[arg(short, long, default_value = "0.0.0.0")]
  pub address: String,

  /// Port to listen on
  #[arg(short, long, default_value_t = 8000)]
  pub port: u16,

  /// Interval between scan cycles (accepted suffixes: s, m, h, d, w)
  #[arg(short, long, default_value = "1d")]
  pub interval: String,

  /// Accepted scan job delay before the health gate fails
  #[arg(short = 'l', long, default_value = "2h")]
  pub delay: String,

  /// Number of workers scanning releases concurrently
  #[arg(short, long, default_value_t = 10)]
  pub threads: usize,

  /// Maximum number of releases to fetch per listing page
  #[arg(short, long)]
  pub max: Option<u32>,

  /// The durable snapshot file location
  #[arg(short, long, default_value = config::DEFAULT_DATA_FILE)]
  pub data_file: String,

  /// The helm binary used for running helm commands
  #[arg(short = 'b', long, default_value = config::DEFAULT_HELM_BINARY)]
  pub helm_binary: String,

  /// The deprecation rules file
  #[arg(long, default_value = rules::DEFAULT_VERSIONS_FILE)]
  pub versions_file: String,

  /// The Kubernetes version to check against; defaults to the current cluster version
  #[arg(short, long)]
  pub kubernetes_version: Option<String>,
}

/// One-shot check; returns the exit code for the worst finding
pub async fn check(args: &Check) -> Result<u8> {
  let rules = RuleTable::load(&args.versions_file)?;
  let cluster_version = resolve_cluster_version(args.kubernetes_version.as_deref()).await?;

  let findings = if let Some(release) = &args.release {
    if !helm::release_exists(&args.helm_binary, release).await {
      bail!("Release {release} not found");
    }
    let source = HelmCli::new(&args.helm_binary, None);
    let deprecations = check_release(&source, &rules, cluster_version, release, args.namespace.as_deref()).await?;
    CheckFindings::Releases(deprecations)
  } else if let Some(namespace) = &args.namespace {
    let source = HelmCli::new(&args.helm_binary, None);
    let mut deprecations = vec![];
    for release in helm::list_namespace_releases(&args.helm_binary, namespace).await? {
      deprecations.extend(check_release(&source, &rules, cluster_version, &release.name, Some(namespace)).await?);
    }
    CheckFindings::Releases(deprecations)
  } else if let Some(chart) = &args.chart {
    let options = helm::TemplateOptions {
      values: args.values.clone(),
      custom_values: args.custom_values.clone(),
      skip_dependencies: args.skip_dependencies,
    };
    helm::template(&args.helm_binary, chart, &args.output_dir, &options).await?;
    CheckFindings::Files(check_files(&rules, cluster_version, &args.output_dir))
  } else if let Some(source) = &args.source {
    CheckFindings::Files(check_files(&rules, cluster_version, source))
  } else {
    bail!("Provide one of --source, --chart, --release or --namespace")
  };

  if args.message {
    output::report(&findings, args.format);
  } else if findings.is_empty() {
    println!("No deprecated or removed apiVersions found");
  } else {
    println!("Checking the used apiVersions:");
    print!("{}", findings.to_stdout_table());
  }

  let exit_codes = ExitCodes {
    deprecated: args.deprecated_apis_exit_code,
    removed_in_next_release: args.removed_apis_in_next_release_exit_code,
    removed: args.removed_apis_exit_code,
  };

  Ok(exit_codes.for_severity(Severity::of(findings.verdicts())))
}

/// Check the deployed objects of a single release
async fn check_release(
  source: &HelmCli,
  rules: &RuleTable,
  cluster_version: Version,
  release: &str,
  namespace: Option<&str>,
) -> Result<Vec<ReleaseDeprecation>> {
  let objects = source.get_release_objects(release, namespace).await?;
  if !objects.is_empty() {
    tracing::info!("Checking the used apiVersions for release: {release}");
  }

  let deprecations = objects
    .iter()
    .filter_map(|object| rules.evaluate(object, cluster_version))
    .map(|verdict| ReleaseDeprecation {
      release_name: release.to_string(),
      namespace: namespace.unwrap_or(release).to_string(),
      release_last_update: String::new(),
      verdict,
    })
    .collect();

  Ok(deprecations)
}

/// Check every manifest file under a path, deduplicating identical findings
fn check_files(rules: &RuleTable, cluster_version: Version, path: &str) -> Vec<FileDeprecation> {
  let mut deprecations = vec![];
  let mut seen = HashSet::new();

  for file in manifest::yaml_files(path) {
    let objects = match manifest::objects_from_file(&file) {
      Ok(objects) => objects,
      Err(err) => {
        tracing::warn!("Skipping {}: {err:#}", file.display());
        continue;
      }
    };

    let file_name = file
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();

    for object in &objects {
      if let Some(verdict) = rules.evaluate(object, cluster_version) {
        let deprecation = FileDeprecation {
          file_name: file_name.clone(),
          verdict,
        };
        if seen.insert(deprecation.clone()) {
          deprecations.push(deprecation);
        }
      }
    }
  }

  deprecations
}

/// Run the exporter: background scan scheduler plus the metrics/health server
pub async fn serve(args: &Serve) -> Result<()> {
  let interval = config::parse_duration(&args.interval)?;
  let delay = config::parse_duration(&args.delay)?;

  // Fail fast on configuration errors before accepting traffic
  RuleTable::load(&args.versions_file)?;
  let cluster_version = resolve_cluster_version(args.kubernetes_version.as_deref()).await?;

  let store = SnapshotStore::new();
  if let Some(cached) = snapshot::fresh_cache(&args.data_file, interval) {
    tracing::info!("Loading data from data file: {}", args.data_file);
    store.restore(cached);
  }

  let scheduler = Scheduler {
    store: store.clone(),
    source: Arc::new(HelmCli::new(&args.helm_binary, args.max)),
    versions_file: args.versions_file.clone(),
    cluster_version,
    workers: args.threads,
    retry: RetryPolicy::default(),
    interval,
    data_file: args.data_file.clone(),
  };
  tokio::spawn(async move { scheduler.run().await });

  let state = AppState { store, interval, delay };
  let listener = tokio::net::TcpListener::bind((args.address.as_str(), args.port))
    .await
    .with_context(|| format!("Failed to bind {}:{}", args.address, args.port))?;

  tracing::info!("Starting kdave server");
  tracing::info!("Running on http://{}:{}/", args.address, args.port);
  axum::serve(listener, server::router(state)).await?;

  Ok(())
}

/// Resolve the Kubernetes version to evaluate against
///
/// An explicit version wins; otherwise the live cluster is queried, and any
/// failure there (including authorization) is fatal
async fn resolve_cluster_version(explicit: Option<&str>) -> Result<Version> {
  let raw = match explicit {
    Some(version) => version.to_string(),
    None => {
      let client = kube::Client::try_default()
        .await
        .context("Unable to connect to the cluster; ensure a kubeconfig is present or pass --kubernetes-version")?;
      clients::cluster_version(&client).await?
    }
  };

  raw.parse()
}
