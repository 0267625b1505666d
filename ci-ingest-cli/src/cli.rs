use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ci_ingest::catalog::{ItemFilter, RunHints, RunNotification};
use ci_ingest::contract::CatalogSource;
use ci_ingest::providers::azure::CheckRunEvent;
use ci_ingest::providers::check_suite::CheckSuiteEvent;
use ci_ingest::providers::taskcluster::StatusEvent;
use ci_ingest::providers::{
    azure, github_actions, AzureSource, CheckSuiteSource, GithubActionsSource, TaskclusterSource,
};
use ci_ingest::receiver::HttpReceiverClient;
use ci_ingest::{Disposition, IngestConfig, IngestError, IngestReport, Ingestor};
use clap::{Parser, Subcommand};

use crate::credentials::EnvCredentialStore;
use crate::load_config::load_config;

#[derive(Parser, Debug)]
#[clap(
    name = "ci-ingest",
    version,
    about = "Forward test-result artifacts of finished CI runs to a results receiver"
)]
pub struct Cli {
    /// Path to the YAML config file; built-in defaults are used when omitted
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest the artifacts of a finished Azure Pipelines build
    Azure {
        #[clap(long, required_unless_present = "details_url", conflicts_with = "details_url")]
        build_id: Option<i64>,
        /// Check run details URL carrying `?buildId=`
        #[clap(long)]
        details_url: Option<String>,
        /// Head SHA of the check run
        #[clap(long)]
        sha: Option<String>,
        #[clap(long, default_value = "web-platform-tests")]
        owner: String,
        #[clap(long, default_value = "wpt")]
        repo: String,
        #[clap(long)]
        sender: Option<String>,
        /// Only artifacts whose name matches this glob
        #[clap(long)]
        artifact_name: Option<String>,
    },
    /// Ingest a Taskcluster task group announced by a commit status
    Taskcluster {
        /// The status `target_url` (task group inspector or groups/tasks link)
        #[clap(long)]
        url: String,
        #[clap(long)]
        sha: String,
        #[clap(long, default_value = "success")]
        state: String,
        #[clap(long, default_value = "Community-TC")]
        context: String,
        /// Branches containing the commit; repeatable
        #[clap(long = "branch")]
        branches: Vec<String>,
        #[clap(long)]
        sender: Option<String>,
        #[clap(long, default_value = "web-platform-tests")]
        owner: String,
        #[clap(long, default_value = "wpt")]
        repo: String,
    },
    /// Route a GitHub `check_suite` event; Taskcluster suites are ingested
    CheckSuite {
        /// GitHub App that owns the suite
        #[clap(long)]
        app_id: i64,
        #[clap(long)]
        suite_id: i64,
        #[clap(long, default_value = "completed")]
        action: String,
        #[clap(long, default_value = "completed")]
        status: String,
        #[clap(long)]
        sha: Option<String>,
        #[clap(long)]
        head_branch: Option<String>,
        #[clap(long)]
        sender: Option<String>,
        #[clap(long, default_value = "web-platform-tests")]
        owner: String,
        #[clap(long, default_value = "wpt")]
        repo: String,
    },
    /// Route a GitHub `check_run` event; Azure Pipelines runs are ingested
    CheckRun {
        /// GitHub App that owns the check run
        #[clap(long)]
        app_id: i64,
        #[clap(long)]
        details_url: String,
        #[clap(long, default_value = "completed")]
        status: String,
        #[clap(long)]
        sha: Option<String>,
        #[clap(long)]
        sender: Option<String>,
        #[clap(long, default_value = "web-platform-tests")]
        owner: String,
        #[clap(long, default_value = "wpt")]
        repo: String,
    },
    /// Ingest the artifacts of a finished GitHub Actions workflow run
    GithubActions {
        #[clap(long)]
        run_id: i64,
        #[clap(long)]
        owner: String,
        #[clap(long)]
        repo: String,
        /// Only artifacts whose name matches this glob
        #[clap(long)]
        artifact_name: Option<String>,
        #[clap(long)]
        sender: Option<String>,
    },
}

fn glob_filter(pattern: Option<String>) -> Result<Option<ItemFilter>> {
    pattern
        .map(|p| ItemFilter::glob(&p))
        .transpose()
        .map_err(anyhow::Error::new)
}

/// Builds the notification and the provider adapter for a subcommand.
/// `Ok(None)` means the notification is ignored before any provider call.
fn prepare(
    command: Commands,
    config: &IngestConfig,
) -> Result<Option<(RunNotification, Box<dyn CatalogSource>)>> {
    let timeout = config.fetch_timeout();
    let prepared: (RunNotification, Box<dyn CatalogSource>) = match command {
        Commands::Azure {
            build_id,
            details_url,
            sha,
            owner,
            repo,
            sender,
            artifact_name,
        } => {
            let build_id = match (build_id, details_url) {
                (Some(id), _) => id,
                (None, Some(url)) => azure::extract_build_id(&url).ok_or_else(|| {
                    anyhow::Error::new(IngestError::UnrecognizedUrl {
                        provider: "azure".to_string(),
                        url,
                    })
                })?,
                (None, None) => {
                    return Err(anyhow!("either --build-id or --details-url is required"))
                }
            };
            let mut notification =
                azure::notification(build_id, &owner, &repo).with_hints(RunHints {
                    head_sha: sha,
                    ..RunHints::default()
                });
            if let Some(sender) = sender {
                notification = notification.with_sender(sender);
            }
            if let Some(filter) = glob_filter(artifact_name)? {
                notification = notification.with_filter(filter);
            }
            let source = AzureSource::new(&config.providers.azure_base_url, timeout)
                .map_err(|e| anyhow!("building Azure client: {e}"))?;
            (notification, Box::new(source))
        }
        Commands::Taskcluster {
            url,
            sha,
            state,
            context,
            branches,
            sender,
            owner,
            repo,
        } => {
            let status = StatusEvent {
                sha: Some(sha),
                state,
                context,
                target_url: Some(url),
                branches,
                author: sender,
            };
            if !status.should_process() {
                return Ok(None);
            }
            let (notification, root_url) =
                status.into_notification(&owner, &repo, &config.processing.trunk_branch)?;
            let source = TaskclusterSource::new(root_url, timeout)
                .map_err(|e| anyhow!("building Taskcluster client: {e}"))?;
            (notification, Box::new(source))
        }
        Commands::CheckSuite {
            app_id,
            suite_id,
            action,
            status,
            sha,
            head_branch,
            sender,
            owner,
            repo,
        } => {
            let event = CheckSuiteEvent {
                app_id,
                action,
                status,
                suite_id,
                head_sha: sha,
                head_branch,
                owner,
                repo,
                sender,
            };
            let Some(notification) = event.route(config)? else {
                return Ok(None);
            };
            let token = std::env::var("GITHUB_TOKEN").ok();
            let source = CheckSuiteSource::new(&config.providers.github_api_url, token, timeout)
                .map_err(|e| anyhow!("building GitHub client: {e}"))?;
            (notification, Box::new(source))
        }
        Commands::CheckRun {
            app_id,
            details_url,
            status,
            sha,
            sender,
            owner,
            repo,
        } => {
            let event = CheckRunEvent {
                app_id,
                status,
                details_url,
                head_sha: sha,
                owner,
                repo,
                sender,
            };
            let Some(notification) = event.route(config) else {
                return Ok(None);
            };
            let source = AzureSource::new(&config.providers.azure_base_url, timeout)
                .map_err(|e| anyhow!("building Azure client: {e}"))?;
            (notification, Box::new(source))
        }
        Commands::GithubActions {
            run_id,
            owner,
            repo,
            artifact_name,
            sender,
        } => {
            let mut notification = github_actions::notification(run_id, &owner, &repo);
            if let Some(sender) = sender {
                notification = notification.with_sender(sender);
            }
            if let Some(filter) = glob_filter(artifact_name)? {
                notification = notification.with_filter(filter);
            }
            let token = std::env::var("GITHUB_TOKEN").ok();
            let source =
                GithubActionsSource::new(&config.providers.github_api_url, token, timeout)
                    .map_err(|e| anyhow!("building GitHub client: {e}"))?;
            (notification, Box::new(source))
        }
    };
    Ok(Some(prepared))
}

fn report(result: Result<IngestReport, IngestError>) -> Result<Disposition> {
    match result {
        Ok(report) => {
            let disposition = report.disposition();
            if !report.uploaded.is_empty() {
                println!(
                    "Runs were sent to results receiver: {}",
                    report.uploaded.join(", ")
                );
            } else if disposition == Disposition::Ignored {
                println!("Notification was ignored");
            }
            match report.failures {
                Some(failures) => {
                    eprintln!("[ERROR] {failures}");
                    Err(anyhow::Error::new(failures))
                }
                None => Ok(disposition),
            }
        }
        Err(e) if e.is_no_results() => {
            println!("{e}");
            Ok(Disposition::NoResults)
        }
        Err(e) => {
            eprintln!("[ERROR] Ingestion failed: {e}");
            Err(anyhow::Error::new(e))
        }
    }
}

/// Async CLI entrypoint shared by `main()` and the integration tests.
pub async fn run(cli: Cli) -> Result<Disposition> {
    tracing::info!("trace_initialised");

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => IngestConfig::default(),
    };
    config.trace_loaded();

    let Some((notification, source)) = prepare(cli.command, &config)? else {
        tracing::info!("Notification ignored before processing");
        println!("Status was ignored");
        return Ok(Disposition::Ignored);
    };

    let receiver = Arc::new(HttpReceiverClient::new(&config.receiver.upload_url));
    let ingestor = Ingestor::new(&config, receiver, Arc::new(EnvCredentialStore))
        .context("configuring ingestor")?;
    let result = ingestor.process(&notification, source.as_ref()).await;

    let outcome = report(result);
    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| match &outcome {
        Ok(disposition) => tracing::info!(
            ?disposition,
            status = disposition.http_status(),
            "Ingestion finished"
        ),
        Err(e) => tracing::error!(error = %e, "Ingestion finished with errors"),
    });
    outcome
}
