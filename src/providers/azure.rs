//! Azure Pipelines builds.
//!
//! A build is identified by its numeric id, usually found in a check run's
//! `details_url` (`...?buildId=123`). Metadata comes from the build resource and
//! the catalog from its artifacts list, paginated by the
//! `x-ms-continuationtoken` response header.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

use super::{get_json, http_client};
use crate::catalog::{
    CatalogItem, ItemState, Locator, Provider, RepoRef, RunEvent, RunHints, RunMeta,
    RunNotification,
};
use crate::config::IngestConfig;
use crate::contract::{BoxError, CatalogPage, CatalogSource};

const API_VERSION: &str = "5.0";
const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";

#[derive(Debug, Deserialize)]
struct Build {
    #[serde(rename = "sourceBranch", default)]
    source_branch: String,
    #[serde(rename = "sourceVersion", default)]
    source_version: String,
    #[serde(default)]
    reason: String,
    #[serde(rename = "triggerInfo", default)]
    trigger_info: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct BuildArtifacts {
    #[serde(default)]
    value: Vec<BuildArtifact>,
}

#[derive(Debug, Deserialize)]
struct BuildArtifact {
    id: i64,
    name: String,
    resource: ArtifactResource,
}

#[derive(Debug, Deserialize)]
struct ArtifactResource {
    #[serde(rename = "downloadUrl")]
    download_url: String,
}

/// Extracts the build id from a check run's details URL.
pub fn extract_build_id(details_url: &str) -> Option<i64> {
    let url = reqwest::Url::parse(details_url).ok()?;
    let (_, id) = url.query_pairs().find(|(key, _)| key == "buildId")?;
    id.parse::<i64>().ok().filter(|id| *id > 0)
}

/// Notification for a finished Azure Pipelines build.
pub fn notification(build_id: i64, owner: &str, repo: &str) -> RunNotification {
    RunNotification::new(Provider::Azure, build_id.to_string(), owner, repo)
}

/// The parts of a GitHub `check_run` event needed to route it.
#[derive(Debug, Clone, Default)]
pub struct CheckRunEvent {
    pub app_id: i64,
    pub status: String,
    pub details_url: String,
    pub head_sha: Option<String>,
    pub owner: String,
    pub repo: String,
    pub sender: Option<String>,
}

impl CheckRunEvent {
    /// Turns the event into an Azure notification. Check runs of other apps,
    /// runs that have not completed and details URLs without a build id are
    /// ignored.
    pub fn route(self, config: &IngestConfig) -> Option<RunNotification> {
        if config.provider_for_app(self.app_id) != Some(Provider::Azure) {
            debug!(app_id = self.app_id, "Ignoring check run of a non-Azure app");
            return None;
        }
        if self.status != "completed" {
            debug!(status = %self.status, "Ignoring non-completed check run");
            return None;
        }
        let Some(build_id) = extract_build_id(&self.details_url) else {
            error!(details_url = %self.details_url, "No build id in check run details URL");
            return None;
        };
        let mut notification = notification(build_id, &self.owner, &self.repo).with_hints(RunHints {
            head_sha: self.head_sha.filter(|sha| !sha.is_empty()),
            ..RunHints::default()
        });
        if let Some(sender) = self.sender.filter(|s| !s.is_empty()) {
            notification = notification.with_sender(sender);
        }
        Some(notification)
    }
}

pub struct AzureSource {
    client: reqwest::Client,
    base_url: String,
}

impl AzureSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BoxError> {
        Ok(Self::with_client(http_client(timeout)?, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        AzureSource {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn build_url(&self, notification: &RunNotification) -> String {
        format!(
            "{}/{}/{}/_apis/build/builds/{}",
            self.base_url, notification.owner, notification.repo, notification.run_id
        )
    }
}

#[async_trait]
impl CatalogSource for AzureSource {
    async fn run_meta(&self, notification: &RunNotification) -> Result<RunMeta, BoxError> {
        let request = self
            .client
            .get(self.build_url(notification))
            .query(&[("api-version", API_VERSION)]);
        let (build, _) = get_json::<Build>(request).await?;

        // Every reason other than `pullRequest` (CI triggers, schedules,
        // manual queues) builds a branch, not a pull request.
        let event = match build.reason.as_str() {
            "" => notification.hints.event.unwrap_or_default(),
            "pullRequest" => RunEvent::PullRequest,
            _ => RunEvent::Push,
        };
        let build_sha = build
            .trigger_info
            .get("pr.sourceSha")
            .cloned()
            .filter(|sha| !sha.is_empty())
            .or_else(|| Some(build.source_version).filter(|sha| !sha.is_empty()));
        let head_branch = Some(build.source_branch)
            .filter(|branch| !branch.is_empty())
            .map(|branch| {
                branch
                    .strip_prefix("refs/heads/")
                    .map(str::to_string)
                    .unwrap_or(branch)
            })
            .or_else(|| notification.hints.head_branch.clone());

        let repository = RepoRef::new(&notification.owner, &notification.repo);
        Ok(RunMeta {
            head_sha: notification.hints.head_sha.clone().or(build_sha),
            head_branch,
            event,
            head_repository: Some(repository.clone()),
            base_repository: Some(repository),
            sender: None,
        })
    }

    async fn list_page(
        &self,
        notification: &RunNotification,
        continuation: Option<String>,
    ) -> Result<CatalogPage, BoxError> {
        let mut request = self
            .client
            .get(format!("{}/artifacts", self.build_url(notification)))
            .query(&[("api-version", API_VERSION)]);
        if let Some(token) = &continuation {
            request = request.query(&[("continuationToken", token)]);
        }
        let (artifacts, headers) = get_json::<BuildArtifacts>(request).await?;

        let items = artifacts
            .value
            .into_iter()
            .map(|artifact| CatalogItem {
                name: artifact.name,
                id: artifact.id.to_string(),
                state: ItemState::Completed,
                locator: Locator::Result(artifact.resource.download_url),
                screenshot: None,
            })
            .collect();
        let continuation = headers
            .get(CONTINUATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok(CatalogPage {
            items,
            continuation,
        })
    }
}
