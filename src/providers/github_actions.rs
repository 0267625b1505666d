//! GitHub Actions workflow runs.
//!
//! Artifacts are zip archives, so every item becomes an `archive_url` for the
//! receiver. Expired artifacts can no longer be downloaded and are treated as
//! unfinished, which invalidates their product for the run.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{get_json, github_get, http_client};
use crate::catalog::{
    CatalogItem, ItemState, Locator, Provider, RepoRef, RunEvent, RunMeta, RunNotification,
};
use crate::contract::{BoxError, CatalogPage, CatalogSource};

const PER_PAGE: u64 = 100;

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    #[serde(default)]
    head_branch: Option<String>,
    #[serde(default)]
    head_sha: Option<String>,
    #[serde(default)]
    event: String,
    #[serde(default)]
    head_repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    owner: Account,
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactList {
    total_count: u64,
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    id: i64,
    name: String,
    archive_download_url: String,
    #[serde(default)]
    expired: bool,
}

/// Notification for a finished workflow run.
pub fn notification(run_id: i64, owner: &str, repo: &str) -> RunNotification {
    RunNotification::new(Provider::GithubActions, run_id.to_string(), owner, repo)
}

pub struct GithubActionsSource {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GithubActionsSource {
    pub fn new(
        api_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BoxError> {
        Ok(Self::with_client(http_client(timeout)?, api_url, token))
    }

    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        GithubActionsSource {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        github_get(&self.client, url, self.token.as_deref())
    }

    fn run_url(&self, notification: &RunNotification) -> String {
        format!(
            "{}/repos/{}/{}/actions/runs/{}",
            self.api_url, notification.owner, notification.repo, notification.run_id
        )
    }
}

#[async_trait]
impl CatalogSource for GithubActionsSource {
    async fn run_meta(&self, notification: &RunNotification) -> Result<RunMeta, BoxError> {
        let (run, _) = get_json::<WorkflowRun>(self.get(self.run_url(notification))).await?;
        let event = RunEvent::from_event_name(&run.event);

        // The revision is only sent for pull requests; otherwise the receiver
        // takes it from the uploaded reports.
        let head_sha = match event {
            RunEvent::PullRequest => run.head_sha,
            _ => None,
        };
        Ok(RunMeta {
            head_sha,
            head_branch: run.head_branch,
            event,
            head_repository: run
                .head_repository
                .map(|repo| RepoRef::new(repo.owner.login, repo.name)),
            base_repository: Some(RepoRef::new(&notification.owner, &notification.repo)),
            sender: None,
        })
    }

    async fn list_page(
        &self,
        notification: &RunNotification,
        continuation: Option<String>,
    ) -> Result<CatalogPage, BoxError> {
        let page = match continuation {
            Some(token) => token
                .parse::<u64>()
                .map_err(|e| format!("invalid page token {token:?}: {e}"))?,
            None => 1,
        };
        let request = self
            .get(format!("{}/artifacts", self.run_url(notification)))
            .query(&[("per_page", PER_PAGE), ("page", page)]);
        let (list, _) = get_json::<ArtifactList>(request).await?;

        let items = list
            .artifacts
            .into_iter()
            .map(|artifact| CatalogItem {
                name: artifact.name,
                id: artifact.id.to_string(),
                state: if artifact.expired {
                    ItemState::Other("expired".to_string())
                } else {
                    ItemState::Completed
                },
                locator: Locator::Archive(artifact.archive_download_url),
                screenshot: None,
            })
            .collect();
        let continuation = (page * PER_PAGE < list.total_count).then(|| (page + 1).to_string());
        Ok(CatalogPage {
            items,
            continuation,
        })
    }
}
