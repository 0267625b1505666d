//! Taskcluster task groups.
//!
//! Taskcluster reports through GitHub commit statuses whose `target_url`
//! points at a task group (and sometimes a single task). The group listing is
//! the catalog; every task's report and screenshot live at fixed artifact
//! paths under the queue API of the deployment's root URL.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{get_json, http_client};
use crate::catalog::{
    CatalogItem, ItemFilter, ItemState, Locator, Provider, RepoRef, RunHints, RunMeta,
    RunNotification,
};
use crate::contract::{BoxError, CatalogPage, CatalogSource};
use crate::error::IngestError;

const LEGACY_ROOT_URL: &str = "https://taskcluster.net";
const PAGE_LIMIT: &str = "1000";
pub(crate) const COMPLETED_STATE: &str = "completed";

/// Root URL, task group and optional task parsed from a Taskcluster link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskclusterTarget {
    pub root_url: String,
    pub task_group_id: String,
    pub task_id: Option<String>,
}

fn inspector_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(https://[^/]*)/task-group-inspector/#/([^/]*)")
            .expect("static pattern compiles")
    })
}

fn task_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(https://[^/]*)(?:/tasks)?/groups/([^/]*)(?:/tasks/([^/]*))?")
            .expect("static pattern compiles")
    })
}

/// Parses a status `target_url` or check-run details URL.
///
/// Roots on `*.taskcluster.net` are normalised to the legacy deployment root.
pub fn parse_taskcluster_url(target_url: &str) -> Option<TaskclusterTarget> {
    let (root_url, task_group_id, task_id) =
        if let Some(caps) = inspector_url().captures(target_url) {
            (caps[1].to_string(), caps[2].to_string(), None)
        } else if let Some(caps) = task_url().captures(target_url) {
            (
                caps[1].to_string(),
                caps[2].to_string(),
                caps.get(3).map(|m| m.as_str().to_string()),
            )
        } else {
            return None;
        };
    if task_group_id.is_empty() {
        return None;
    }
    let root_url = if root_url.ends_with("taskcluster.net") {
        LEGACY_ROOT_URL.to_string()
    } else {
        root_url
    };
    Some(TaskclusterTarget {
        root_url,
        task_group_id,
        task_id: task_id.filter(|id| !id.is_empty()),
    })
}

/// Builds a queue API URL for the given deployment root.
pub fn queue_api_url(root_url: &str, path: &str) -> String {
    let root_url = root_url.trim_end_matches('/');
    if root_url == LEGACY_ROOT_URL {
        format!("https://queue.taskcluster.net/v1{path}")
    } else {
        format!("{root_url}/api/queue/v1{path}")
    }
}

/// The parts of a GitHub `status` event that decide whether it is processed.
#[derive(Debug, Clone, Default)]
pub struct StatusEvent {
    pub sha: Option<String>,
    pub state: String,
    pub context: String,
    pub target_url: Option<String>,
    /// Branches containing the commit.
    pub branches: Vec<String>,
    pub author: Option<String>,
}

impl StatusEvent {
    pub fn is_completed(&self) -> bool {
        self.state == "success" || self.state == "failure"
    }

    pub fn is_taskcluster(&self) -> bool {
        self.context.starts_with("Taskcluster") || self.context.starts_with("Community-TC")
    }

    pub fn should_process(&self) -> bool {
        if !self.is_completed() {
            debug!(state = %self.state, "Ignoring status");
            return false;
        }
        if !self.is_taskcluster() {
            debug!(context = %self.context, "Ignoring non-Taskcluster context");
            return false;
        }
        true
    }

    /// Turns the event into a notification plus the deployment root to query.
    ///
    /// When the commit is on `trunk_branch` that branch becomes the head
    /// branch hint; otherwise the first listed branch does.
    pub fn into_notification(
        self,
        owner: &str,
        repo: &str,
        trunk_branch: &str,
    ) -> Result<(RunNotification, String), IngestError> {
        let Some(sha) = self.sha.filter(|sha| !sha.is_empty()) else {
            return Err(IngestError::MissingSha {
                run: "taskcluster status event".to_string(),
            });
        };
        let target_url = self.target_url.unwrap_or_default();
        let Some(target) = parse_taskcluster_url(&target_url) else {
            return Err(IngestError::UnrecognizedUrl {
                provider: Provider::Taskcluster.to_string(),
                url: target_url,
            });
        };

        let head_branch = if self.branches.iter().any(|b| b == trunk_branch) {
            Some(trunk_branch.to_string())
        } else {
            self.branches.into_iter().next()
        };
        let mut notification =
            RunNotification::new(Provider::Taskcluster, target.task_group_id, owner, repo)
                .with_hints(RunHints {
                    head_sha: Some(sha),
                    head_branch,
                    event: None,
                });
        if let Some(task_id) = target.task_id {
            notification = notification.with_filter(ItemFilter::TaskId(task_id));
        }
        if let Some(author) = self.author.filter(|a| !a.is_empty()) {
            notification = notification.with_sender(author);
        }
        Ok((notification, target.root_url))
    }
}

#[derive(Debug, Deserialize)]
struct TaskGroupList {
    #[serde(default)]
    tasks: Vec<TaskDefinitionAndStatus>,
    #[serde(rename = "continuationToken", default)]
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskDefinitionAndStatus {
    status: TaskStatus,
    task: TaskDefinition,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    #[serde(rename = "taskId", default)]
    task_id: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct TaskDefinition {
    metadata: TaskMetadata,
}

#[derive(Debug, Deserialize)]
struct TaskMetadata {
    name: String,
}

/// Lists a task group on one Taskcluster deployment.
pub struct TaskclusterSource {
    client: reqwest::Client,
    root_url: String,
}

impl TaskclusterSource {
    pub fn new(root_url: impl Into<String>, timeout: Duration) -> Result<Self, BoxError> {
        Ok(Self::with_client(http_client(timeout)?, root_url))
    }

    pub fn with_client(client: reqwest::Client, root_url: impl Into<String>) -> Self {
        TaskclusterSource {
            client,
            root_url: root_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn artifact_url(root_url: &str, task_id: &str, file: &str) -> String {
    queue_api_url(
        root_url,
        &format!("/task/{task_id}/artifacts/public/results/{file}"),
    )
}

/// Catalog entry for one task: its report plus the screenshot bundle next to it.
pub(crate) fn task_item(
    root_url: &str,
    name: String,
    task_id: String,
    state: &str,
) -> CatalogItem {
    let state = if state == COMPLETED_STATE {
        ItemState::Completed
    } else {
        ItemState::Other(state.to_string())
    };
    CatalogItem {
        name,
        locator: Locator::Result(artifact_url(root_url, &task_id, "wpt_report.json.gz")),
        // May not exist; the receiver tolerates a missing screenshot file.
        screenshot: Some(artifact_url(root_url, &task_id, "wpt_screenshot.txt.gz")),
        id: task_id,
        state,
    }
}

/// Run metadata taken entirely from the notification's hints.
pub(crate) fn hinted_meta(notification: &RunNotification) -> RunMeta {
    let repository = RepoRef::new(&notification.owner, &notification.repo);
    RunMeta {
        head_sha: notification.hints.head_sha.clone(),
        head_branch: notification.hints.head_branch.clone(),
        event: notification.hints.event.unwrap_or_default(),
        head_repository: Some(repository.clone()),
        base_repository: Some(repository),
        sender: None,
    }
}

#[async_trait]
impl CatalogSource for TaskclusterSource {
    /// Status events already carry everything known about the run.
    async fn run_meta(&self, notification: &RunNotification) -> Result<RunMeta, BoxError> {
        Ok(hinted_meta(notification))
    }

    async fn list_page(
        &self,
        notification: &RunNotification,
        continuation: Option<String>,
    ) -> Result<CatalogPage, BoxError> {
        let url = queue_api_url(
            &self.root_url,
            &format!("/task-group/{}/list", notification.run_id),
        );
        let mut request = self.client.get(url).query(&[("limit", PAGE_LIMIT)]);
        if let Some(token) = &continuation {
            request = request.query(&[("continuationToken", token)]);
        }
        let (list, _) = get_json::<TaskGroupList>(request).await?;

        let mut items = Vec::with_capacity(list.tasks.len());
        for entry in list.tasks {
            if entry.status.task_id.is_empty() {
                return Err(format!(
                    "task group {} has a task without taskId",
                    notification.run_id
                )
                .into());
            }
            items.push(task_item(
                &self.root_url,
                entry.task.metadata.name,
                entry.status.task_id,
                &entry.status.state,
            ));
        }
        Ok(CatalogPage {
            items,
            continuation: list.continuation_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_group_inspector_url() {
        let target =
            parse_taskcluster_url(
                "https://tc.example.com/task-group-inspector/#/Y4rnZeqDRXGiRNiqxT5Qeg"
            )
                .unwrap();
        assert_eq!(target.root_url, "https://tc.example.com");
        assert_eq!(target.task_group_id, "Y4rnZeqDRXGiRNiqxT5Qeg");
        assert_eq!(target.task_id, None);
    }

    #[test]
    fn parses_group_and_task_urls() {
        let target = parse_taskcluster_url(
            "https://tc.example.com/groups/IWlO7NuxRnO0_8PKMuHFkw/tasks/\
             NOToWHr0T-u62B9yGQnD5w/details",
        )
        .unwrap();
        assert_eq!(target.task_group_id, "IWlO7NuxRnO0_8PKMuHFkw");
        assert_eq!(target.task_id.as_deref(), Some("NOToWHr0T-u62B9yGQnD5w"));

        let target =
            parse_taskcluster_url(
                "https://tc.other-example.com/tasks/groups/IWlO7NuxRnO0_8PKMuHFkw"
            )
                .unwrap();
        assert_eq!(target.root_url, "https://tc.other-example.com");
        assert_eq!(target.task_id, None);
    }

    #[test]
    fn legacy_roots_are_normalised() {
        let target =
            parse_taskcluster_url("https://tools.taskcluster.net/groups/abc").unwrap();
        assert_eq!(target.root_url, "https://taskcluster.net");
        assert_eq!(
            queue_api_url(&target.root_url, "/task/x"),
            "https://queue.taskcluster.net/v1/task/x"
        );
        assert_eq!(
            queue_api_url("https://tc.example.com", "/task/x"),
            "https://tc.example.com/api/queue/v1/task/x"
        );
    }

    #[test]
    fn unrecognised_urls_are_rejected() {
        assert_eq!(parse_taskcluster_url("https://example.com/foo"), None);
        assert_eq!(parse_taskcluster_url("http://tc.example.com/groups/abc"), None);
    }

    #[test]
    fn status_gating() {
        let mut status = StatusEvent {
            state: "success".to_string(),
            context: "Community-TC (pull_request)".to_string(),
            ..StatusEvent::default()
        };
        assert!(status.should_process());
        status.state = "pending".to_string();
        assert!(!status.should_process());
        status.state = "failure".to_string();
        status.context = "continuous-integration/travis-ci".to_string();
        assert!(!status.should_process());
    }

    #[test]
    fn status_to_notification() {
        let status = StatusEvent {
            sha: Some("abc123".to_string()),
            state: "success".to_string(),
            context: "Taskcluster".to_string(),
            target_url: Some("https://tc.example.com/groups/G1/tasks/T1".to_string()),
            branches: vec!["feature".to_string(), "master".to_string()],
            author: Some("octocat".to_string()),
        };
        let (notification, root) = status
            .into_notification("web-platform-tests", "wpt", "master")
            .unwrap();
        assert_eq!(root, "https://tc.example.com");
        assert_eq!(notification.run_id, "G1");
        assert_eq!(notification.hints.head_branch.as_deref(), Some("master"));
        assert_eq!(notification.sender.as_deref(), Some("octocat"));
        assert!(matches!(notification.filter, Some(ItemFilter::TaskId(ref id)) if id == "T1"));
    }
}
