//! Taskcluster runs announced by a GitHub `check_suite` event.
//!
//! Community-TC publishes one check run per task, so the task group is rebuilt
//! from the suite's check runs without asking Taskcluster. Each run's
//! `details_url` (`<root>/tasks/<taskId>`) names the deployment root and the
//! task; a `success` conclusion stands for a completed task.
//!
//! The checks API is read 25 runs per page and at most 20 pages are followed.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, LINK};
use serde::Deserialize;
use tracing::debug;

use super::taskcluster::{hinted_meta, task_item, COMPLETED_STATE};
use super::{get_json, github_get, http_client};
use crate::catalog::{Provider, RunHints, RunMeta, RunNotification};
use crate::config::IngestConfig;
use crate::contract::{BoxError, CatalogPage, CatalogSource};
use crate::error::IngestError;

const PER_PAGE: u32 = 25;
const MAX_PAGES: u32 = 20;
const DECISION_TASK: &str = "wpt-decision-task";

fn details_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(https://[^/]*)/tasks/([^/]*)").expect("static pattern compiles")
    })
}

/// Splits a check run's details URL into deployment root and task id.
pub fn parse_details_url(url: &str) -> Option<(String, String)> {
    let caps = details_url().captures(url)?;
    let task_id = caps[2].to_string();
    if task_id.is_empty() {
        return None;
    }
    Some((caps[1].to_string(), task_id))
}

/// The parts of a GitHub `check_suite` event needed to route it.
#[derive(Debug, Clone, Default)]
pub struct CheckSuiteEvent {
    pub app_id: i64,
    pub action: String,
    pub status: String,
    pub suite_id: i64,
    pub head_sha: Option<String>,
    pub head_branch: Option<String>,
    pub owner: String,
    pub repo: String,
    pub sender: Option<String>,
}

impl CheckSuiteEvent {
    /// Turns the event into a Taskcluster notification.
    ///
    /// `Ok(None)` when the suite belongs to an app that is not registered as
    /// Taskcluster. A suite that has not completed, or has no head SHA, is an
    /// error: only completed suites are ever delivered.
    pub fn route(self, config: &IngestConfig) -> Result<Option<RunNotification>, IngestError> {
        if config.provider_for_app(self.app_id) != Some(Provider::Taskcluster) {
            debug!(app_id = self.app_id, "Ignoring check suite of a non-Taskcluster app");
            return Ok(None);
        }
        if self.action != COMPLETED_STATE || self.status != COMPLETED_STATE {
            return Err(IngestError::InvalidEvent {
                provider: Provider::Taskcluster.to_string(),
                reason: format!(
                    "non-completed check_suite event (action: {}, status: {})",
                    self.action, self.status
                ),
            });
        }
        let Some(sha) = self.head_sha.filter(|sha| !sha.is_empty()) else {
            return Err(IngestError::MissingSha {
                run: format!("check suite {}", self.suite_id),
            });
        };

        let mut notification = RunNotification::new(
            Provider::Taskcluster,
            self.suite_id.to_string(),
            self.owner,
            self.repo,
        )
        .with_hints(RunHints {
            head_sha: Some(sha),
            head_branch: self.head_branch,
            event: None,
        });
        if let Some(sender) = self.sender.filter(|s| !s.is_empty()) {
            notification = notification.with_sender(sender);
        }
        Ok(Some(notification))
    }
}

#[derive(Debug, Deserialize)]
struct CheckRunList {
    #[serde(default)]
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
struct CheckRun {
    id: i64,
    name: String,
    #[serde(default)]
    details_url: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    status: String,
}

/// Page number of the `rel="next"` entry of a GitHub `Link` header.
fn next_page(headers: &HeaderMap) -> Option<u32> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.contains(r#"rel="next""#) {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        let url = reqwest::Url::parse(target).ok()?;
        let (_, page) = url.query_pairs().find(|(key, _)| key == "page")?;
        page.parse().ok()
    })
}

#[derive(Debug, Default)]
struct SuiteState {
    root_url: Option<String>,
    task_group: Option<String>,
}

/// Lists the check runs of one suite as Taskcluster tasks.
///
/// Every run of a suite must point at the same deployment root; the first
/// root seen is kept for the lifetime of the source, so use one source per
/// suite.
pub struct CheckSuiteSource {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    state: Mutex<SuiteState>,
}

impl CheckSuiteSource {
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
        CheckSuiteSource {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            state: Mutex::new(SuiteState::default()),
        }
    }

    /// The deployment root every run of the suite resolved to, once known.
    pub fn root_url(&self) -> Option<String> {
        self.state.lock().ok().and_then(|state| state.root_url.clone())
    }

    /// Task group of the suite: the task id of its decision task.
    pub fn task_group(&self) -> Option<String> {
        self.state.lock().ok().and_then(|state| state.task_group.clone())
    }

    fn record(&self, suite: &str, run: &str, root: &str, task_id: &str) -> Result<(), BoxError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| "check suite state lock poisoned")?;
        match state.root_url.as_deref() {
            Some(existing) if existing != root => {
                return Err(format!(
                    "conflicting root URLs for runs in check suite {suite} ({existing} vs {root})"
                )
                .into())
            }
            Some(_) => {}
            None => state.root_url = Some(root.to_string()),
        }
        if run == DECISION_TASK {
            debug!(suite, task_group = task_id, "Found decision task");
            state.task_group = Some(task_id.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for CheckSuiteSource {
    async fn run_meta(&self, notification: &RunNotification) -> Result<RunMeta, BoxError> {
        Ok(hinted_meta(notification))
    }

    async fn list_page(
        &self,
        notification: &RunNotification,
        continuation: Option<String>,
    ) -> Result<CatalogPage, BoxError> {
        let page: u32 = match continuation {
            Some(token) => token
                .parse()
                .map_err(|e| format!("invalid page token {token:?}: {e}"))?,
            None => 1,
        };
        let url = format!(
            "{}/repos/{}/{}/check-suites/{}/check-runs",
            self.api_url, notification.owner, notification.repo, notification.run_id
        );
        let request = github_get(&self.client, url, self.token.as_deref())
            .query(&[("per_page", PER_PAGE), ("page", page)]);
        let (list, headers) = get_json::<CheckRunList>(request).await?;

        let mut items = Vec::with_capacity(list.check_runs.len());
        for run in list.check_runs {
            let details = run.details_url.unwrap_or_default();
            let Some((root, task_id)) = parse_details_url(&details) else {
                return Err(format!(
                    "unable to parse details URL of check run {}: {details}",
                    run.id
                )
                .into());
            };
            self.record(&notification.run_id, &run.name, &root, &task_id)?;
            let state = match run.conclusion.as_deref() {
                Some("success") => COMPLETED_STATE,
                Some(conclusion) => conclusion,
                None => run.status.as_str(),
            };
            items.push(task_item(&root, run.name, task_id, state));
        }

        let continuation = match next_page(&headers) {
            Some(_) if page >= MAX_PAGES => {
                return Err(format!(
                    "more than {} check runs returned for check suite {}",
                    PER_PAGE * MAX_PAGES,
                    notification.run_id
                )
                .into())
            }
            next => next.map(|page| page.to_string()),
        };
        Ok(CatalogPage {
            items,
            continuation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn suite(app_id: i64) -> CheckSuiteEvent {
        CheckSuiteEvent {
            app_id,
            action: "completed".to_string(),
            status: "completed".to_string(),
            suite_id: 7,
            head_sha: Some("abc123".to_string()),
            head_branch: Some("master".to_string()),
            owner: "web-platform-tests".to_string(),
            repo: "wpt".to_string(),
            sender: Some("octocat".to_string()),
        }
    }

    #[test]
    fn details_urls() {
        assert_eq!(
            parse_details_url("https://tc.example.com/tasks/Jq4HzLz0R2eKkJFdmf47Bg"),
            Some((
                "https://tc.example.com".to_string(),
                "Jq4HzLz0R2eKkJFdmf47Bg".to_string()
            ))
        );
        assert_eq!(parse_details_url("https://tc.example.com/groups/abc"), None);
        assert_eq!(parse_details_url("https://tc.example.com/tasks/"), None);
    }

    #[test]
    fn routes_registered_taskcluster_suites() {
        let notification = suite(40788)
            .route(&IngestConfig::default())
            .unwrap()
            .expect("taskcluster suite is routed");
        assert_eq!(notification.provider, Provider::Taskcluster);
        assert_eq!(notification.run_id, "7");
        assert_eq!(notification.sender.as_deref(), Some("octocat"));
        assert_eq!(notification.hints.head_sha.as_deref(), Some("abc123"));
        assert_eq!(notification.hints.head_branch.as_deref(), Some("master"));
        assert_eq!(notification.hints.event, None);
    }

    #[test]
    fn other_apps_are_ignored() {
        let config = IngestConfig::default();
        assert!(suite(9426).route(&config).unwrap().is_none());
        assert!(suite(1).route(&config).unwrap().is_none());
    }

    #[test]
    fn non_completed_suites_are_rejected() {
        let mut event = suite(40788);
        event.action = "requested".to_string();
        let err = event.route(&IngestConfig::default()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidEvent { .. }), "{err}");

        let mut event = suite(40788);
        event.head_sha = None;
        let err = event.route(&IngestConfig::default()).unwrap_err();
        assert!(matches!(err, IngestError::MissingSha { .. }), "{err}");
    }

    fn link(entries: &[(u32, &str)]) -> HeaderMap {
        let base = "https://api.github.com/repositories/1/check-suites/7/check-runs";
        let value = entries
            .iter()
            .map(|(page, rel)| format!("<{base}?per_page=25&page={page}>; rel=\"{rel}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn link_header_next_page() {
        assert_eq!(next_page(&HeaderMap::new()), None);
        assert_eq!(next_page(&link(&[(3, "next"), (9, "last")])), Some(3));
        assert_eq!(next_page(&link(&[(1, "prev"), (1, "first")])), None);
    }
}
