use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{Provider, RunEvent, RunMeta, DEFAULT_MAX_PAGES};
use crate::error::IngestError;

/// Top-level configuration of an ingestion deployment.
///
/// Every section has defaults, so an empty YAML document is a valid config.
/// Secrets are not part of it: uploader credentials come from a
/// [`crate::contract::CredentialStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub providers: ProviderEndpoints,
    /// GitHub App id → provider registry used to route status/check events.
    #[serde(default = "default_apps")]
    pub apps: Vec<AppIdentity>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            receiver: ReceiverConfig::default(),
            processing: ProcessingConfig::default(),
            providers: ProviderEndpoints::default(),
            apps: default_apps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    /// Passed through to the receiver, which calls it once a run is stored.
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            upload_url: default_upload_url(),
            callback_url: None,
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_trunk_branch")]
    pub trunk_branch: String,
    #[serde(default = "default_epoch_branch_pattern")]
    pub epoch_branch_pattern: String,
    /// Process pushes on any branch, not only trunk and epoch branches.
    #[serde(default)]
    pub all_branches: bool,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            trunk_branch: default_trunk_branch(),
            epoch_branch_pattern: default_epoch_branch_pattern(),
            all_branches: false,
            max_pages: default_max_pages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    #[serde(default = "default_azure_base_url")]
    pub azure_base_url: String,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        ProviderEndpoints {
            azure_base_url: default_azure_base_url(),
            github_api_url: default_github_api_url(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub provider: Provider,
    pub app_id: i64,
}

fn default_upload_url() -> String {
    "https://wpt.fyi/api/results/upload".to_string()
}
fn default_upload_timeout_secs() -> u64 {
    60
}
fn default_trunk_branch() -> String {
    "master".to_string()
}
fn default_epoch_branch_pattern() -> String {
    "^epochs/.*".to_string()
}
fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}
fn default_azure_base_url() -> String {
    "https://dev.azure.com".to_string()
}
fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    300
}
fn default_apps() -> Vec<AppIdentity> {
    vec![
        AppIdentity {
            provider: Provider::Azure,
            app_id: 9426,
        },
        AppIdentity {
            provider: Provider::Taskcluster,
            app_id: 40788,
        },
    ]
}

impl IngestConfig {
    pub fn trace_loaded(&self) {
        info!(
            upload_url = %self.receiver.upload_url,
            trunk_branch = %self.processing.trunk_branch,
            all_branches = self.processing.all_branches,
            apps_count = self.apps.len(),
            "Loaded IngestConfig"
        );
        debug!(?self, "IngestConfig loaded (full debug)");
    }

    /// Rejects values that would only fail later, mid-run.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.processing.max_pages == 0 {
            return Err(IngestError::Config(
                "processing.max_pages must be at least 1".to_string(),
            ));
        }
        if self.receiver.upload_timeout_secs == 0 {
            return Err(IngestError::Config(
                "receiver.upload_timeout_secs must be at least 1".to_string(),
            ));
        }
        self.branch_matcher()?;
        Ok(())
    }

    /// Which provider a GitHub App id belongs to, if it is registered.
    pub fn provider_for_app(&self, app_id: i64) -> Option<Provider> {
        self.apps
            .iter()
            .find(|app| app.app_id == app_id)
            .map(|app| app.provider)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.receiver.upload_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.providers.fetch_timeout_secs)
    }

    pub fn branch_matcher(&self) -> Result<BranchMatcher, IngestError> {
        BranchMatcher::new(
            &self.processing.trunk_branch,
            &self.processing.epoch_branch_pattern,
        )
    }

    /// The branch policy implied by `processing.all_branches`.
    pub fn branch_policy(&self) -> Result<TrunkBranchPolicy, IngestError> {
        Ok(TrunkBranchPolicy {
            branches: self.branch_matcher()?,
            all_branches: self.processing.all_branches,
        })
    }
}

/// Recognises the trunk branch and periodic (epoch) branches.
#[derive(Debug, Clone)]
pub struct BranchMatcher {
    trunk: String,
    epochs: Regex,
}

impl BranchMatcher {
    pub fn new(trunk: &str, epoch_pattern: &str) -> Result<Self, IngestError> {
        let epochs = Regex::new(epoch_pattern).map_err(|e| {
            IngestError::Config(format!("epoch_branch_pattern {epoch_pattern:?}: {e}"))
        })?;
        Ok(BranchMatcher {
            trunk: trunk.to_string(),
            epochs,
        })
    }

    /// Accepts `refs/heads/`-qualified names as well as bare branch names.
    pub fn is_master_like(&self, branch: &str) -> bool {
        let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
        branch == self.trunk || self.epochs.is_match(branch)
    }
}

impl Default for BranchMatcher {
    fn default() -> Self {
        BranchMatcher {
            trunk: default_trunk_branch(),
            epochs: Regex::new("^epochs/.*").expect("static pattern compiles"),
        }
    }
}

/// Decides whether a run is processed at all.
pub trait BranchPolicy: Send + Sync {
    fn allows(&self, meta: &RunMeta) -> bool;
}

impl<F> BranchPolicy for F
where
    F: Fn(&RunMeta) -> bool + Send + Sync,
{
    fn allows(&self, meta: &RunMeta) -> bool {
        self(meta)
    }
}

/// Only confirmed pushes are filtered: they must build a trunk or epoch
/// branch unless `all_branches` is set. Pull requests and runs whose event is
/// unknown (status and check-suite notifications) always pass, since the
/// classifier treats those as pull-request context.
#[derive(Debug, Clone)]
pub struct TrunkBranchPolicy {
    branches: BranchMatcher,
    all_branches: bool,
}

impl BranchPolicy for TrunkBranchPolicy {
    fn allows(&self, meta: &RunMeta) -> bool {
        if self.all_branches || meta.event != RunEvent::Push {
            return true;
        }
        meta.head_branch
            .as_deref()
            .is_some_and(|branch| self.branches.is_master_like(branch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_both_apps() {
        let config = IngestConfig::default();
        assert_eq!(config.provider_for_app(9426), Some(Provider::Azure));
        assert_eq!(config.provider_for_app(40788), Some(Provider::Taskcluster));
        assert_eq!(config.provider_for_app(1), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn epoch_branches_are_master_like() {
        let branches = BranchMatcher::default();
        assert!(branches.is_master_like("master"));
        assert!(branches.is_master_like("refs/heads/master"));
        assert!(branches.is_master_like("epochs/daily"));
        assert!(!branches.is_master_like("feature/epochs"));
    }

    #[test]
    fn trunk_policy_lets_pull_requests_through() {
        let policy = IngestConfig::default().branch_policy().unwrap();
        let pr = RunMeta {
            head_branch: Some("my-feature".to_string()),
            event: RunEvent::PullRequest,
            ..RunMeta::default()
        };
        let push = RunMeta {
            event: RunEvent::Push,
            ..pr.clone()
        };
        assert!(policy.allows(&pr));
        assert!(!policy.allows(&push));
    }

    #[test]
    fn trunk_policy_only_filters_confirmed_pushes() {
        let policy = IngestConfig::default().branch_policy().unwrap();
        let unknown = RunMeta {
            head_branch: Some("my-feature".to_string()),
            event: RunEvent::Unknown,
            ..RunMeta::default()
        };
        let fork_status = RunMeta {
            head_branch: None,
            ..unknown.clone()
        };
        let branchless_push = RunMeta {
            event: RunEvent::Push,
            ..fork_status.clone()
        };
        assert!(policy.allows(&unknown));
        assert!(policy.allows(&fork_status));
        assert!(!policy.allows(&branchless_push));
    }

    #[test]
    fn invalid_epoch_pattern_is_rejected() {
        let mut config = IngestConfig::default();
        config.processing.epoch_branch_pattern = "(".to_string();
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));
    }
}
