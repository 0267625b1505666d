//! # catalog: run notifications, catalog items and the paginated fetcher
//!
//! A CI provider announces a finished run with a [`RunNotification`]. The
//! fetcher walks every page the provider lists for that run and returns the
//! flat list of [`CatalogItem`]s it discovered, applying the notification's
//! optional [`ItemFilter`].
//!
//! Pages are fetched strictly one after another: each request needs the
//! continuation token returned by the previous response.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::contract::CatalogSource;
use crate::error::IngestError;

/// Default cap on the number of catalog pages followed for a single run.
pub const DEFAULT_MAX_PAGES: usize = 500;

/// The CI backends artifacts are ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Azure,
    Taskcluster,
    GithubActions,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Azure => "azure",
            Provider::Taskcluster => "taskcluster",
            Provider::GithubActions => "github-actions",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of event produced the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunEvent {
    Push,
    PullRequest,
    /// The provider did not say (status events, scheduled runs...).
    #[default]
    Unknown,
}

impl RunEvent {
    /// Maps a GitHub-style event name.
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "push" => RunEvent::Push,
            "pull_request" | "pull_request_target" => RunEvent::PullRequest,
            _ => RunEvent::Unknown,
        }
    }
}

/// An `owner/name` repository identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        RepoRef {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

/// Metadata already known from the inbound event, before the provider is asked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunHints {
    pub head_sha: Option<String>,
    pub head_branch: Option<String>,
    pub event: Option<RunEvent>,
}

/// Notice that a CI run finished. Consumed once per invocation.
#[derive(Debug, Clone)]
pub struct RunNotification {
    pub provider: Provider,
    /// Build id, task group id or workflow run id, depending on the provider.
    pub run_id: String,
    pub owner: String,
    pub repo: String,
    pub sender: Option<String>,
    pub filter: Option<ItemFilter>,
    pub hints: RunHints,
}

impl RunNotification {
    pub fn new(
        provider: Provider,
        run_id: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        RunNotification {
            provider,
            run_id: run_id.into(),
            owner: owner.into(),
            repo: repo.into(),
            sender: None,
            filter: None,
            hints: RunHints::default(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_filter(mut self, filter: ItemFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_hints(mut self, hints: RunHints) -> Self {
        self.hints = hints;
        self
    }
}

impl fmt::Display for RunNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} run {} of {}/{}",
            self.provider, self.run_id, self.owner, self.repo
        )
    }
}

/// Completion state of a catalog item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Completed,
    Other(String),
}

impl ItemState {
    pub fn is_completed(&self) -> bool {
        matches!(self, ItemState::Completed)
    }
}

/// Where the receiver can fetch an item's payload from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A results report the receiver downloads directly.
    Result(String),
    /// An archive the receiver has to unpack.
    Archive(String),
}

/// One artifact or task listed for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub name: String,
    pub id: String,
    pub state: ItemState,
    pub locator: Locator,
    pub screenshot: Option<String>,
}

/// Run-level metadata used by the classifier and the branch policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMeta {
    pub head_sha: Option<String>,
    pub head_branch: Option<String>,
    pub event: RunEvent,
    pub head_repository: Option<RepoRef>,
    pub base_repository: Option<RepoRef>,
    pub sender: Option<String>,
}

impl RunMeta {
    /// A run is a fork run when its head repository differs from the base.
    /// Unknown identities are not treated as forks.
    pub fn is_fork(&self) -> bool {
        match (&self.head_repository, &self.base_repository) {
            (Some(head), Some(base)) => head != base,
            _ => false,
        }
    }
}

/// Restricts which catalog items of a run are considered.
#[derive(Debug, Clone)]
pub enum ItemFilter {
    /// Only the item with exactly this name.
    Exact(String),
    /// Item names matching a shell-style glob.
    Glob { pattern: String, regex: Regex },
    /// Only the item (task) with this id.
    TaskId(String),
}

impl ItemFilter {
    /// Compiles a glob filter. Supports `*`, `?` and `[...]`/`[!...]` classes.
    pub fn glob(pattern: &str) -> Result<Self, IngestError> {
        let regex = glob_to_regex(pattern)?;
        Ok(ItemFilter::Glob {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, item: &CatalogItem) -> bool {
        match self {
            ItemFilter::Exact(name) => item.name == *name,
            ItemFilter::Glob { regex, .. } => regex.is_match(&item.name),
            ItemFilter::TaskId(id) => item.id == *id,
        }
    }
}

fn glob_to_regex(glob: &str) -> Result<Regex, IngestError> {
    let invalid = |reason: String| IngestError::InvalidFilter {
        pattern: glob.to_string(),
        reason,
    };

    let mut source = String::from("^");
    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            '[' => {
                let mut class = String::from("[");
                let mut closed = false;
                let mut first = true;
                for c in chars.by_ref() {
                    match c {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '!' | '^' if first => class.push('^'),
                        '\\' | '[' | ']' => {
                            class.push('\\');
                            class.push(c);
                        }
                        other => class.push(other),
                    }
                    first = false;
                }
                if !closed {
                    return Err(invalid("unterminated character class".to_string()));
                }
                class.push(']');
                source.push_str(&class);
            }
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');

    Regex::new(&source).map_err(|e| invalid(e.to_string()))
}

/// Fetches every catalog page for the notified run.
///
/// Pagination stops when the provider returns no (or an empty) continuation
/// token. Any page failure aborts the whole fetch; earlier pages are dropped.
/// More than `max_pages` pages is treated as a runaway provider.
pub async fn fetch_catalog<S>(
    source: &S,
    notification: &RunNotification,
    max_pages: usize,
) -> Result<Vec<CatalogItem>, IngestError>
where
    S: CatalogSource + ?Sized,
{
    let mut items = Vec::new();
    let mut continuation: Option<String> = None;

    for page_number in 1..=max_pages {
        let page = match source.list_page(notification, continuation.take()).await {
            Ok(page) => page,
            Err(e) => {
                error!(
                    run = %notification,
                    page = page_number,
                    error = %e,
                    "[CATALOG] Failed to fetch catalog page"
                );
                return Err(IngestError::Catalog {
                    run: notification.to_string(),
                    source: e,
                });
            }
        };
        debug!(
            run = %notification,
            page = page_number,
            items = page.items.len(),
            "[CATALOG] Fetched catalog page"
        );
        items.extend(page.items);

        match page.continuation.filter(|token| !token.is_empty()) {
            Some(token) => continuation = Some(token),
            None => {
                info!(
                    run = %notification,
                    pages = page_number,
                    items = items.len(),
                    "[CATALOG] Catalog complete"
                );
                return Ok(apply_filter(items, notification.filter.as_ref()));
            }
        }
    }

    error!(run = %notification, max_pages, "[CATALOG] Page cap exceeded");
    Err(IngestError::TooManyPages {
        run: notification.to_string(),
        max_pages,
    })
}

fn apply_filter(items: Vec<CatalogItem>, filter: Option<&ItemFilter>) -> Vec<CatalogItem> {
    let Some(filter) = filter else {
        return items;
    };
    items
        .into_iter()
        .filter(|item| {
            let keep = filter.matches(item);
            if !keep {
                info!(item = %item.name, "[CATALOG] Skipping item not matching filter");
            }
            keep
        })
        .collect()
}
