//! # classify: product identity and labels for catalog items
//!
//! One [`Classifier`] serves every provider. What differs between providers is
//! data: a [`PatternTable`] of name patterns plus the uploader identity and SHA
//! requirement, bundled as a [`ProviderProfile`].
//!
//! ## Matching
//! - A structured pattern (when present) must match the whole item name and
//!   yields the product stem and a *tag*; otherwise the tag is the full name.
//! - Keyword patterns run against the tag, PR-base first. The base keyword
//!   textually extends the head keyword, so checking it first keeps the two
//!   mutually exclusive.
//! - Keyword patterns may capture a `product` group; an absent or empty stem
//!   falls back to the table's default product.
//!
//! ## Labels
//! - `pr_head` / `pr_base` unless the run is a confirmed push; the product key
//!   gets a matching suffix.
//! - `master` for master-eligible items of non-PR, non-fork runs on the trunk
//!   or an epoch branch. Never together with a PR label.
//! - `user:<sender>` whenever the sender is known.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::catalog::{CatalogItem, Locator, Provider, RunEvent, RunMeta};
use crate::config::BranchMatcher;
use crate::labels::{user_label, LabelSet, MASTER_LABEL, PR_BASE_LABEL, PR_HEAD_LABEL};

/// How an item relates to the run that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A plain results run.
    Results,
    /// Affected tests with the pull request's changes.
    PrHead,
    /// Affected tests without the pull request's changes.
    PrBase,
}

/// Name patterns of one provider.
#[derive(Debug, Clone)]
pub struct PatternTable {
    /// Whole-name pattern with `product` and `tag` groups.
    pub structure: Option<Regex>,
    pub pr_base: Regex,
    pub pr_head: Regex,
    pub master: Regex,
    pub skip: Option<Regex>,
    pub default_product: String,
}

/// Everything provider-specific the pipeline needs.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub provider: Provider,
    /// Identity used to look up receiver credentials.
    pub uploader: &'static str,
    /// Whether a run without a head SHA is an error.
    pub requires_sha: bool,
    pub patterns: PatternTable,
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("static pattern compiles")
}

fn azure_profile() -> &'static ProviderProfile {
    static PROFILE: OnceLock<ProviderProfile> = OnceLock::new();
    PROFILE.get_or_init(|| ProviderProfile {
        provider: Provider::Azure,
        uploader: "azure",
        requires_sha: true,
        patterns: PatternTable {
            structure: None,
            // Affected-tests jobs publish bare `results`; full runs prefix the product.
            pr_base: pattern(r"^results-without-changes$"),
            pr_head: pattern(r"^results$"),
            master: pattern(r"^(?P<product>.+)-results$"),
            skip: None,
            default_product: Provider::Azure.as_str().to_string(),
        },
    })
}

fn taskcluster_profile() -> &'static ProviderProfile {
    static PROFILE: OnceLock<ProviderProfile> = OnceLock::new();
    PROFILE.get_or_init(|| ProviderProfile {
        provider: Provider::Taskcluster,
        uploader: "taskcluster",
        requires_sha: true,
        patterns: PatternTable {
            structure: Some(pattern(
                r"^wpt-(?P<product>[a-z_]+-[a-z]+)-(?P<tag>[a-z]+(?:-[a-z]+)*)(?:-\d+)?$",
            )),
            pr_base: pattern(r"^results-without-changes$"),
            pr_head: pattern(r"^results$"),
            master: pattern(r"^[a-z]+(?:-[a-z]+)*$"),
            skip: Some(pattern(r"^stability$")),
            default_product: Provider::Taskcluster.as_str().to_string(),
        },
    })
}

fn github_actions_profile() -> &'static ProviderProfile {
    static PROFILE: OnceLock<ProviderProfile> = OnceLock::new();
    PROFILE.get_or_init(|| ProviderProfile {
        provider: Provider::GithubActions,
        uploader: "github-actions",
        requires_sha: false,
        patterns: PatternTable {
            structure: None,
            pr_base: pattern(r"^(?:(?P<product>.+?)(?:-\d+)?-)?affected-tests-without-changes$"),
            pr_head: pattern(r"^(?:(?P<product>.+?)(?:-\d+)?-)?affected-tests$"),
            master: pattern(r"^(?:(?P<product>.+?)-)?results(?:-\d+)?$"),
            skip: None,
            default_product: Provider::GithubActions.as_str().to_string(),
        },
    })
}

impl ProviderProfile {
    /// The built-in profile of `provider`. Patterns are compiled once per
    /// process; the returned copy shares them.
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Azure => azure_profile(),
            Provider::Taskcluster => taskcluster_profile(),
            Provider::GithubActions => github_actions_profile(),
        }
        .clone()
    }
}

/// The classifier's verdict for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub product: String,
    pub kind: ItemKind,
    pub labels: LabelSet,
    /// False when the item has not finished; its whole product is discarded.
    pub complete: bool,
    pub locator: Locator,
    pub screenshot: Option<String>,
}

/// `Some(stem)` when `pattern` matches; the stem is the `product` group, if any.
fn keyword_stem(pattern: &Regex, tag: &str) -> Option<Option<String>> {
    pattern.captures(tag).map(|caps| {
        caps.name("product")
            .map(|m| m.as_str().to_string())
            .filter(|stem| !stem.is_empty())
    })
}

#[derive(Debug, Clone)]
pub struct Classifier {
    profile: ProviderProfile,
    branches: BranchMatcher,
}

impl Classifier {
    pub fn new(profile: ProviderProfile, branches: BranchMatcher) -> Self {
        Classifier { profile, branches }
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Classifies one item in the context of its run. `None` means the item is
    /// not an uploadable result (unrecognised name, skipped tag, or a PR-only
    /// artifact that cannot be attributed).
    pub fn classify(&self, item: &CatalogItem, meta: &RunMeta) -> Option<Classification> {
        let table = &self.profile.patterns;

        let (structured_stem, tag) = match &table.structure {
            Some(structure) => {
                let Some(caps) = structure.captures(&item.name) else {
                    info!(item = %item.name, "[CLASSIFY] Ignoring item with unrecognised name");
                    return None;
                };
                let stem = caps.name("product").map(|m| m.as_str().to_string());
                let tag = caps
                    .name("tag")
                    .map_or(item.name.as_str(), |m| m.as_str())
                    .to_string();
                (stem, tag)
            }
            None => (None, item.name.clone()),
        };

        if table.skip.as_ref().is_some_and(|skip| skip.is_match(&tag)) {
            info!(item = %item.name, tag = %tag, "[CLASSIFY] Skipping item");
            return None;
        }

        let base = keyword_stem(&table.pr_base, &tag);
        let (head, master) = if base.is_some() {
            (None, None)
        } else {
            (
                keyword_stem(&table.pr_head, &tag),
                keyword_stem(&table.master, &tag),
            )
        };

        let pr_context = meta.event != RunEvent::Push;
        let (kind, master_eligible, stem) = match (base, head, master) {
            (Some(stem), _, _) if pr_context => (ItemKind::PrBase, false, stem),
            (_, Some(stem), _) if pr_context => (ItemKind::PrHead, false, stem),
            (_, _, Some(stem)) => (ItemKind::Results, true, stem),
            // PR artifacts of a confirmed push are uploaded without PR labels.
            (Some(stem), _, _) | (_, Some(stem), _) => (ItemKind::Results, false, stem),
            (None, None, None) => {
                info!(item = %item.name, "[CLASSIFY] Ignoring item with unrecognised name");
                return None;
            }
        };

        let stem = structured_stem
            .filter(|stem| !stem.is_empty())
            .or(stem)
            .unwrap_or_else(|| table.default_product.clone());

        let mut labels = LabelSet::new();
        let product = match kind {
            ItemKind::PrHead => {
                labels.insert(PR_HEAD_LABEL.to_string());
                format!("{stem}-{PR_HEAD_LABEL}")
            }
            ItemKind::PrBase => {
                labels.insert(PR_BASE_LABEL.to_string());
                format!("{stem}-{PR_BASE_LABEL}")
            }
            ItemKind::Results => {
                if master_eligible && self.is_master_run(meta) {
                    labels.insert(MASTER_LABEL.to_string());
                }
                stem
            }
        };
        if let Some(sender) = meta.sender.as_deref().filter(|s| !s.is_empty()) {
            labels.insert(user_label(sender));
        }

        let complete = item.state.is_completed();
        debug!(
            item = %item.name,
            product = %product,
            ?kind,
            complete,
            "[CLASSIFY] Classified item"
        );

        Some(Classification {
            product,
            kind,
            labels,
            complete,
            locator: item.locator.clone(),
            screenshot: item.screenshot.clone(),
        })
    }

    fn is_master_run(&self, meta: &RunMeta) -> bool {
        meta.event != RunEvent::PullRequest
            && !meta.is_fork()
            && meta
                .head_branch
                .as_deref()
                .is_some_and(|branch| self.branches.is_master_like(branch))
    }
}
