//! Wire-visible label vocabulary shared by every provider.
//!
//! These literal tokens are what the results receiver stores and queries on.
//! They must never be renamed per provider.

use std::collections::BTreeSet;

/// Runs produced from the trunk branch (or a periodic epoch branch).
pub const MASTER_LABEL: &str = "master";

/// Affected tests run on the head of a pull request (with the changes).
pub const PR_HEAD_LABEL: &str = "pr_head";

/// Affected tests run against the pull request base (without the changes).
pub const PR_BASE_LABEL: &str = "pr_base";

/// Prefix for labels carrying a GitHub handle; usernames are user input.
pub const USER_LABEL_PREFIX: &str = "user:";

/// An unordered set of labels. Ordered storage keeps the rendered form stable.
pub type LabelSet = BTreeSet<String>;

/// Prefixes the given username for use as a label.
pub fn user_label(username: &str) -> String {
    format!("{USER_LABEL_PREFIX}{username}")
}

/// Renders a label set the way the receiver expects it: comma-joined.
pub fn join_labels(labels: &LabelSet) -> String {
    labels.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
