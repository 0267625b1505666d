//! # contract: collaborator interfaces of the ingestion pipeline
//!
//! The pipeline talks to three outside parties, each behind one trait:
//! - [`CatalogSource`]: a CI provider's run metadata and paginated artifact listing;
//! - [`ReceiverClient`]: the results receiver that accepts one run per product;
//! - [`CredentialStore`]: where uploader credentials live.
//!
//! All methods are async and return a boxed error; callers wrap those into
//! [`crate::error::IngestError`] with the context they have.
//!
//! ## Mocking & Testing
//! Every trait is annotated for `mockall`. The mocks are exported under the
//! `test-export-mocks` feature so integration tests and downstream crates can
//! script providers and receivers deterministically.

use async_trait::async_trait;
use mockall::automock;

use crate::catalog::{CatalogItem, RunMeta, RunNotification};
use crate::labels::{join_labels, LabelSet};

/// Boxed error returned across every collaborator boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One page of a provider listing.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub items: Vec<CatalogItem>,
    /// Token for the next page; `None` or empty on the last page.
    pub continuation: Option<String>,
}

/// Username/password pair an uploader authenticates to the receiver with.
#[derive(Clone, PartialEq, Eq)]
pub struct UploaderCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for UploaderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploaderCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the receiver needs to create one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSubmission {
    /// Revision SHA; omitted from the request when empty.
    pub sha: String,
    pub username: String,
    pub password: String,
    pub result_urls: Vec<String>,
    pub screenshot_urls: Vec<String>,
    pub archive_urls: Vec<String>,
    pub labels: LabelSet,
    pub callback_url: Option<String>,
}

impl RunSubmission {
    /// Form fields in the order the receiver expects them. URL lists become
    /// repeated fields; labels are a single comma-joined field.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if !self.sha.is_empty() {
            fields.push(("revision", self.sha.clone()));
        }
        for url in &self.result_urls {
            fields.push(("result_url", url.clone()));
        }
        for url in &self.screenshot_urls {
            fields.push(("screenshot_url", url.clone()));
        }
        for url in &self.archive_urls {
            fields.push(("archive_url", url.clone()));
        }
        if !self.labels.is_empty() {
            fields.push(("labels", join_labels(&self.labels)));
        }
        if let Some(callback) = &self.callback_url {
            fields.push(("callback_url", callback.clone()));
        }
        fields
    }
}

/// A CI provider's view of a finished run.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Branch, event, head SHA and repository identities of the run.
    async fn run_meta(&self, notification: &RunNotification) -> Result<RunMeta, BoxError>;

    /// One page of the run's listing. `continuation` is `None` for the first page.
    async fn list_page(
        &self,
        notification: &RunNotification,
        continuation: Option<String>,
    ) -> Result<CatalogPage, BoxError>;
}

/// Client for the results receiver.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ReceiverClient: Send + Sync {
    /// Creates one run. Non-2xx responses are errors carrying the status code.
    async fn create_run(&self, submission: RunSubmission) -> Result<(), BoxError>;
}

/// Source of uploader credentials, keyed by uploader identity
/// (`azure`, `taskcluster`, `github-actions`).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_uploader(&self, name: &str) -> Result<UploaderCredentials, BoxError>;
}
