//! # ingest: one notification, end to end
//!
//! [`Ingestor::process`] runs the whole pipeline for a finished CI run:
//!
//! 1. ask the provider for run metadata and apply the branch policy;
//! 2. fetch every catalog page;
//! 3. classify each item and aggregate per product, invalidating products with
//!    unfinished items;
//! 4. resolve uploader credentials and upload one run per product concurrently;
//! 5. combine per-product failures into one error next to the successes.
//!
//! Fatal problems (catalog, metadata, credentials, missing SHA) surface as
//! [`IngestError`] before anything is uploaded. Partial upload failure is not
//! fatal: the report says which products went through and carries the
//! combined [`UploadErrors`] for the rest.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::aggregate::aggregate;
use crate::catalog::{fetch_catalog, RunNotification};
use crate::classify::{Classifier, ProviderProfile};
use crate::config::{BranchMatcher, BranchPolicy, IngestConfig};
use crate::contract::{CatalogSource, CredentialStore, ReceiverClient};
use crate::error::{IngestError, UploadErrors};
use crate::fanout::{upload_all, UploadOptions};

/// How a caller (typically an HTTP handler) should report an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// At least one run was uploaded and none failed.
    Processed,
    /// The notification was deliberately not processed.
    Ignored,
    /// The run has no uploadable results (yet).
    NoResults,
    /// A fatal error, or at least one product failed to upload.
    Failed,
}

impl Disposition {
    pub fn http_status(&self) -> u16 {
        match self {
            Disposition::Processed => 200,
            Disposition::Ignored | Disposition::NoResults => 204,
            Disposition::Failed => 500,
        }
    }
}

/// Outcome of a run that reached (or deliberately skipped) the upload stage.
#[derive(Debug)]
pub struct IngestReport {
    /// Products whose runs the receiver accepted, sorted.
    pub uploaded: Vec<String>,
    pub failures: Option<UploadErrors>,
}

impl IngestReport {
    pub fn ignored() -> Self {
        IngestReport {
            uploaded: Vec::new(),
            failures: None,
        }
    }

    /// True iff at least one product was uploaded.
    pub fn processed(&self) -> bool {
        !self.uploaded.is_empty()
    }

    pub fn disposition(&self) -> Disposition {
        if self.failures.is_some() {
            Disposition::Failed
        } else if self.processed() {
            Disposition::Processed
        } else {
            Disposition::Ignored
        }
    }

    /// The `(processed, error)` pair.
    pub fn into_parts(self) -> (bool, Option<UploadErrors>) {
        let processed = self.processed();
        (processed, self.failures)
    }
}

impl IngestError {
    pub fn disposition(&self) -> Disposition {
        if self.is_no_results() {
            Disposition::NoResults
        } else {
            Disposition::Failed
        }
    }
}

/// Runs the ingestion pipeline against injected collaborators.
pub struct Ingestor {
    receiver: Arc<dyn ReceiverClient>,
    credentials: Arc<dyn CredentialStore>,
    policy: Arc<dyn BranchPolicy>,
    branches: BranchMatcher,
    upload: UploadOptions,
    max_pages: usize,
}

impl Ingestor {
    pub fn new(
        config: &IngestConfig,
        receiver: Arc<dyn ReceiverClient>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Ingestor {
            receiver,
            credentials,
            policy: Arc::new(config.branch_policy()?),
            branches: config.branch_matcher()?,
            upload: UploadOptions {
                timeout: config.upload_timeout(),
                callback_url: config.receiver.callback_url.clone(),
            },
            max_pages: config.processing.max_pages,
        })
    }

    /// Replaces the branch policy derived from the configuration.
    pub fn with_branch_policy(mut self, policy: Arc<dyn BranchPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_upload_options(mut self, upload: UploadOptions) -> Self {
        self.upload = upload;
        self
    }

    pub async fn process(
        &self,
        notification: &RunNotification,
        source: &dyn CatalogSource,
    ) -> Result<IngestReport, IngestError> {
        let profile = ProviderProfile::for_provider(notification.provider);
        info!(run = %notification, "[INGEST] Processing notification");

        let mut meta = source.run_meta(notification).await.map_err(|e| {
            error!(run = %notification, error = %e, "[INGEST] Failed to fetch run metadata");
            IngestError::Metadata {
                run: notification.to_string(),
                source: e,
            }
        })?;
        if notification.sender.is_some() {
            meta.sender = notification.sender.clone();
        }

        if !self.policy.allows(&meta) {
            info!(
                run = %notification,
                branch = ?meta.head_branch,
                event = ?meta.event,
                "[INGEST] Run ignored by branch policy"
            );
            return Ok(IngestReport::ignored());
        }

        let sha = meta.head_sha.clone().unwrap_or_default();
        if profile.requires_sha && sha.is_empty() {
            error!(run = %notification, "[INGEST] Run has no head sha");
            return Err(IngestError::MissingSha {
                run: notification.to_string(),
            });
        }

        let items = fetch_catalog(source, notification, self.max_pages).await?;
        let classifier = Classifier::new(profile, self.branches.clone());
        let buckets = aggregate(
            items
                .iter()
                .filter_map(|item| classifier.classify(item, &meta)),
        );
        if buckets.is_empty() {
            info!(run = %notification, items = items.len(), "[INGEST] No results to upload");
            return Err(IngestError::NoResults {
                run: notification.to_string(),
            });
        }

        let uploader = classifier.profile().uploader;
        let credentials = self.credentials.get_uploader(uploader).await.map_err(|e| {
            error!(uploader, error = %e, "[INGEST] Failed to get uploader credentials");
            IngestError::Credentials {
                uploader: uploader.to_string(),
                source: e,
            }
        })?;

        let total = buckets.len();
        info!(run = %notification, products = total, "[INGEST] Uploading runs");
        let outcomes = upload_all(
            Arc::clone(&self.receiver),
            buckets,
            &sha,
            &credentials,
            &self.upload,
        )
        .await;

        let mut uploaded: Vec<String> = outcomes
            .iter()
            .filter(|outcome| outcome.is_success())
            .map(|outcome| outcome.product.clone())
            .collect();
        uploaded.sort();

        let failures = UploadErrors::combine(
            outcomes,
            format!("sending {total} runs to results receiver"),
        );
        match &failures {
            Some(errors) => warn!(
                run = %notification,
                uploaded = uploaded.len(),
                failed = errors.count(),
                "[INGEST] Some runs failed to upload"
            ),
            None => info!(
                run = %notification,
                uploaded = uploaded.len(),
                "[INGEST] All runs uploaded"
            ),
        }

        Ok(IngestReport { uploaded, failures })
    }
}
