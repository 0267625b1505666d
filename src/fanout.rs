//! # fanout: one concurrent upload per product
//!
//! Each bucket is moved into its own tokio task, which performs exactly one
//! receiver call under a timeout and reports into a bounded channel sized to
//! the number of buckets. The caller joins every task before draining the
//! channel; no upload is abandoned or cancelled because another one failed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::aggregate::ProductBucket;
use crate::contract::{ReceiverClient, RunSubmission, UploaderCredentials};

/// Default per-upload timeout.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one product's upload. Errors are kept as text: they are only
/// ever reported, never matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub product: String,
    pub result: Result<(), String>,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-run upload settings shared by every worker.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub timeout: Duration,
    pub callback_url: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            timeout: DEFAULT_UPLOAD_TIMEOUT,
            callback_url: None,
        }
    }
}

/// Uploads every bucket concurrently and returns one outcome per bucket.
pub async fn upload_all(
    receiver: Arc<dyn ReceiverClient>,
    buckets: BTreeMap<String, ProductBucket>,
    sha: &str,
    credentials: &UploaderCredentials,
    options: &UploadOptions,
) -> Vec<UploadOutcome> {
    let (sink, mut outcomes_rx) = mpsc::channel(buckets.len().max(1));
    let mut products = Vec::with_capacity(buckets.len());
    let mut workers = Vec::with_capacity(buckets.len());

    for (product, bucket) in buckets {
        let submission = RunSubmission {
            sha: sha.to_string(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            result_urls: bucket.results,
            screenshot_urls: bucket.screenshots,
            archive_urls: bucket.archives,
            labels: bucket.labels,
            callback_url: options.callback_url.clone(),
        };
        let receiver = Arc::clone(&receiver);
        let sink = sink.clone();
        let timeout = options.timeout;
        let task_product = product.clone();

        let handle = tokio::spawn(async move {
            let result = upload_one(receiver.as_ref(), &task_product, submission, timeout).await;
            // The channel holds one slot per worker, so this send never waits.
            let _ = sink
                .send(UploadOutcome {
                    product: task_product,
                    result,
                })
                .await;
        });
        products.push(product);
        workers.push(handle);
    }
    drop(sink);

    let joined = join_all(workers).await;
    let mut outcomes = Vec::with_capacity(joined.len());
    for (product, joined) in products.into_iter().zip(joined) {
        if let Err(e) = joined {
            error!(product = %product, error = %e, "[FANOUT] Upload task aborted");
            outcomes.push(UploadOutcome {
                product,
                result: Err(format!("upload task failed: {e}")),
            });
        }
    }
    while let Some(outcome) = outcomes_rx.recv().await {
        outcomes.push(outcome);
    }
    outcomes
}

async fn upload_one(
    receiver: &dyn ReceiverClient,
    product: &str,
    submission: RunSubmission,
    timeout: Duration,
) -> Result<(), String> {
    info!(
        product = %product,
        results = submission.result_urls.len(),
        archives = submission.archive_urls.len(),
        screenshots = submission.screenshot_urls.len(),
        labels = ?submission.labels,
        "[FANOUT] Sending run to results receiver"
    );

    match tokio::time::timeout(timeout, receiver.create_run(submission)).await {
        Ok(Ok(())) => {
            info!(product = %product, "[FANOUT] Run accepted");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(product = %product, error = %e, "[FANOUT] Run rejected");
            Err(e.to_string())
        }
        Err(_) => {
            error!(product = %product, ?timeout, "[FANOUT] Upload timed out");
            Err(format!("upload timed out after {timeout:?}"))
        }
    }
}
