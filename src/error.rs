//! Error taxonomy for one ingestion invocation.
//!
//! Three classes reach the caller:
//! - fatal errors ([`IngestError`] variants other than `NoResults`) abort the run
//!   before anything is uploaded;
//! - [`IngestError::NoResults`] means "nothing to do yet" and is not alerting;
//! - partial upload failures are not an `IngestError` at all: they travel inside
//!   the report as an [`UploadErrors`] next to the products that did succeed.

use std::fmt;

use thiserror::Error;

use crate::contract::BoxError;
use crate::fanout::UploadOutcome;

/// Errors that stop an ingestion run before or instead of the upload fan-out.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A catalog page could not be fetched; earlier pages are discarded.
    #[error("fetching catalog for {run}: {source}")]
    Catalog {
        run: String,
        #[source]
        source: BoxError,
    },

    /// Run metadata (branch, event, head SHA) could not be fetched.
    #[error("fetching run metadata for {run}: {source}")]
    Metadata {
        run: String,
        #[source]
        source: BoxError,
    },

    /// The provider kept returning continuation tokens past the page cap.
    #[error("more than {max_pages} catalog pages returned for {run}")]
    TooManyPages { run: String, max_pages: usize },

    /// The provider requires a head SHA and the run carries none.
    #[error("no head sha for {run}")]
    MissingSha { run: String },

    /// A provider link (status target, check-run details) could not be parsed.
    #[error("unrecognized {provider} url: {url}")]
    UnrecognizedUrl { provider: String, url: String },

    /// A webhook-style event that cannot be processed as delivered
    /// (for example a check suite that has not completed).
    #[error("invalid {provider} event: {reason}")]
    InvalidEvent { provider: String, reason: String },

    /// Uploader credentials could not be resolved.
    #[error("failed to get {uploader} uploader credentials: {source}")]
    Credentials {
        uploader: String,
        #[source]
        source: BoxError,
    },

    /// An item-name filter could not be compiled.
    #[error("invalid item filter {pattern:?}: {reason}")]
    InvalidFilter { pattern: String, reason: String },

    /// Configuration values that cannot be used (bad pattern, zero page cap...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Nothing classified survived invalidation. Expected while a run is in flight.
    #[error("no result URLs found in {run}")]
    NoResults { run: String },
}

impl IngestError {
    /// Whether this is the distinguished "no results available yet" condition.
    pub fn is_no_results(&self) -> bool {
        matches!(self, IngestError::NoResults { .. })
    }
}

/// One product's upload failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub product: String,
    pub message: String,
}

/// Aggregate of every failed product upload in a run.
///
/// The rendered message keeps each underlying error's text (status codes,
/// timeout markers) so a single log line is enough for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadErrors {
    when: String,
    failures: Vec<UploadFailure>,
}

impl UploadErrors {
    /// Combines per-product outcomes into a single error.
    ///
    /// Returns `None` for an empty outcome list or when every upload succeeded.
    /// Failures are ordered by product so the message does not depend on which
    /// worker finished first.
    pub fn combine<I>(outcomes: I, when: impl Into<String>) -> Option<Self>
    where
        I: IntoIterator<Item = UploadOutcome>,
    {
        let mut failures: Vec<UploadFailure> = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome.result {
                Ok(()) => None,
                Err(message) => Some(UploadFailure {
                    product: outcome.product,
                    message,
                }),
            })
            .collect();
        if failures.is_empty() {
            return None;
        }
        failures.sort_by(|a, b| a.product.cmp(&b.product));
        Some(UploadErrors {
            when: when.into(),
            failures,
        })
    }

    /// Number of failed uploads.
    pub fn count(&self) -> usize {
        self.failures.len()
    }

    pub fn failures(&self) -> &[UploadFailure] {
        &self.failures
    }
}

impl fmt::Display for UploadErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} error(s) occurred when {}:",
            self.failures.len(),
            self.when
        )?;
        for failure in &self.failures {
            writeln!(f, "{}: {}", failure.product, failure.message.trim())?;
        }
        Ok(())
    }
}

impl std::error::Error for UploadErrors {}
