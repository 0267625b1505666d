//! # ci-ingest
//!
//! Ingests test-result artifacts of finished CI runs (Azure Pipelines,
//! Taskcluster, GitHub Actions) and forwards them, one labeled run per
//! product, to a results receiver.
//!
//! The pipeline is: [`catalog::fetch_catalog`] → [`classify::Classifier`] →
//! [`aggregate::aggregate`] → [`fanout::upload_all`] →
//! [`error::UploadErrors::combine`], orchestrated by [`ingest::Ingestor`].

pub mod aggregate;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod contract;
pub mod error;
pub mod fanout;
pub mod ingest;
pub mod labels;
pub mod providers;
pub mod receiver;

pub use catalog::{Provider, RunNotification};
pub use config::IngestConfig;
pub use error::{IngestError, UploadErrors};
pub use ingest::{Disposition, IngestReport, Ingestor};
