//! Per-product grouping of classified items, the step between the classifier
//! and the upload fan-out.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::catalog::Locator;
use crate::classify::Classification;
use crate::labels::LabelSet;

/// Everything uploaded for one product as a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductBucket {
    /// Result locators in discovery order.
    pub results: Vec<String>,
    /// Archive locators in discovery order.
    pub archives: Vec<String>,
    pub screenshots: Vec<String>,
    pub labels: LabelSet,
}

impl ProductBucket {
    /// A bucket with neither results nor archives has nothing to upload.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.archives.is_empty()
    }
}

/// Groups classified items by product.
///
/// A product with any unfinished item is dropped entirely: uploading a subset
/// of its chunks would create a partial run.
pub fn aggregate<I>(classifications: I) -> BTreeMap<String, ProductBucket>
where
    I: IntoIterator<Item = Classification>,
{
    let mut buckets: BTreeMap<String, ProductBucket> = BTreeMap::new();
    let mut invalidated = BTreeSet::new();

    for classification in classifications {
        if !classification.complete {
            invalidated.insert(classification.product);
            continue;
        }
        let bucket = buckets.entry(classification.product).or_default();
        match classification.locator {
            Locator::Result(url) => bucket.results.push(url),
            Locator::Archive(url) => bucket.archives.push(url),
        }
        if let Some(screenshot) = classification.screenshot {
            bucket.screenshots.push(screenshot);
        }
        bucket.labels.extend(classification.labels);
    }

    for product in &invalidated {
        info!(
            product = %product,
            "[AGGREGATE] Product has unfinished items; it will be ignored in this run"
        );
        buckets.remove(product);
    }
    buckets.retain(|_, bucket| !bucket.is_empty());
    buckets
}
