//! Batch reshaping by metadata: grouping and predicate selection.
//!
//! Both stages are pure with respect to pixel data — they only rearrange
//! image membership across batches.

use crate::error::ProcessingError;
use crate::image::{Batch, HeaderValue};
use crate::processors::BatchProcessor;

/// Group key used for images missing the batching key.
pub const UNSET_GROUP: &str = "UNSET";

/// Partitions a batch into one output batch per distinct value of a header
/// key. Groups appear in first-encounter order; relative image order within
/// each group is preserved, so equal keys never reorder.
#[derive(Debug, Clone)]
pub struct ImageBatcher {
    split_key: String,
}

impl ImageBatcher {
    pub fn new(split_key: impl Into<String>) -> Self {
        Self {
            split_key: split_key.into(),
        }
    }
}

impl BatchProcessor for ImageBatcher {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessingError> {
        let mut groups: Vec<(String, Batch)> = Vec::new();

        for image in batch {
            let key = image
                .header
                .get(&self.split_key)
                .map(HeaderValue::as_group_key)
                .unwrap_or_else(|| UNSET_GROUP.to_string());

            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push(image),
                None => {
                    let mut group = Batch::empty();
                    group.push(image);
                    groups.push((key, group));
                }
            }
        }

        tracing::debug!(
            "Split batch into {} group(s) by '{}'",
            groups.len(),
            self.split_key
        );
        Ok(groups.into_iter().map(|(_, batch)| batch).collect())
    }
}

/// Keeps images matching any of a set of exact (key, value) predicates.
/// An empty predicate set is the identity; zero matches yield an empty
/// batch, not an error.
#[derive(Debug, Clone, Default)]
pub struct ImageSelector {
    predicates: Vec<(String, HeaderValue)>,
}

impl ImageSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.predicates.push((key.into(), value.into()));
        self
    }
}

impl BatchProcessor for ImageSelector {
    fn name(&self) -> &'static str {
        "select"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessingError> {
        if self.predicates.is_empty() {
            return Ok(vec![batch]);
        }

        let before = batch.len();
        let selected: Batch = batch
            .into_iter()
            .filter(|image| {
                self.predicates
                    .iter()
                    .any(|(key, value)| image.header.get(key) == Some(value))
            })
            .collect();

        tracing::debug!("Selected {}/{} image(s)", selected.len(), before);
        Ok(vec![selected])
    }
}
