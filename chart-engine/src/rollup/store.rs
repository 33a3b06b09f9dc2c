//! Boundary to the storage layer that owns raw rows and committed buckets.

use std::ops::Range;

use thiserror::Error;

use super::source::{Bucket, RawRow};
use crate::resolution::Resolution;

/// Failure reported by a store implementation.
#[derive(Error, Debug)]
#[error("store error: {0}")]
pub struct StoreError(#[source] Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

#[trait_variant::make(ChartStore: Send)]
pub trait LocalChartStore {
    /// Timestamp of the oldest raw row of `source`.
    async fn earliest_raw_timestamp(&self, source: &str) -> Result<Option<u64>, StoreError>;

    /// Timestamp of the newest raw row of `source`.
    async fn latest_raw_timestamp(&self, source: &str) -> Result<Option<u64>, StoreError>;

    /// Raw rows with `range.start <= timestamp < range.end`, ascending by timestamp.
    async fn load_raw_rows(
        &self,
        source: &str,
        range: Range<u64>,
    ) -> Result<Vec<RawRow>, StoreError>;

    /// Start timestamp of the most recently committed bucket.
    async fn last_committed_bucket(
        &self,
        source: &str,
        resolution: Resolution,
    ) -> Result<Option<u64>, StoreError>;

    /// Persist `buckets` atomically: either all of them are stored or none.
    async fn commit_buckets(
        &self,
        source: &str,
        resolution: Resolution,
        buckets: Vec<Bucket>,
    ) -> Result<(), StoreError>;

    /// All committed buckets, ascending by start timestamp.
    async fn load_buckets(
        &self,
        source: &str,
        resolution: Resolution,
    ) -> Result<Vec<Bucket>, StoreError>;
}
