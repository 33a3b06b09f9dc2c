use serde::{Deserialize, Serialize};

use crate::{
    column::{MetricKind, MetricValue},
    resolution::Resolution,
};

/// Single tracked metric of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSpec {
    pub key: String,
    pub kind: MetricKind,
}

impl MetricSpec {
    pub fn new(key: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }
}

/// Description of one raw event log that gets rolled up.
///
/// Every raw row of the source carries one value per entry of `metrics`,
/// in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollupSource {
    pub name: String,
    pub metrics: Vec<MetricSpec>,
    /// Rows carry a block height that is kept on every bucket.
    #[serde(default)]
    pub with_height: bool,
}

impl RollupSource {
    pub fn new(name: impl Into<String>, metrics: Vec<MetricSpec>) -> Self {
        Self {
            name: name.into(),
            metrics,
            with_height: false,
        }
    }

    pub fn with_height(mut self) -> Self {
        self.with_height = true;
        self
    }

    pub fn metric_position(&self, key: &str) -> Option<usize> {
        self.metrics.iter().position(|m| m.key == key)
    }
}

/// One raw sample as loaded from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub timestamp: u64,
    pub height: Option<u64>,
    pub values: Vec<MetricValue>,
}

impl RawRow {
    pub fn new(timestamp: u64, values: Vec<MetricValue>) -> Self {
        Self {
            timestamp,
            height: None,
            values,
        }
    }

    pub fn with_height(mut self, height: u64) -> Self {
        self.height = Some(height);
        self
    }
}

/// Downsampled sample of a source at some resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub resolution: Resolution,
    pub start_timestamp: u64,
    /// One aggregated value per metric of the source
    pub values: Vec<MetricValue>,
    pub height: Option<u64>,
}
