//! Incremental rollup of raw rows into hour/day buckets.
//!
//! A pass for one `(source, resolution)` pair starts right after the last
//! committed bucket (or at the earliest raw row) and walks towards `now` in
//! fixed-width windows. Every window is loaded, binned, averaged and
//! committed as one atomic batch, so a failed pass leaves the store at a
//! window boundary and the next pass continues from there.
//!
//! Rows of the last closed bucket and of the trailing open bucket of a window
//! are carried into the next window, and a resumed pass reloads the bucket
//! under the cursor. Binning then always sees one bucket of history, so a
//! bucket is committed as soon as a later row proves it is closed, and it
//! always contains exactly the rows of its aligned period. Re-binned history
//! is dropped by the `next_boundary` check. Buckets are therefore the same no
//! matter where window edges or earlier failures fell.

mod source;
mod store;

pub use source::{Bucket, MetricSpec, RawRow, RollupSource};
pub use store::{ChartStore, LocalChartStore, StoreError};

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    binning::bin_timestamps,
    column::{AnyColumn, ChartUints, ColumnBuildError},
    metrics,
    resolution::{DAY, HOUR, Resolution, align_down},
};

#[derive(Error, Debug)]
pub enum RollupError {
    #[error("resolution '{0}' is raw data and cannot be rolled up")]
    UnsupportedResolution(Resolution),
    #[error("failed to read from store: {0}")]
    Load(#[source] StoreError),
    #[error("failed to commit buckets of window starting at {window_start}: {error}")]
    Commit {
        window_start: u64,
        #[source]
        error: StoreError,
    },
    #[error("malformed raw rows: {0}")]
    MalformedRows(String),
}

impl From<ColumnBuildError> for RollupError {
    fn from(err: ColumnBuildError) -> Self {
        RollupError::MalformedRows(err.to_string())
    }
}

/// Width of the batches loaded per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupWindows {
    pub hour: Duration,
    pub day: Duration,
}

impl Default for RollupWindows {
    fn default() -> Self {
        Self {
            hour: Duration::from_secs(7 * DAY),
            day: Duration::from_secs(30 * DAY),
        }
    }
}

impl RollupWindows {
    fn width_for(&self, resolution: Resolution) -> Option<u64> {
        let width = match resolution {
            Resolution::Default => return None,
            Resolution::Hour => self.hour,
            Resolution::Day => self.day,
        };
        // a window narrower than a bucket could never close one
        let min = resolution.width().unwrap_or(HOUR);
        Some(width.as_secs().max(min))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupStatus {
    /// Not enough time has passed since the last committed bucket
    UpToDate,
    /// The source has no raw rows
    NoData,
    Completed,
    /// Stopped between windows because of a cancellation request
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupReport {
    pub status: RollupStatus,
    pub windows: usize,
    pub rows_loaded: usize,
    pub buckets_committed: usize,
    /// Start of the newest bucket in the store after the pass
    pub last_committed: Option<u64>,
}

impl RollupReport {
    fn new(status: RollupStatus, last_committed: Option<u64>) -> Self {
        Self {
            status,
            windows: 0,
            rows_loaded: 0,
            buckets_committed: 0,
            last_committed,
        }
    }
}

type PairKey = (String, Resolution);

pub struct RollupUpdater<S> {
    store: Arc<S>,
    windows: RollupWindows,
    locks: DashMap<PairKey, Arc<tokio::sync::Mutex<()>>>,
}

impl<S: ChartStore> RollupUpdater<S> {
    pub fn new(store: Arc<S>, windows: RollupWindows) -> Self {
        Self {
            store,
            windows,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Roll up everything that closed before the current time.
    pub async fn update(
        &self,
        source: &RollupSource,
        resolution: Resolution,
        cancel: &CancellationToken,
    ) -> Result<RollupReport, RollupError> {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        self.update_at(source, resolution, now, cancel).await
    }

    /// Same as [`Self::update`], with an explicit current time.
    ///
    /// Rows with `timestamp >= now` are not considered.
    pub async fn update_at(
        &self,
        source: &RollupSource,
        resolution: Resolution,
        now: u64,
        cancel: &CancellationToken,
    ) -> Result<RollupReport, RollupError> {
        let (Some(width), Some(window_width)) =
            (resolution.width(), self.windows.width_for(resolution))
        else {
            return Err(RollupError::UnsupportedResolution(resolution));
        };

        let lock = self
            .locks
            .entry((source.name.clone(), resolution))
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let timer = metrics::ROLLUP_TIME
            .with_label_values(&[source.name.as_str(), resolution.as_str()])
            .start_timer();
        let result = self
            .run_pass(source, resolution, width, window_width, now, cancel)
            .await;
        timer.observe_duration();

        match &result {
            Ok(report) => tracing::info!(
                source = %source.name,
                resolution = resolution.as_str(),
                status = ?report.status,
                windows = report.windows,
                rows_loaded = report.rows_loaded,
                buckets_committed = report.buckets_committed,
                "rollup pass finished"
            ),
            Err(err) => {
                metrics::ROLLUP_ERRORS
                    .with_label_values(&[source.name.as_str(), resolution.as_str()])
                    .inc();
                tracing::error!(
                    source = %source.name,
                    resolution = resolution.as_str(),
                    "rollup pass failed: {}",
                    err
                );
            }
        }
        result
    }

    async fn run_pass(
        &self,
        source: &RollupSource,
        resolution: Resolution,
        width: u64,
        window_width: u64,
        now: u64,
        cancel: &CancellationToken,
    ) -> Result<RollupReport, RollupError> {
        let cursor = self
            .store
            .last_committed_bucket(&source.name, resolution)
            .await
            .map_err(RollupError::Load)?;
        let mut next_boundary = match cursor {
            Some(cursor) => cursor + width,
            None => {
                let earliest = self
                    .store
                    .earliest_raw_timestamp(&source.name)
                    .await
                    .map_err(RollupError::Load)?;
                match earliest {
                    Some(earliest) => align_down(earliest, width),
                    None => return Ok(RollupReport::new(RollupStatus::NoData, None)),
                }
            }
        };
        if now < next_boundary {
            return Ok(RollupReport::new(RollupStatus::UpToDate, cursor));
        }

        let mut report = RollupReport::new(RollupStatus::Completed, cursor);
        let mut carry: Vec<RawRow> = Vec::new();
        let mut window_start = cursor.unwrap_or(next_boundary);
        while window_start < now {
            if cancel.is_cancelled() {
                tracing::info!(
                    source = %source.name,
                    resolution = resolution.as_str(),
                    window_start,
                    "rollup pass cancelled"
                );
                report.status = RollupStatus::Cancelled;
                return Ok(report);
            }

            let window_end = (window_start + window_width).min(now);
            let mut rows = self.load_rows(source, window_start..window_end).await?;
            if let Some(first) = rows.first().map(|r| r.timestamp) {
                if first > window_start {
                    // skip the gap, but keep the window width from the first row
                    window_start = first;
                    let anchored_end = (first + window_width).min(now);
                    if anchored_end > window_end {
                        rows.extend(self.load_rows(source, window_end..anchored_end).await?);
                    }
                }
            }
            report.windows += 1;
            report.rows_loaded += rows.len();
            rows.retain(|r| r.timestamp < now);
            validate_rows(source, &rows)?;

            carry.extend(rows);
            let (buckets, keep_from) = compute_buckets(source, resolution, &carry, next_boundary)?;
            carry.drain(..keep_from);

            tracing::debug!(
                source = %source.name,
                resolution = resolution.as_str(),
                window_start,
                carried_rows = carry.len(),
                buckets = buckets.len(),
                "window binned"
            );

            if let Some(last) = buckets.last().map(|b| b.start_timestamp) {
                let committed = buckets.len();
                self.store
                    .commit_buckets(&source.name, resolution, buckets)
                    .await
                    .map_err(|error| RollupError::Commit {
                        window_start,
                        error,
                    })?;
                metrics::BUCKETS_COMMITTED
                    .with_label_values(&[source.name.as_str(), resolution.as_str()])
                    .inc_by(committed as u64);
                report.buckets_committed += committed;
                report.last_committed = Some(last);
                next_boundary = last + width;
                tracing::info!(
                    source = %source.name,
                    resolution = resolution.as_str(),
                    "processed {} to {} of records, committed {} buckets",
                    window_start,
                    window_start + window_width,
                    committed
                );
            }
            window_start += window_width;
        }
        Ok(report)
    }

    async fn load_rows(
        &self,
        source: &RollupSource,
        range: std::ops::Range<u64>,
    ) -> Result<Vec<RawRow>, RollupError> {
        self.store
            .load_raw_rows(&source.name, range)
            .await
            .map_err(RollupError::Load)
    }
}

fn validate_rows(source: &RollupSource, rows: &[RawRow]) -> Result<(), RollupError> {
    for pair in rows.windows(2) {
        if pair[1].timestamp < pair[0].timestamp {
            return Err(RollupError::MalformedRows(format!(
                "rows are not ascending: {} follows {}",
                pair[1].timestamp, pair[0].timestamp
            )));
        }
    }
    for row in rows {
        if row.values.len() != source.metrics.len() {
            return Err(RollupError::MalformedRows(format!(
                "row at {} has {} values, source '{}' tracks {} metrics",
                row.timestamp,
                row.values.len(),
                source.name,
                source.metrics.len()
            )));
        }
        if source.with_height && row.height.is_none() {
            return Err(RollupError::MalformedRows(format!(
                "row at {} has no height",
                row.timestamp
            )));
        }
    }
    Ok(())
}

/// Bin `rows` and average every metric over the closed buckets.
///
/// Buckets starting before `next_boundary` are dropped. Returns the buckets
/// and the index of the first row that has to be kept for the next window.
fn compute_buckets(
    source: &RollupSource,
    resolution: Resolution,
    rows: &[RawRow],
    next_boundary: u64,
) -> Result<(Vec<Bucket>, usize), RollupError> {
    let timestamps: ChartUints = rows.iter().map(|r| r.timestamp).collect();
    let heights: Option<ChartUints> = source
        .with_height
        .then(|| rows.iter().map(|r| r.height.unwrap_or_default()).collect());
    let binned = bin_timestamps(&timestamps, heights.as_ref(), resolution);

    let columns = source
        .metrics
        .iter()
        .enumerate()
        .map(|(position, metric)| {
            AnyColumn::from_values(metric.kind, rows.iter().map(|r| r.values[position]))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut buckets = Vec::with_capacity(binned.len());
    for (k, (start, interval)) in binned
        .buckets
        .values()
        .iter()
        .zip(&binned.intervals)
        .enumerate()
    {
        if *start < next_boundary {
            continue;
        }
        let values = columns
            .iter()
            .map(|c| c.segment_average(interval.start, interval.end))
            .collect::<Option<Vec<_>>>()
            .ok_or(ColumnBuildError::NotNumeric)?;
        let height = binned
            .companion
            .as_ref()
            .and_then(|c| c.values().get(k).copied());
        buckets.push(Bucket {
            resolution,
            start_timestamp: *start,
            values,
            height,
        });
    }
    Ok((buckets, binned.last_closed_start()))
}
