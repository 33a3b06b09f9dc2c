//! Rendering of chart payloads for request handlers.

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    cache::ChartCache,
    column::{AnyColumn, ChartUints, ColumnBuildError, MetricValue},
    data_processing::{merge_on_time_axis, trim},
    encode::{EncodeError, encode},
    resolution::Resolution,
    rollup::{ChartStore, MetricSpec, RollupSource, StoreError},
};

/// What goes on the x axis of a chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    #[default]
    Time,
    Height,
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),
    #[error("source '{source_name}' has no metric '{metric}'")]
    UnknownMetric { source_name: String, metric: String },
    #[error("no metrics requested")]
    NoMetrics,
    #[error("no sources requested")]
    NoSources,
    #[error("source '{0}' has no height axis")]
    HeightAxisUnavailable(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("stored data is malformed: {0}")]
    MalformedData(String),
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

impl From<ColumnBuildError> for RenderError {
    fn from(err: ColumnBuildError) -> Self {
        RenderError::MalformedData(err.to_string())
    }
}

impl RenderError {
    /// Whether the request itself was wrong, as opposed to a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RenderError::UnknownSource(_)
                | RenderError::UnknownMetric { .. }
                | RenderError::NoMetrics
                | RenderError::NoSources
                | RenderError::HeightAxisUnavailable(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartKey {
    pub sources: Vec<String>,
    pub metrics: Vec<String>,
    pub resolution: Resolution,
    pub axis: Axis,
}

struct Point {
    timestamp: u64,
    height: Option<u64>,
    values: Vec<MetricValue>,
}

pub struct ChartRenderer<S> {
    store: Arc<S>,
    sources: HashMap<String, RollupSource>,
    cache: ChartCache<ChartKey>,
}

impl<S: ChartStore> ChartRenderer<S> {
    pub fn new(store: Arc<S>, sources: impl IntoIterator<Item = RollupSource>) -> Self {
        Self {
            store,
            sources: sources
                .into_iter()
                .map(|source| (source.name.clone(), source))
                .collect(),
            cache: ChartCache::new(),
        }
    }

    pub fn with_cache(mut self, cache: ChartCache<ChartKey>) -> Self {
        self.cache = cache;
        self
    }

    /// Encoded chart of `metric_keys` of one source.
    ///
    /// The x axis is time or height, followed by one column per metric. Rows
    /// where every metric is zero are trimmed.
    pub async fn render_chart(
        &self,
        source: &str,
        metric_keys: &[&str],
        resolution: Resolution,
        axis: Axis,
    ) -> Result<Bytes, RenderError> {
        let source = self.source(source)?;
        let metrics = select_metrics(source, metric_keys)?;
        if axis == Axis::Height && !source.with_height {
            return Err(RenderError::HeightAxisUnavailable(source.name.clone()));
        }

        let key = ChartKey {
            sources: vec![source.name.clone()],
            metrics: metric_keys.iter().map(|m| m.to_string()).collect(),
            resolution,
            axis,
        };
        let version = self.version(&source.name, resolution).await?;
        self.cache
            .get_or_compute(&key, version, || async {
                let points = self.load_points(&source.name, resolution).await?;
                let x: ChartUints = match axis {
                    Axis::Time => points.iter().map(|p| p.timestamp).collect(),
                    Axis::Height => points.iter().map(|p| p.height.unwrap_or_default()).collect(),
                };
                let columns = metrics
                    .iter()
                    .map(|(position, metric)| metric_column(&points, *position, metric))
                    .collect::<Result<Vec<_>, _>>()?;
                trim_and_encode(x.into(), columns)
            })
            .await
    }

    /// Encoded chart of one metric across several sources on a shared time axis.
    ///
    /// Sources without a sample at some time get `null` there.
    pub async fn render_comparison(
        &self,
        sources: &[&str],
        metric_key: &str,
        resolution: Resolution,
    ) -> Result<Bytes, RenderError> {
        let selected = sources
            .iter()
            .map(|name| {
                let source = self.source(name)?;
                let (position, metric) = select_metrics(source, &[metric_key])?.remove(0);
                Ok::<_, RenderError>((source, position, metric))
            })
            .collect::<Result<Vec<_>, RenderError>>()?;
        if selected.is_empty() {
            return Err(RenderError::NoSources);
        }

        let key = ChartKey {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            metrics: vec![metric_key.to_owned()],
            resolution,
            axis: Axis::Time,
        };
        let mut hasher = DefaultHasher::new();
        for (source, _, _) in &selected {
            self.version(&source.name, resolution).await?.hash(&mut hasher);
        }
        let version = hasher.finish();

        self.cache
            .get_or_compute(&key, version, || async {
                let mut series = Vec::with_capacity(selected.len());
                for (source, position, metric) in &selected {
                    let points = self.load_points(&source.name, resolution).await?;
                    let timestamps: ChartUints = points.iter().map(|p| p.timestamp).collect();
                    series.push((timestamps, metric_column(&points, *position, metric)?));
                }
                let (axis, columns) = merge_on_time_axis(series)?;
                trim_and_encode(axis.into(), columns)
            })
            .await
    }

    fn source(&self, name: &str) -> Result<&RollupSource, RenderError> {
        self.sources
            .get(name)
            .ok_or_else(|| RenderError::UnknownSource(name.to_owned()))
    }

    /// Changes whenever new data is available for the chart.
    async fn version(&self, source: &str, resolution: Resolution) -> Result<u64, RenderError> {
        let version = match resolution {
            Resolution::Default => self.store.latest_raw_timestamp(source).await?,
            _ => self.store.last_committed_bucket(source, resolution).await?,
        };
        Ok(version.unwrap_or_default())
    }

    async fn load_points(
        &self,
        source: &str,
        resolution: Resolution,
    ) -> Result<Vec<Point>, RenderError> {
        let points = match resolution {
            Resolution::Default => self
                .store
                .load_raw_rows(source, 0..u64::MAX)
                .await?
                .into_iter()
                .map(|row| Point {
                    timestamp: row.timestamp,
                    height: row.height,
                    values: row.values,
                })
                .collect(),
            _ => self
                .store
                .load_buckets(source, resolution)
                .await?
                .into_iter()
                .map(|bucket| Point {
                    timestamp: bucket.start_timestamp,
                    height: bucket.height,
                    values: bucket.values,
                })
                .collect(),
        };
        Ok(points)
    }
}

fn select_metrics<'a>(
    source: &'a RollupSource,
    metric_keys: &[&str],
) -> Result<Vec<(usize, &'a MetricSpec)>, RenderError> {
    if metric_keys.is_empty() {
        return Err(RenderError::NoMetrics);
    }
    metric_keys
        .iter()
        .map(|key| {
            source
                .metric_position(key)
                .map(|position| (position, &source.metrics[position]))
                .ok_or_else(|| RenderError::UnknownMetric {
                    source_name: source.name.clone(),
                    metric: key.to_string(),
                })
        })
        .collect()
}

fn metric_column(
    points: &[Point],
    position: usize,
    metric: &MetricSpec,
) -> Result<AnyColumn, RenderError> {
    let mut column = AnyColumn::empty(metric.kind);
    for (index, point) in points.iter().enumerate() {
        let value = point.values.get(position).copied().ok_or_else(|| {
            RenderError::MalformedData(format!(
                "point at {} has no value for metric '{}'",
                point.timestamp, metric.key
            ))
        })?;
        column
            .push(value)
            .map_err(|found| ColumnBuildError::KindMismatch {
                index,
                expected: metric.kind,
                found,
            })?;
    }
    Ok(column)
}

fn trim_and_encode(x: AnyColumn, columns: Vec<AnyColumn>) -> Result<Bytes, RenderError> {
    let (x, columns) = trim(x, columns.into_iter().map(Some).collect());
    let mut all = Vec::with_capacity(columns.len() + 1);
    all.push(Some(x));
    all.extend(columns);
    Ok(Bytes::from(encode(None, all)?))
}
