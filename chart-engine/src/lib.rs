pub mod binning;
pub mod cache;
pub mod column;
pub mod data_processing;
pub mod encode;
pub mod logging;
pub mod metrics;
pub mod render;
pub mod resolution;
pub mod rollup;
pub mod settings;
pub mod update_service;

#[cfg(any(feature = "test-utils", test))]
pub mod tests;

pub use cache::ChartCache;
pub use column::{
    AnyColumn, ChartColumn, ChartFloats, ChartNullFloats, ChartNullUints, ChartStrings,
    ChartUints, MetricKind, MetricValue, NullValue,
};
pub use encode::{EncodeError, encode};
pub use render::{Axis, ChartRenderer, RenderError};
pub use resolution::Resolution;
pub use rollup::{
    Bucket, ChartStore, MetricSpec, RawRow, RollupError, RollupReport, RollupSource,
    RollupUpdater,
};
pub use settings::Settings;
pub use update_service::UpdateService;
