use lazy_static::lazy_static;
use prometheus::{HistogramVec, IntCounterVec, register_histogram_vec, register_int_counter_vec};

lazy_static! {
    pub static ref ROLLUP_ERRORS: IntCounterVec = register_int_counter_vec!(
        "chart_engine_rollup_errors_total",
        "total failed rollup passes",
        &["source", "resolution"],
    )
    .unwrap();
    pub static ref ROLLUP_TIME: HistogramVec = register_histogram_vec!(
        "chart_engine_rollup_time_seconds",
        "single rollup pass time",
        &["source", "resolution"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 30.0, 60.0, 120.0, 240.0],
    )
    .unwrap();
    pub static ref BUCKETS_COMMITTED: IntCounterVec = register_int_counter_vec!(
        "chart_engine_buckets_committed_total",
        "total buckets committed to the store",
        &["source", "resolution"],
    )
    .unwrap();
    pub static ref CHART_CACHE_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "chart_engine_chart_cache_requests_total",
        "chart cache lookups by outcome",
        &["outcome"],
    )
    .unwrap();
}
