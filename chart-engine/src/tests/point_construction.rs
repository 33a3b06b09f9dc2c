use chrono::NaiveDateTime;

use crate::{column::MetricValue, rollup::RawRow};

/// Seconds since epoch of a `YYYY-MM-DDTHH:MM:SS` UTC time.
pub fn at(time: &str) -> u64 {
    let time: NaiveDateTime = time.parse().unwrap();
    time.and_utc().timestamp().try_into().unwrap()
}

/// `count` rows `step` seconds apart, starting at `start`.
///
/// `values(i)` produces the metric values of the `i`-th row.
pub fn rows_every(
    start: u64,
    count: usize,
    step: u64,
    values: impl Fn(usize) -> Vec<MetricValue>,
) -> Vec<RawRow> {
    (0..count)
        .map(|i| RawRow::new(start + i as u64 * step, values(i)))
        .collect()
}
