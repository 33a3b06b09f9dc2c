//! Preparing parallel columns for encoding.

use std::collections::HashMap;

use itertools::Itertools;

use crate::column::{
    AnyColumn, ChartColumn, ChartNullFloats, ChartNullUints, ChartUints, ColumnBuildError,
    MetricValue, NullValue,
};

/// Truncate all columns to the length of the shortest one.
///
/// An absent column counts as empty, so its presence truncates everything
/// to zero. Returns the common length.
pub fn align<C: ChartColumn>(columns: &mut [Option<C>]) -> usize {
    let min_len = columns
        .iter()
        .map(|c| c.as_ref().map_or(0, ChartColumn::len))
        .min()
        .unwrap_or(0);
    for column in columns.iter_mut().flatten() {
        column.truncate(min_len);
    }
    min_len
}

/// Remove every row where all `others` are zero.
///
/// Any row is eligible, not only trailing ones. `reference` (usually the
/// x axis) is not checked but loses the same rows. Absent columns count as
/// zero everywhere. If nothing would be left in `reference`, the input is
/// returned untouched.
pub fn trim<C>(reference: C, others: Vec<Option<C>>) -> (C, Vec<Option<C>>)
where
    C: ChartColumn + Clone,
{
    let original = (reference.clone(), others.clone());
    let (mut reference, mut others) = (reference, others);

    for i in (0..reference.len()).rev() {
        let all_zero = others
            .iter()
            .all(|c| c.as_ref().is_none_or(|c| c.is_zero_at(i)));
        if all_zero {
            reference.remove(i);
            for column in others.iter_mut().flatten() {
                column.remove(i);
            }
        }
    }

    if reference.is_empty() {
        return original;
    }
    (reference, others)
}

/// Put several `(timestamps, values)` series on a shared time axis.
///
/// The axis is the sorted union of all timestamps. Every series becomes a
/// nullable column over that axis, with nulls where the series has no
/// sample. Float series turn into [`ChartNullFloats`], integer series into
/// [`ChartNullUints`].
pub fn merge_on_time_axis(
    series: Vec<(ChartUints, AnyColumn)>,
) -> Result<(ChartUints, Vec<AnyColumn>), ColumnBuildError> {
    let axis: ChartUints = series
        .iter()
        .map(|(timestamps, _)| timestamps.values().iter().copied())
        .kmerge()
        .dedup()
        .collect();

    let merged = series
        .into_iter()
        .map(|(timestamps, values)| {
            if timestamps.len() != values.len() {
                tracing::warn!(
                    timestamps_len = timestamps.len(),
                    values_len = values.len(),
                    "merging series with mismatched lengths; extra samples are dropped"
                );
            }
            let by_time: HashMap<u64, MetricValue> = timestamps
                .values()
                .iter()
                .enumerate()
                .filter_map(|(i, t)| values.get(i).map(|v| (*t, v)))
                .collect();
            spread_over_axis(&axis, &values, &by_time)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((axis, merged))
}

fn spread_over_axis(
    axis: &ChartUints,
    values: &AnyColumn,
    by_time: &HashMap<u64, MetricValue>,
) -> Result<AnyColumn, ColumnBuildError> {
    let column = match values {
        AnyColumn::Floats(_) | AnyColumn::NullFloats(_) => {
            let column: ChartNullFloats = axis
                .values()
                .iter()
                .map(|t| match by_time.get(t) {
                    Some(MetricValue::Float(v)) => NullValue::valid(*v),
                    Some(MetricValue::NullFloat(v)) => *v,
                    _ => NullValue::null(),
                })
                .collect();
            column.into()
        }
        AnyColumn::Uints(_) | AnyColumn::NullUints(_) => {
            let column: ChartNullUints = axis
                .values()
                .iter()
                .map(|t| match by_time.get(t) {
                    Some(MetricValue::Uint(v)) => NullValue::valid(*v),
                    Some(MetricValue::NullUint(v)) => *v,
                    _ => NullValue::null(),
                })
                .collect();
            column.into()
        }
        AnyColumn::Strings(_) => return Err(ColumnBuildError::NotNumeric),
    };
    Ok(column)
}
