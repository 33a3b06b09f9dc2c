//! Splitting of ascending timestamps into hour/day buckets.

use std::ops::Range;

use crate::{
    column::{ChartColumn, ChartUints},
    resolution::{Resolution, align_down},
};

/// Result of binning a timestamp column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binned {
    /// Start timestamp of every closed bucket
    pub buckets: ChartUints,
    /// Companion value for every bucket, if a companion column was supplied.
    ///
    /// It is the companion sample at the index where the bucket was closed
    /// (the first index of the *next* bucket), not an aggregate.
    pub companion: Option<ChartUints>,
    /// Index range into the input for every bucket
    pub intervals: Vec<Range<usize>>,
}

impl Binned {
    fn empty(with_companion: bool) -> Self {
        Self {
            buckets: ChartUints::default(),
            companion: with_companion.then(ChartUints::default),
            intervals: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// First index of the last closed bucket, 0 if there is none.
    ///
    /// Elements starting from it are the last closed bucket followed by the
    /// trailing, still open one.
    pub fn last_closed_start(&self) -> usize {
        self.intervals.last().map(|r| r.start).unwrap_or(0)
    }
}

pub fn hour_bins(timestamps: &ChartUints, companion: Option<&ChartUints>) -> Binned {
    bin_timestamps(timestamps, companion, Resolution::Hour)
}

pub fn day_bins(timestamps: &ChartUints, companion: Option<&ChartUints>) -> Binned {
    bin_timestamps(timestamps, companion, Resolution::Day)
}

/// Group ascending `timestamps` into buckets aligned to the `resolution` width.
///
/// Raw [`Resolution::Default`] data has no buckets and gives empty output.
/// Only buckets followed by a later sample are emitted: the final partial
/// bucket is left out. Nothing is emitted unless the data reaches at least
/// two full widths past the first bucket start.
///
/// A `companion` of different length is a caller bug; it is logged and
/// results in empty output.
pub fn bin_timestamps(
    timestamps: &ChartUints,
    companion: Option<&ChartUints>,
    resolution: Resolution,
) -> Binned {
    let mut result = Binned::empty(companion.is_some());
    let Some(width) = resolution.width() else {
        return result;
    };
    if let Some(companion) = companion {
        if companion.len() != timestamps.len() {
            tracing::error!(
                timestamps_len = timestamps.len(),
                companion_len = companion.len(),
                "binning: length mismatch between timestamps and companion"
            );
            return result;
        }
    }
    let values = timestamps.values();
    let (Some(first), Some(last)) = (values.first(), values.last()) else {
        return result;
    };

    let mut start = align_down(*first, width);
    let end = align_down(*last, width);
    if end <= start + width {
        return result;
    }

    let mut next = start + width;
    let mut start_idx = 0;
    for (i, &t) in values.iter().enumerate() {
        if t < next {
            continue;
        }
        result.intervals.push(start_idx..i);
        result.buckets.push(start);
        if let (Some(out), Some(companion)) = (result.companion.as_mut(), companion) {
            out.push(companion.values()[i]);
        }
        start = align_down(t, width);
        next = start + width;
        start_idx = i;
        if t > end {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::{DAY, HOUR};
    use pretty_assertions::assert_eq;

    fn uints(v: &[u64]) -> ChartUints {
        v.to_vec().into()
    }

    #[test]
    fn short_span_gives_no_buckets() {
        let binned = hour_bins(&uints(&[100, 200, 300]), None);
        assert_eq!(binned, Binned::default());

        // exactly one extra hour past the first bucket is still not enough
        let binned = hour_bins(&uints(&[0, 1800, 3600, 7199]), None);
        assert!(binned.is_empty());
    }

    #[test]
    fn empty_input_gives_no_buckets() {
        assert!(hour_bins(&uints(&[]), None).is_empty());
        assert!(day_bins(&uints(&[]), Some(&uints(&[]))).is_empty());
    }

    #[test]
    fn hour_bins_with_companion() {
        let timestamps = uints(&[10, 20, 3700, 3800, 7300, 11000]);
        let heights = uints(&[1, 2, 3, 4, 5, 6]);
        let binned = hour_bins(&timestamps, Some(&heights));
        // 11000 closes the 7200 bucket, the 10800 bucket stays open
        assert_eq!(binned.buckets, uints(&[0, 3600, 7200]));
        assert_eq!(binned.intervals, vec![0..2, 2..4, 4..5]);
        // companion is sampled at the boundary-crossing index
        assert_eq!(binned.companion, Some(uints(&[3, 5, 6])));
        assert_eq!(binned.last_closed_start(), 4);
    }

    #[test]
    fn gaps_do_not_create_empty_buckets() {
        let timestamps = uints(&[0, 100, 5 * HOUR + 1, 5 * HOUR + 2, 9 * HOUR]);
        let binned = hour_bins(&timestamps, None);
        assert_eq!(binned.buckets, uints(&[0, 5 * HOUR]));
        assert_eq!(binned.intervals, vec![0..2, 2..4]);
    }

    #[test]
    fn day_bins_are_aligned_and_contiguous() {
        let mut timestamps = vec![];
        let mut t = DAY / 2;
        while t < 10 * DAY {
            timestamps.push(t);
            t += 3 * HOUR + 17;
        }
        let timestamps = uints(&timestamps);
        let binned = day_bins(&timestamps, None);
        assert_eq!(binned.len(), 9);
        let mut expected_start = 0;
        for (bucket, interval) in binned.buckets.values().iter().zip(&binned.intervals) {
            assert_eq!(bucket % DAY, 0);
            assert_eq!(interval.start, expected_start);
            assert!(interval.start < interval.end);
            expected_start = interval.end;
        }
    }

    #[test]
    fn default_resolution_gives_no_buckets() {
        let timestamps = uints(&[0, 4000, 8000, 12000]);
        let binned = bin_timestamps(&timestamps, Some(&timestamps), Resolution::Default);
        assert!(binned.is_empty());
        assert_eq!(binned.companion, Some(ChartUints::default()));
        assert_eq!(
            bin_timestamps(&timestamps, None, Resolution::Hour),
            hour_bins(&timestamps, None)
        );
    }

    #[test]
    fn mismatched_companion_gives_empty_output() {
        let binned = hour_bins(&uints(&[0, 4000, 8000]), Some(&uints(&[1])));
        assert!(binned.is_empty());
        assert!(binned.intervals.is_empty());
        assert_eq!(binned.companion, Some(ChartUints::default()));
    }
}
