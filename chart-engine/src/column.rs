//! Typed chart columns.
//!
//! Every metric of a chart is kept as a column: an ordered sequence of values
//! of a single type. Plain numeric columns ([`ChartFloats`], [`ChartUints`]),
//! null-aware numeric columns ([`ChartNullFloats`], [`ChartNullUints`]) and
//! [`ChartStrings`] share the [`ChartColumn`] capability set used by the
//! alignment and trimming stages. Numeric columns can additionally average
//! index segments ([`SegmentAverage`]), which is how buckets get their values.
//!
//! ## Null-aware averaging
//!
//! The average of a nullable segment is marked valid if *any* element of the
//! segment is valid. Invalid elements still add their stored value (usually
//! zero) to the sum and still count toward the divisor, so a mostly-null
//! segment with a single valid sample yields a valid but diluted value.
//! Dashboards built on top of these charts rely on this, so it is kept as is.

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Capabilities shared by all column variants.
pub trait ChartColumn {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the prefix `[0, len)`.
    fn truncate(&mut self, len: usize);

    /// Remove the element at `index`. Out-of-range index leaves the column untouched.
    fn remove(&mut self, index: usize);

    /// Whether the element at `index` counts as "zero" for trimming.
    ///
    /// Out-of-range behaviour differs per variant: plain numeric columns
    /// report `true`, nullable and string columns report `false`.
    fn is_zero_at(&self, index: usize) -> bool;
}

/// Average over the half-open index range `[start, end)`.
pub trait SegmentAverage {
    type Output;

    /// Returns the variant's "no data" value if `start` or `end` is not
    /// strictly inside the column, or if `end <= start`.
    fn segment_average(&self, start: usize, end: usize) -> Self::Output;
}

fn segment_in_bounds(start: usize, end: usize, len: usize) -> bool {
    start < len && end < len && start < end
}

/// Number types that can be stored in numeric columns.
pub trait ChartNumber: Copy + Default + PartialEq + std::fmt::Debug + Serialize {
    /// Arithmetic mean of `values`, dividing by `count`.
    fn mean(values: impl Iterator<Item = Self>, count: usize) -> Self;

    fn is_zero(&self) -> bool;
}

impl ChartNumber for f64 {
    fn mean(values: impl Iterator<Item = Self>, count: usize) -> Self {
        values.sum::<f64>() / count as f64
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl ChartNumber for u64 {
    fn mean(values: impl Iterator<Item = Self>, count: usize) -> Self {
        // summing in u128 cannot overflow for any realistic segment,
        // and the quotient always fits back into u64
        let sum: u128 = values.map(u128::from).sum();
        (sum / count as u128) as u64
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

/// Column of plain numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NumericColumn<T>(pub Vec<T>);

pub type ChartFloats = NumericColumn<f64>;
pub type ChartUints = NumericColumn<u64>;

impl<T> NumericColumn<T> {
    pub fn new(values: Vec<T>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[T] {
        &self.0
    }

    pub fn push(&mut self, value: T) {
        self.0.push(value)
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> From<Vec<T>> for NumericColumn<T> {
    fn from(values: Vec<T>) -> Self {
        Self(values)
    }
}

impl<T> FromIterator<T> for NumericColumn<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: ChartNumber> ChartColumn for NumericColumn<T> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn truncate(&mut self, len: usize) {
        self.0.truncate(len)
    }

    fn remove(&mut self, index: usize) {
        if index < self.0.len() {
            self.0.remove(index);
        }
    }

    fn is_zero_at(&self, index: usize) -> bool {
        self.0.get(index).is_none_or(ChartNumber::is_zero)
    }
}

impl<T: ChartNumber> SegmentAverage for NumericColumn<T> {
    type Output = T;

    fn segment_average(&self, start: usize, end: usize) -> T {
        if !segment_in_bounds(start, end, self.0.len()) {
            return T::default();
        }
        T::mean(self.0[start..end].iter().copied(), end - start)
    }
}

/// A number together with its validity flag.
///
/// Invalid values keep their stored number (zero for absent samples) and
/// are serialized as `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NullValue<T> {
    pub value: T,
    pub valid: bool,
}

impl<T: Default> NullValue<T> {
    pub fn valid(value: T) -> Self {
        Self { value, valid: true }
    }

    /// Absent sample: zero value, not valid.
    pub fn null() -> Self {
        Self {
            value: T::default(),
            valid: false,
        }
    }

    pub fn as_option(&self) -> Option<&T> {
        self.valid.then_some(&self.value)
    }
}

impl<T: Default> From<Option<T>> for NullValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::valid(value),
            None => Self::null(),
        }
    }
}

impl<T: Serialize> Serialize for NullValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.valid {
            self.value.serialize(serializer)
        } else {
            serializer.serialize_none()
        }
    }
}

/// Column of numbers that may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NullableColumn<T>(pub Vec<NullValue<T>>);

pub type ChartNullFloats = NullableColumn<f64>;
pub type ChartNullUints = NullableColumn<u64>;

impl<T: ChartNumber> NullableColumn<T> {
    pub fn new(values: Vec<NullValue<T>>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[NullValue<T>] {
        &self.0
    }

    pub fn push(&mut self, value: NullValue<T>) {
        self.0.push(value)
    }

    /// Whether the element at `index` exists and is valid.
    pub fn is_valid_at(&self, index: usize) -> bool {
        self.0.get(index).is_some_and(|v| v.valid)
    }
}

impl<T: ChartNumber> From<Vec<Option<T>>> for NullableColumn<T> {
    fn from(values: Vec<Option<T>>) -> Self {
        Self(values.into_iter().map(NullValue::from).collect())
    }
}

impl<T> FromIterator<NullValue<T>> for NullableColumn<T> {
    fn from_iter<I: IntoIterator<Item = NullValue<T>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: ChartNumber> ChartColumn for NullableColumn<T> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn truncate(&mut self, len: usize) {
        self.0.truncate(len)
    }

    fn remove(&mut self, index: usize) {
        if index < self.0.len() {
            self.0.remove(index);
        }
    }

    fn is_zero_at(&self, index: usize) -> bool {
        // validity is ignored on purpose: an invalid sample stores zero
        self.0.get(index).is_some_and(|v| v.value.is_zero())
    }
}

impl<T: ChartNumber> SegmentAverage for NullableColumn<T> {
    type Output = NullValue<T>;

    fn segment_average(&self, start: usize, end: usize) -> NullValue<T> {
        if !segment_in_bounds(start, end, self.0.len()) {
            return NullValue::null();
        }
        let segment = &self.0[start..end];
        NullValue {
            value: T::mean(segment.iter().map(|v| v.value), end - start),
            valid: segment.iter().any(|v| v.valid),
        }
    }
}

impl ChartNullUints {
    /// Decimal rendering with `"NaN"` for missing samples.
    pub fn to_chart_strings(&self) -> ChartStrings {
        self.0
            .iter()
            .map(|v| match v.as_option() {
                Some(value) => value.to_string(),
                None => "NaN".to_owned(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChartStrings(pub Vec<String>);

impl FromIterator<String> for ChartStrings {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl ChartColumn for ChartStrings {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn truncate(&mut self, len: usize) {
        self.0.truncate(len)
    }

    fn remove(&mut self, index: usize) {
        if index < self.0.len() {
            self.0.remove(index);
        }
    }

    fn is_zero_at(&self, index: usize) -> bool {
        self.0.get(index).is_some_and(String::is_empty)
    }
}

/// Kind of values a metric produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Float,
    Uint,
    NullFloat,
    NullUint,
}

/// Single value of a metric: a raw sample or an aggregated bucket value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Float(f64),
    Uint(u64),
    NullFloat(NullValue<f64>),
    NullUint(NullValue<u64>),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Float(_) => MetricKind::Float,
            MetricValue::Uint(_) => MetricKind::Uint,
            MetricValue::NullFloat(_) => MetricKind::NullFloat,
            MetricValue::NullUint(_) => MetricKind::NullUint,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ColumnBuildError {
    #[error("value #{index} has kind {found:?}, expected {expected:?}")]
    KindMismatch {
        index: usize,
        expected: MetricKind,
        found: MetricKind,
    },
    #[error("string columns hold no numeric values")]
    NotNumeric,
}

/// Column of any supported type.
///
/// Serialized as a plain JSON array of its values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnyColumn {
    Floats(ChartFloats),
    Uints(ChartUints),
    NullFloats(ChartNullFloats),
    NullUints(ChartNullUints),
    Strings(ChartStrings),
}

macro_rules! dispatch {
    ($self:expr, $col:ident => $body:expr) => {
        match $self {
            AnyColumn::Floats($col) => $body,
            AnyColumn::Uints($col) => $body,
            AnyColumn::NullFloats($col) => $body,
            AnyColumn::NullUints($col) => $body,
            AnyColumn::Strings($col) => $body,
        }
    };
}

impl ChartColumn for AnyColumn {
    fn len(&self) -> usize {
        dispatch!(self, c => c.len())
    }

    fn truncate(&mut self, len: usize) {
        dispatch!(self, c => c.truncate(len))
    }

    fn remove(&mut self, index: usize) {
        dispatch!(self, c => c.remove(index))
    }

    fn is_zero_at(&self, index: usize) -> bool {
        dispatch!(self, c => c.is_zero_at(index))
    }
}

impl AnyColumn {
    /// `None` for string columns, which have no numeric kind.
    pub fn kind(&self) -> Option<MetricKind> {
        match self {
            AnyColumn::Floats(_) => Some(MetricKind::Float),
            AnyColumn::Uints(_) => Some(MetricKind::Uint),
            AnyColumn::NullFloats(_) => Some(MetricKind::NullFloat),
            AnyColumn::NullUints(_) => Some(MetricKind::NullUint),
            AnyColumn::Strings(_) => None,
        }
    }

    /// Empty column able to hold values of `kind`.
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Float => AnyColumn::Floats(Default::default()),
            MetricKind::Uint => AnyColumn::Uints(Default::default()),
            MetricKind::NullFloat => AnyColumn::NullFloats(Default::default()),
            MetricKind::NullUint => AnyColumn::NullUints(Default::default()),
        }
    }

    /// Collect values of a single kind into a column.
    pub fn from_values<I>(kind: MetricKind, values: I) -> Result<Self, ColumnBuildError>
    where
        I: IntoIterator<Item = MetricValue>,
    {
        let mut column = Self::empty(kind);
        for (index, value) in values.into_iter().enumerate() {
            column.push(value).map_err(|found| ColumnBuildError::KindMismatch {
                index,
                expected: kind,
                found,
            })?;
        }
        Ok(column)
    }

    /// Append a value; returns the value's kind if it does not fit the column.
    pub fn push(&mut self, value: MetricValue) -> Result<(), MetricKind> {
        match (self, value) {
            (AnyColumn::Floats(c), MetricValue::Float(v)) => c.push(v),
            (AnyColumn::Uints(c), MetricValue::Uint(v)) => c.push(v),
            (AnyColumn::NullFloats(c), MetricValue::NullFloat(v)) => c.push(v),
            (AnyColumn::NullUints(c), MetricValue::NullUint(v)) => c.push(v),
            (_, value) => return Err(value.kind()),
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<MetricValue> {
        match self {
            AnyColumn::Floats(c) => c.0.get(index).copied().map(MetricValue::Float),
            AnyColumn::Uints(c) => c.0.get(index).copied().map(MetricValue::Uint),
            AnyColumn::NullFloats(c) => c.0.get(index).copied().map(MetricValue::NullFloat),
            AnyColumn::NullUints(c) => c.0.get(index).copied().map(MetricValue::NullUint),
            AnyColumn::Strings(_) => None,
        }
    }

    /// Segment average for numeric columns, `None` for strings.
    pub fn segment_average(&self, start: usize, end: usize) -> Option<MetricValue> {
        let value = match self {
            AnyColumn::Floats(c) => MetricValue::Float(c.segment_average(start, end)),
            AnyColumn::Uints(c) => MetricValue::Uint(c.segment_average(start, end)),
            AnyColumn::NullFloats(c) => MetricValue::NullFloat(c.segment_average(start, end)),
            AnyColumn::NullUints(c) => MetricValue::NullUint(c.segment_average(start, end)),
            AnyColumn::Strings(_) => return None,
        };
        Some(value)
    }
}

impl From<ChartFloats> for AnyColumn {
    fn from(value: ChartFloats) -> Self {
        AnyColumn::Floats(value)
    }
}

impl From<ChartUints> for AnyColumn {
    fn from(value: ChartUints) -> Self {
        AnyColumn::Uints(value)
    }
}

impl From<ChartNullFloats> for AnyColumn {
    fn from(value: ChartNullFloats) -> Self {
        AnyColumn::NullFloats(value)
    }
}

impl From<ChartNullUints> for AnyColumn {
    fn from(value: ChartNullUints) -> Self {
        AnyColumn::NullUints(value)
    }
}

impl From<ChartStrings> for AnyColumn {
    fn from(value: ChartStrings) -> Self {
        AnyColumn::Strings(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn floats(values: &[f64]) -> ChartFloats {
        values.to_vec().into()
    }

    fn null_uints(values: &[Option<u64>]) -> ChartNullUints {
        values.to_vec().into()
    }

    #[rstest]
    #[case(&[1.0, 2.0, 3.0, 4.0], 0, 3, 2.0)]
    #[case(&[1.0, 2.0, 3.0, 4.0], 1, 2, 2.0)]
    #[case(&[10.0, 0.0, 5.0, 1.0, 9.0], 1, 4, 2.0)]
    fn float_segment_average_is_mean(
        #[case] values: &[f64],
        #[case] start: usize,
        #[case] end: usize,
        #[case] expected: f64,
    ) {
        assert_eq!(floats(values).segment_average(start, end), expected);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(2, 1)]
    #[case(4, 5)]
    #[case(0, 4)]
    #[case(1, 100)]
    fn segment_average_out_of_bounds_is_no_data(#[case] start: usize, #[case] end: usize) {
        let f = floats(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(f.segment_average(start, end), 0.0);
        let u = ChartUints::from(vec![1, 2, 3, 4]);
        assert_eq!(u.segment_average(start, end), 0);
        let n = null_uints(&[Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(n.segment_average(start, end), NullValue::null());
        assert!(!n.segment_average(start, end).valid);
    }

    #[test]
    fn uint_segment_average_truncates() {
        let u = ChartUints::from(vec![1, 2, 2, 100]);
        assert_eq!(u.segment_average(0, 3), 1);
        let big = ChartUints::from(vec![u64::MAX, u64::MAX, 0]);
        assert_eq!(big.segment_average(0, 2), u64::MAX);
    }

    #[test]
    fn nullable_average_is_valid_if_any_valid_and_diluted() {
        let n = null_uints(&[None, None, Some(9), None, Some(1)]);
        let avg = n.segment_average(0, 4);
        assert_eq!(avg, NullValue { value: 2, valid: true });

        let all_null = null_uints(&[None, None, None, Some(1)]);
        assert_eq!(
            all_null.segment_average(0, 3),
            NullValue { value: 0, valid: false }
        );

        let invalid_but_stored = ChartNullFloats::new(vec![
            NullValue { value: 4.0, valid: false },
            NullValue { value: 2.0, valid: false },
            NullValue::valid(1.0),
        ]);
        assert_eq!(
            invalid_but_stored.segment_average(0, 2),
            NullValue { value: 3.0, valid: false }
        );
    }

    #[test]
    fn is_zero_out_of_range_differs_per_variant() {
        assert!(floats(&[1.0]).is_zero_at(5));
        assert!(ChartUints::from(vec![1]).is_zero_at(5));
        assert!(!null_uints(&[Some(1)]).is_zero_at(5));
        assert!(!ChartNullFloats::from(vec![Some(1.0)]).is_zero_at(5));
        assert!(!ChartStrings(vec!["a".into()]).is_zero_at(5));
    }

    #[test]
    fn is_zero_in_range() {
        assert!(floats(&[0.0, 1.0]).is_zero_at(0));
        assert!(!floats(&[0.0, 1.0]).is_zero_at(1));
        // invalid values are zero regardless of the validity flag
        assert!(null_uints(&[None]).is_zero_at(0));
        assert!(null_uints(&[Some(0)]).is_zero_at(0));
        assert!(!null_uints(&[Some(3)]).is_zero_at(0));
        assert!(ChartStrings(vec![String::new()]).is_zero_at(0));
        assert!(!ChartStrings(vec!["x".into()]).is_zero_at(0));
    }

    #[test]
    fn remove_out_of_range_is_noop() {
        let mut f = floats(&[1.0, 2.0]);
        f.remove(2);
        assert_eq!(f, floats(&[1.0, 2.0]));
        f.remove(0);
        assert_eq!(f, floats(&[2.0]));

        let mut s = ChartStrings(vec!["a".into()]);
        s.remove(7);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn nullable_serializes_invalid_as_null() {
        let n = null_uints(&[Some(1), None, Some(3)]);
        assert_eq!(serde_json::to_string(&n).unwrap(), "[1,null,3]");
        let any = AnyColumn::from(ChartNullFloats::from(vec![None, Some(0.5)]));
        assert_eq!(serde_json::to_string(&any).unwrap(), "[null,0.5]");
    }

    #[test]
    fn null_uints_to_chart_strings() {
        let n = null_uints(&[Some(12), None]);
        assert_eq!(
            n.to_chart_strings(),
            ChartStrings(vec!["12".to_owned(), "NaN".to_owned()])
        );
    }

    #[test]
    fn any_column_from_values_checks_kind() {
        let column = AnyColumn::from_values(
            MetricKind::Uint,
            [MetricValue::Uint(1), MetricValue::Uint(2)],
        )
        .unwrap();
        assert_eq!(column, AnyColumn::Uints(vec![1, 2].into()));

        let err = AnyColumn::from_values(
            MetricKind::Uint,
            [MetricValue::Uint(1), MetricValue::Float(2.0)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ColumnBuildError::KindMismatch {
                index: 1,
                expected: MetricKind::Uint,
                found: MetricKind::Float,
            }
        );
    }

    #[test]
    fn any_column_segment_average() {
        let column = AnyColumn::from(null_uints(&[Some(2), Some(4), None]));
        assert_eq!(
            column.segment_average(0, 2),
            Some(MetricValue::NullUint(NullValue::valid(3)))
        );
        assert_eq!(AnyColumn::from(ChartStrings::default()).segment_average(0, 1), None);
    }
}
