//! JSON encoding of chart columns.
//!
//! The payload is a flat object mapping response keys to value arrays:
//! `{"x": [...], "y": [...], ...}`. Keys go `x, y, z, x1, y1, z1, x2, ...`
//! by default.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    column::{AnyColumn, ChartColumn},
    data_processing::align,
};

pub const DEFAULT_KEYS: [&str; 3] = ["x", "y", "z"];

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("encode called without columns")]
    EmptyInput,
    #[error("encode called with an empty key set")]
    EmptyKeys,
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Response key for the column at `position`.
///
/// Once `keys` are exhausted they are reused with the cycle number appended.
pub fn response_key(keys: &[&str], position: usize) -> String {
    let key = keys[position % keys.len()];
    let cycle = position / keys.len();
    if cycle == 0 {
        key.to_owned()
    } else {
        format!("{key}{cycle}")
    }
}

/// Align `columns` and serialize them under cycled response keys.
///
/// Absent columns keep their key and are encoded as `null`; their presence
/// empties every other column.
pub fn encode(
    keys: Option<&[&str]>,
    mut columns: Vec<Option<AnyColumn>>,
) -> Result<Vec<u8>, EncodeError> {
    let keys = keys.unwrap_or(&DEFAULT_KEYS);
    if columns.is_empty() {
        return Err(EncodeError::EmptyInput);
    }
    if keys.is_empty() {
        return Err(EncodeError::EmptyKeys);
    }
    align(&mut columns);

    let response: BTreeMap<String, Option<AnyColumn>> = columns
        .into_iter()
        .enumerate()
        .map(|(position, column)| (response_key(keys, position), column))
        .collect();
    Ok(serde_json::to_vec(&response)?)
}

/// Length of the arrays an encoded payload would contain.
pub fn encoded_len(columns: &[Option<AnyColumn>]) -> usize {
    columns
        .iter()
        .map(|c| c.as_ref().map_or(0, ChartColumn::len))
        .min()
        .unwrap_or(0)
}
