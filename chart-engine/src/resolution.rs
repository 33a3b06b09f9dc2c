use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

pub const HOUR: u64 = 3600;
pub const DAY: u64 = 86400;

/// Granularity of chart data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Raw, non-aggregated samples
    Default,
    Hour,
    Day,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown resolution '{0}', expected one of: default, hour, day")]
pub struct ResolutionParseError(pub String);

impl Resolution {
    /// Resolutions that are produced by rolling up raw samples.
    pub const AGGREGATED: [Resolution; 2] = [Resolution::Hour, Resolution::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Default => "default",
            Resolution::Hour => "hour",
            Resolution::Day => "day",
        }
    }

    /// Bucket width in seconds. `None` for raw data.
    pub fn width(&self) -> Option<u64> {
        match self {
            Resolution::Default => None,
            Resolution::Hour => Some(HOUR),
            Resolution::Day => Some(DAY),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ResolutionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Resolution::Default),
            "hour" => Ok(Resolution::Hour),
            "day" => Ok(Resolution::Day),
            other => Err(ResolutionParseError(other.to_owned())),
        }
    }
}

/// Start of the `width`-aligned window containing `timestamp`.
pub fn align_down(timestamp: u64, width: u64) -> u64 {
    timestamp - timestamp % width
}
