use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Persisted form of [`Ttl::Never`].
pub const NO_EXPIRY: i64 = -1;

/// How long points of a series are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    #[default]
    Never,
    Seconds(u64),
}

impl Ttl {
    /// Zero or negative values mean "no expiry", as in the configuration file.
    pub fn from_seconds(seconds: i64) -> Self {
        if seconds <= 0 {
            Ttl::Never
        } else {
            Ttl::Seconds(seconds as u64)
        }
    }

    pub fn to_sql(self) -> i64 {
        match self {
            Ttl::Never => NO_EXPIRY,
            Ttl::Seconds(s) => s as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub ts: i64,
    pub value: f64,
}

/// One entry of a windowed aggregation; `ts` is the bucket start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub ts: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl Reduction {
    pub fn as_str(self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Avg => "avg",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::Count => "count",
        }
    }

    /// `TOTAL` rather than `SUM` so an empty range reduces to 0.
    pub(crate) fn sql_expr(self) -> &'static str {
        match self {
            Reduction::Sum => "TOTAL(value)",
            Reduction::Avg => "AVG(value)",
            Reduction::Min => "MIN(value)",
            Reduction::Max => "MAX(value)",
            Reduction::Count => "COUNT(*)",
        }
    }
}

impl FromStr for Reduction {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sum" => Ok(Reduction::Sum),
            "avg" => Ok(Reduction::Avg),
            "min" => Ok(Reduction::Min),
            "max" => Ok(Reduction::Max),
            "count" => Ok(Reduction::Count),
            other => Err(StoreError::UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(
        "Invalid series name `{0}`. Series names must start with a letter or underscore and can only contain letters, underscores, and digits."
    )]
    InvalidName(String),

    #[error("Series `{0}` has no data in the requested range")]
    NotFound(String),

    #[error("Unknown aggregation operation `{0}`")]
    UnknownOperation(String),

    #[error("Invalid aggregation window: interval {interval}s over {count} buckets")]
    InvalidWindow { interval: i64, count: i64 },

    #[error("Cannot create data directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}
