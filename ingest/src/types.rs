use std::fmt;

use serde::{Deserialize, Serialize};

/// Seconds in a (non leap) year, used to annualize per-second rates.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// A resolved block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub timestamp: u64,
}

/// One derived observation, ready to be written to the time-series sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub source_key: String,
    pub timestamp_seconds: u64,
    pub apy_percent: f64,
    pub weight: f64,
}

/// What a source's checkpoint measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CursorUnit {
    /// Unix timestamp, in seconds.
    Timestamp,
    /// Block number.
    Block,
}

/// The last confirmed progress marker of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub source_key: String,
    pub value: u64,
}

impl Checkpoint {
    pub fn new(source_key: impl Into<String>, value: u64) -> Self {
        Self {
            source_key: source_key.into(),
            value,
        }
    }
}

impl fmt::Display for CursorUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorUnit::Timestamp => f.write_str("timestamp"),
            CursorUnit::Block => f.write_str("block"),
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block(number={}, timestamp={})", self.number, self.timestamp)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checkpoint({}={})", self.source_key, self.value)
    }
}
