//! Protocol specific yield derivation rules.
//!
//! Every protocol implements [ProtocolAdapter]. The engine decides how to walk the pending
//! range based on [ProtocolAdapter::windowing] and calls [ProtocolAdapter::derive_sample] once
//! per window, threading the [ProtocolState] between calls.
mod compounding;
mod event;
mod multiplier;
mod passthrough;

use std::fmt;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use error_stack::Result;

use crate::{
    aggregator::SeriesPoint,
    chain::{word, ChainOracle, ContractCall, LogEntry, LogFilter},
    error::IngestError,
    types::{BlockRef, CursorUnit, Sample},
};

pub use self::compounding::{
    compounding_apy, compounding_apy_from_excess, CompoundingRateAdapter,
};
pub use self::event::{event_scaled_apy, EventScaledAdapter};
pub use self::multiplier::{multiplier_apy, MultiplierRatioAdapter};
pub use self::passthrough::{passthrough_apy, SeriesPassthroughAdapter};

/// Adapter-local carry-over between consecutive windows of one run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ProtocolState {
    #[default]
    Empty,
    /// Last valid cumulative multiplier.
    Multiplier(f64),
}

/// How the engine enumerates the windows of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Windowing {
    /// One window per whole interval since the checkpoint, at the block resolved for the
    /// interval's end timestamp. The checkpoint is a timestamp.
    Intervals,
    /// One window per matching log between the checkpoint block and the chain head. The
    /// checkpoint is a block number.
    Events {
        filter: LogFilter,
        max_block_range: u64,
    },
    /// One window per point of an external series newer than the checkpoint. The checkpoint
    /// is a timestamp.
    Series { address: Address },
}

/// The unit of work handed to [ProtocolAdapter::derive_sample].
#[derive(Debug, Clone, PartialEq)]
pub enum Window {
    Interval { target: u64, block: BlockRef },
    Event { block: BlockRef, log: LogEntry },
    Point(SeriesPoint),
}

/// The result of deriving one window.
#[derive(Debug, Clone, PartialEq)]
pub enum Derivation {
    /// A sample together with the state for the next window.
    Sample(Sample, ProtocolState),
    /// A valid reading that only seeds the state, such as the first multiplier of a run that
    /// could not be seeded.
    Baseline(ProtocolState),
    /// The reading was absent, zero or not parseable. The state must not change.
    Skipped(String),
}

/// What adapters can access while deriving a sample.
pub struct AdapterContext<'a> {
    pub source_key: &'a str,
    pub weight: f64,
    pub oracle: &'a dyn ChainOracle,
}

impl<'a> AdapterContext<'a> {
    pub fn sample(&self, timestamp_seconds: u64, apy_percent: f64) -> Sample {
        Sample {
            source_key: self.source_key.to_string(),
            timestamp_seconds,
            apy_percent,
            weight: self.weight,
        }
    }

    /// Reads the first word returned by `call` at `block_number`.
    ///
    /// Returns `None` when the call reverted or returned no data.
    pub async fn read_word(
        &self,
        call: &ContractCall,
        block_number: u64,
    ) -> Result<Option<U256>, IngestError> {
        let data = self.oracle.call(call, block_number).await?;
        Ok(data.and_then(|data| word(&data, 0)))
    }
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync + fmt::Debug {
    /// Short name of the derivation rule, used in logs.
    fn kind(&self) -> &'static str;

    /// Fixed cadence between samples.
    fn interval_seconds(&self) -> u64;

    fn cursor_unit(&self) -> CursorUnit {
        match self.windowing() {
            Windowing::Events { .. } => CursorUnit::Block,
            Windowing::Intervals | Windowing::Series { .. } => CursorUnit::Timestamp,
        }
    }

    fn windowing(&self) -> Windowing;

    /// Whether [ProtocolAdapter::seed] must be called before the first window.
    fn is_stateful(&self) -> bool {
        false
    }

    /// Seeds the state from the block preceding the first pending interval.
    async fn seed(
        &self,
        _ctx: &AdapterContext<'_>,
        _block: BlockRef,
    ) -> Result<ProtocolState, IngestError> {
        Ok(ProtocolState::Empty)
    }

    /// Derives the sample of one window.
    ///
    /// Errors abort the whole run. Unusable readings are reported as [Derivation::Skipped].
    async fn derive_sample(
        &self,
        ctx: &AdapterContext<'_>,
        state: &ProtocolState,
        window: &Window,
    ) -> Result<Derivation, IngestError>;
}

impl Derivation {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Derivation::Skipped(reason.into())
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Interval { target, block } => write!(f, "Interval(target={target}, {block})"),
            Window::Event { block, .. } => write!(f, "Event({block})"),
            Window::Point(point) => write!(f, "Point(timestamp={})", point.timestamp),
        }
    }
}
