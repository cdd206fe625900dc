//! Access to historical chain state.
mod abi;
mod json_rpc;

use std::fmt;

use alloy_primitives::{Address, Bytes, Selector, B256};
use async_trait::async_trait;
use error_stack::Result;

use crate::error::IngestError;

pub use self::abi::{parse_selector, parse_topic, scaled_to_f64, signed_excess, word};
pub use self::json_rpc::{JsonRpcOracle, JsonRpcOracleOptions};

/// A zero-argument, read-only contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub address: Address,
    pub selector: Selector,
}

/// Logs emitted by `address` whose first topic is `topic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic: B256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub block_number: u64,
    pub data: Bytes,
}

/// Monotone view of the chain history.
///
/// `Ok(None)` means the requested value is absent (missing block, reverted call) and is
/// recovered from by the caller. `Err` means the oracle could not be reached.
#[async_trait]
pub trait ChainOracle: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, IngestError>;

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>, IngestError>;

    async fn call(
        &self,
        call: &ContractCall,
        block_number: u64,
    ) -> Result<Option<Bytes>, IngestError>;

    /// Returns the matching logs in `[from_block, to_block]`, ordered by block.
    async fn logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, IngestError>;
}

impl fmt::Display for ContractCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.address, self.selector)
    }
}
