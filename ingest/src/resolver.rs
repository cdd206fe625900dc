//! Map wall-clock timestamps to historical blocks.

use std::sync::Arc;

use error_stack::Result;
use tracing::{debug, instrument, warn};

use crate::{chain::ChainOracle, error::IngestError, types::BlockRef};

/// Finds the last block whose timestamp does not exceed a target timestamp.
#[derive(Clone)]
pub struct BlockResolver {
    oracle: Arc<dyn ChainOracle>,
}

impl BlockResolver {
    pub fn new(oracle: Arc<dyn ChainOracle>) -> Self {
        Self { oracle }
    }

    /// Returns the number of the closest block not after `target_timestamp`.
    pub async fn resolve(&self, target_timestamp: u64) -> Result<Option<u64>, IngestError> {
        let block = self.resolve_block(target_timestamp).await?;
        Ok(block.map(|block| block.number))
    }

    /// Binary search over `[0, latest]`.
    ///
    /// If a probed block is unavailable the search stops early and returns the best candidate
    /// found so far. The first block is returned only when it is after the target, that is when
    /// the target precedes the chain. A gap that leaves no candidate resolves to `None`.
    #[instrument(skip(self), err(Debug), level = "DEBUG")]
    pub async fn resolve_block(
        &self,
        target_timestamp: u64,
    ) -> Result<Option<BlockRef>, IngestError> {
        let latest = self.oracle.latest_block_number().await?;

        let mut best: Option<BlockRef> = None;
        let mut low = 0u64;
        let mut high = latest;
        let mut probes = 0usize;

        while low <= high {
            let mid = low + (high - low) / 2;
            probes += 1;

            let Some(timestamp) = self.oracle.block_timestamp(mid).await? else {
                warn!(
                    block = mid,
                    target_timestamp,
                    best = ?best.map(|b| b.number),
                    "block not available, using best candidate"
                );
                break;
            };

            if timestamp == target_timestamp {
                return Ok(Some(BlockRef {
                    number: mid,
                    timestamp,
                }));
            }

            if timestamp < target_timestamp {
                best = Some(BlockRef {
                    number: mid,
                    timestamp,
                });
                low = mid + 1;
            } else {
                if mid == 0 {
                    break;
                }
                high = mid - 1;
            }
        }

        let best = match best {
            Some(best) => best,
            None => match self.oracle.block_timestamp(0).await? {
                Some(timestamp) if timestamp > target_timestamp => BlockRef {
                    number: 0,
                    timestamp,
                },
                _ => {
                    warn!(target_timestamp, probes, "no block candidate for target");
                    return Ok(None);
                }
            },
        };

        debug!(target_timestamp, block = %best, probes, "resolved block");

        Ok(Some(best))
    }
}
