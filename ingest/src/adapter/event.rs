use alloy_primitives::U256;
use async_trait::async_trait;
use error_stack::Result;

use crate::{
    chain::{scaled_to_f64, word, ContractCall, LogFilter},
    error::IngestError,
};

use super::{AdapterContext, Derivation, ProtocolAdapter, ProtocolState, Window, Windowing};

/// Annualizes an amount `a` distributed over a base `T`, `periods_per_year` times per year.
pub fn event_scaled_apy(amount: f64, total_base: f64, periods_per_year: u64) -> f64 {
    amount * periods_per_year as f64 * 100.0 / total_base
}

/// Derives one sample per emitted reward event.
#[derive(Debug, Clone)]
pub struct EventScaledAdapter {
    event: LogFilter,
    amount_word: usize,
    total_base: ContractCall,
    periods_per_year: u64,
    max_block_range: u64,
    interval_seconds: u64,
}

impl EventScaledAdapter {
    pub fn new(
        event: LogFilter,
        amount_word: usize,
        total_base: ContractCall,
        periods_per_year: u64,
        max_block_range: u64,
        interval_seconds: u64,
    ) -> Self {
        Self {
            event,
            amount_word,
            total_base,
            periods_per_year,
            max_block_range,
            interval_seconds,
        }
    }
}

fn non_zero(value: Option<U256>, what: &str) -> std::result::Result<f64, String> {
    match value {
        None => Err(format!("{what} not available")),
        Some(value) if value.is_zero() => Err(format!("{what} is zero")),
        Some(value) => Ok(scaled_to_f64(value, 0)),
    }
}

#[async_trait]
impl ProtocolAdapter for EventScaledAdapter {
    fn kind(&self) -> &'static str {
        "eventScaled"
    }

    /// Expected time between two events.
    fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }

    fn windowing(&self) -> Windowing {
        Windowing::Events {
            filter: self.event.clone(),
            max_block_range: self.max_block_range,
        }
    }

    async fn derive_sample(
        &self,
        ctx: &AdapterContext<'_>,
        state: &ProtocolState,
        window: &Window,
    ) -> Result<Derivation, IngestError> {
        let Window::Event { block, log } = window else {
            return Err(IngestError::fatal(&format!(
                "event scaled adapter cannot derive {window}"
            )));
        };

        let amount = match non_zero(word(&log.data, self.amount_word), "event amount") {
            Ok(amount) => amount,
            Err(reason) => return Ok(Derivation::Skipped(reason)),
        };

        let total_base = ctx.read_word(&self.total_base, block.number).await?;
        let total_base = match non_zero(total_base, "total base") {
            Ok(total_base) => total_base,
            Err(reason) => return Ok(Derivation::Skipped(reason)),
        };

        let apy = event_scaled_apy(amount, total_base, self.periods_per_year);
        if !apy.is_finite() {
            return Ok(Derivation::skipped("event does not scale to a finite value"));
        }

        Ok(Derivation::Sample(ctx.sample(block.timestamp, apy), *state))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::{Address, Bytes, Selector, B256, U256};
    use assert_matches::assert_matches;

    use super::{event_scaled_apy, EventScaledAdapter};
    use crate::{
        adapter::{
            testing::CallTable, AdapterContext, Derivation, ProtocolAdapter, ProtocolState, Window,
            Windowing,
        },
        chain::{ContractCall, LogEntry, LogFilter},
        types::{BlockRef, CursorUnit},
    };

    fn adapter() -> EventScaledAdapter {
        let address = Address::from_str("0x83f20f44975d03b1b09e64809b757c47f942beea").unwrap();
        EventScaledAdapter::new(
            LogFilter {
                address,
                topic: B256::repeat_byte(0xab),
            },
            0,
            ContractCall {
                address,
                selector: Selector::from([0x18, 0x16, 0x0d, 0xdd]),
            },
            3 * 365,
            10_000,
            28_800,
        )
    }

    fn event(number: u64, amount: u64) -> Window {
        Window::Event {
            block: BlockRef {
                number,
                timestamp: 1_700_000_000 + number,
            },
            log: LogEntry {
                block_number: number,
                data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
            },
        }
    }

    #[test]
    fn test_event_scaled_formula() {
        let apy = event_scaled_apy(500.0, 2_000_000.0, 1095);
        assert!((apy - 27.375).abs() < 1e-12, "apy = {apy}");
    }

    #[test]
    fn test_cursor_is_a_block_number() {
        let adapter = adapter();
        assert_eq!(adapter.cursor_unit(), CursorUnit::Block);
        assert_matches!(adapter.windowing(), Windowing::Events { max_block_range: 10_000, .. });
    }

    #[tokio::test]
    async fn test_derive_at_event_block() {
        let oracle = CallTable::default().with(42, Some(U256::from(2_000_000u64)));
        let ctx = AdapterContext {
            source_key: "sdai",
            weight: 0.2,
            oracle: &oracle,
        };

        let derivation = adapter()
            .derive_sample(&ctx, &ProtocolState::Empty, &event(42, 500))
            .await
            .unwrap();

        assert_matches!(derivation, Derivation::Sample(sample, _) => {
            assert_eq!(sample.timestamp_seconds, 1_700_000_042);
            assert!((sample.apy_percent - 27.375).abs() < 1e-12);
        });
    }

    #[tokio::test]
    async fn test_zero_amount_or_base_is_skipped() {
        let oracle = CallTable::default()
            .with(42, Some(U256::from(2_000_000u64)))
            .with(43, Some(U256::ZERO));
        let ctx = AdapterContext {
            source_key: "sdai",
            weight: 0.2,
            oracle: &oracle,
        };
        let adapter = adapter();

        let derivation = adapter
            .derive_sample(&ctx, &ProtocolState::Empty, &event(42, 0))
            .await
            .unwrap();
        assert_matches!(derivation, Derivation::Skipped(_));

        let derivation = adapter
            .derive_sample(&ctx, &ProtocolState::Empty, &event(43, 500))
            .await
            .unwrap();
        assert_matches!(derivation, Derivation::Skipped(_));

        // Block 44 has no value: the call reverted.
        let derivation = adapter
            .derive_sample(&ctx, &ProtocolState::Empty, &event(44, 500))
            .await
            .unwrap();
        assert_matches!(derivation, Derivation::Skipped(_));
    }
}
