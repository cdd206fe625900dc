use alloy_primitives::U256;
use async_trait::async_trait;
use error_stack::Result;
use tracing::debug;

use crate::{
    chain::{scaled_to_f64, ContractCall},
    error::IngestError,
    types::BlockRef,
};

use super::{AdapterContext, Derivation, ProtocolAdapter, ProtocolState, Window, Windowing};

/// Growth of a cumulative multiplier between two readings, in percent.
pub fn multiplier_apy(previous: f64, current: f64) -> f64 {
    (current / previous - 1.0) * 100.0
}

/// Compares a cumulative multiplier (exchange rate, share price) with its previous valid
/// reading.
#[derive(Debug, Clone)]
pub struct MultiplierRatioAdapter {
    multiplier: ContractCall,
    decimals: u8,
    interval_seconds: u64,
}

impl MultiplierRatioAdapter {
    pub fn new(multiplier: ContractCall, decimals: u8, interval_seconds: u64) -> Self {
        Self {
            multiplier,
            decimals,
            interval_seconds,
        }
    }

    async fn read_multiplier(
        &self,
        ctx: &AdapterContext<'_>,
        block_number: u64,
    ) -> Result<std::result::Result<f64, String>, IngestError> {
        let raw = ctx.read_word(&self.multiplier, block_number).await?;
        Ok(self.parse_multiplier(raw))
    }

    fn parse_multiplier(&self, raw: Option<U256>) -> std::result::Result<f64, String> {
        match raw {
            None => Err("multiplier not available".to_string()),
            Some(raw) if raw.is_zero() => Err("multiplier is zero".to_string()),
            Some(raw) => {
                let value = scaled_to_f64(raw, self.decimals);
                if value.is_finite() && value > 0.0 {
                    Ok(value)
                } else {
                    Err(format!("multiplier {raw} is not usable"))
                }
            }
        }
    }
}

#[async_trait]
impl ProtocolAdapter for MultiplierRatioAdapter {
    fn kind(&self) -> &'static str {
        "multiplierRatio"
    }

    fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }

    fn windowing(&self) -> Windowing {
        Windowing::Intervals
    }

    fn is_stateful(&self) -> bool {
        true
    }

    async fn seed(
        &self,
        ctx: &AdapterContext<'_>,
        block: BlockRef,
    ) -> Result<ProtocolState, IngestError> {
        match self.read_multiplier(ctx, block.number).await? {
            Ok(value) => Ok(ProtocolState::Multiplier(value)),
            Err(reason) => {
                debug!(source = ctx.source_key, %block, reason = %reason, "multiplier seed not available");
                Ok(ProtocolState::Empty)
            }
        }
    }

    async fn derive_sample(
        &self,
        ctx: &AdapterContext<'_>,
        state: &ProtocolState,
        window: &Window,
    ) -> Result<Derivation, IngestError> {
        let Window::Interval { target, block } = window else {
            return Err(IngestError::fatal(&format!(
                "multiplier ratio adapter cannot derive {window}"
            )));
        };

        let current = match self.read_multiplier(ctx, block.number).await? {
            Ok(current) => current,
            Err(reason) => return Ok(Derivation::Skipped(reason)),
        };

        let next = ProtocolState::Multiplier(current);
        match state {
            ProtocolState::Multiplier(previous) => {
                let apy = multiplier_apy(*previous, current);
                Ok(Derivation::Sample(ctx.sample(*target, apy), next))
            }
            ProtocolState::Empty => Ok(Derivation::Baseline(next)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::{Address, Selector, U256};
    use assert_matches::assert_matches;

    use super::{multiplier_apy, MultiplierRatioAdapter};
    use crate::{
        adapter::{
            testing::CallTable, AdapterContext, Derivation, ProtocolAdapter, ProtocolState, Window,
        },
        chain::ContractCall,
        types::BlockRef,
    };

    fn adapter() -> MultiplierRatioAdapter {
        let call = ContractCall {
            address: Address::from_str("0xae7ab96520de3a18e5e111b5eaab095312d7fe84").unwrap(),
            selector: Selector::from([0x03, 0x5f, 0xaf, 0x82]),
        };
        MultiplierRatioAdapter::new(call, 18, 86_400)
    }

    fn wad(value: f64) -> U256 {
        U256::from((value * 1e6).round() as u64) * U256::from(1_000_000_000_000u64)
    }

    fn interval(number: u64) -> Window {
        Window::Interval {
            target: number * 12,
            block: BlockRef {
                number,
                timestamp: number * 12,
            },
        }
    }

    #[test]
    fn test_multiplier_formula() {
        let apy = multiplier_apy(1.00, 1.047);
        assert!((apy - 4.70).abs() < 1e-9, "apy = {apy}");
    }

    #[tokio::test]
    async fn test_seed_and_derive() {
        let oracle = CallTable::default()
            .with(10, Some(wad(1.0)))
            .with(11, Some(wad(1.047)));
        let ctx = AdapterContext {
            source_key: "lido",
            weight: 1.0,
            oracle: &oracle,
        };
        let adapter = adapter();

        let state = adapter
            .seed(
                &ctx,
                BlockRef {
                    number: 10,
                    timestamp: 120,
                },
            )
            .await
            .unwrap();
        assert_eq!(state, ProtocolState::Multiplier(1.0));

        let derivation = adapter
            .derive_sample(&ctx, &state, &interval(11))
            .await
            .unwrap();
        assert_matches!(derivation, Derivation::Sample(sample, ProtocolState::Multiplier(next)) => {
            assert!((sample.apy_percent - 4.70).abs() < 1e-9);
            assert_eq!(sample.timestamp_seconds, 132);
            assert!((next - 1.047).abs() < 1e-12);
        });
    }

    #[tokio::test]
    async fn test_unseeded_reading_is_a_baseline() {
        let oracle = CallTable::default().with(11, Some(wad(1.047)));
        let ctx = AdapterContext {
            source_key: "lido",
            weight: 1.0,
            oracle: &oracle,
        };
        let adapter = adapter();

        let state = adapter
            .seed(
                &ctx,
                BlockRef {
                    number: 10,
                    timestamp: 120,
                },
            )
            .await
            .unwrap();
        assert_eq!(state, ProtocolState::Empty);

        let derivation = adapter
            .derive_sample(&ctx, &state, &interval(11))
            .await
            .unwrap();
        assert_matches!(derivation, Derivation::Baseline(ProtocolState::Multiplier(_)));
    }

    #[tokio::test]
    async fn test_skip_then_recover_compares_against_last_valid_reading() {
        // Readings: [valid, zero, valid].
        let oracle = CallTable::default()
            .with(10, Some(wad(1.0)))
            .with(11, Some(U256::ZERO))
            .with(12, Some(wad(1.047)));
        let ctx = AdapterContext {
            source_key: "lido",
            weight: 1.0,
            oracle: &oracle,
        };
        let adapter = adapter();

        let mut state = ProtocolState::Empty;
        let mut samples = Vec::new();
        for number in [10, 11, 12] {
            match adapter
                .derive_sample(&ctx, &state, &interval(number))
                .await
                .unwrap()
            {
                Derivation::Sample(sample, next) => {
                    samples.push(sample);
                    state = next;
                }
                Derivation::Baseline(next) => state = next,
                Derivation::Skipped(_) => {}
            }
        }

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp_seconds, 144);
        assert!((samples[0].apy_percent - 4.70).abs() < 1e-9);
    }
}
