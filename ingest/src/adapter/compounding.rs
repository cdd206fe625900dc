use alloy_primitives::U256;
use async_trait::async_trait;
use error_stack::Result;

use crate::{
    chain::{signed_excess, ContractCall},
    error::IngestError,
    types::SECONDS_PER_YEAR,
};

use super::{AdapterContext, Derivation, ProtocolAdapter, ProtocolState, Window, Windowing};

/// Annualizes a per-second compounding rate `r`: `(r^SECONDS_PER_YEAR - 1) * 100`.
pub fn compounding_apy(rate: f64) -> f64 {
    compounding_apy_from_excess(rate - 1.0)
}

/// Same as [compounding_apy], taking `r - 1`.
///
/// Per-second rates are very close to one, so the power is computed as
/// `expm1(SECONDS_PER_YEAR * ln_1p(r - 1))` to keep precision.
pub fn compounding_apy_from_excess(excess: f64) -> f64 {
    (SECONDS_PER_YEAR as f64 * excess.ln_1p()).exp_m1() * 100.0
}

/// Reads a per-second compounding rate at each interval.
#[derive(Debug, Clone)]
pub struct CompoundingRateAdapter {
    rate: ContractCall,
    decimals: u8,
    interval_seconds: u64,
}

impl CompoundingRateAdapter {
    pub fn new(rate: ContractCall, decimals: u8, interval_seconds: u64) -> Self {
        Self {
            rate,
            decimals,
            interval_seconds,
        }
    }

    fn derive_from_raw(&self, raw: Option<U256>) -> std::result::Result<f64, String> {
        let raw = match raw {
            None => return Err("rate not available".to_string()),
            Some(raw) if raw.is_zero() => return Err("rate is zero".to_string()),
            Some(raw) => raw,
        };

        let apy = compounding_apy_from_excess(signed_excess(raw, self.decimals));
        if !apy.is_finite() {
            return Err(format!("rate {raw} does not annualize to a finite value"));
        }

        Ok(apy)
    }
}

#[async_trait]
impl ProtocolAdapter for CompoundingRateAdapter {
    fn kind(&self) -> &'static str {
        "compoundingRate"
    }

    fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }

    fn windowing(&self) -> Windowing {
        Windowing::Intervals
    }

    async fn derive_sample(
        &self,
        ctx: &AdapterContext<'_>,
        state: &ProtocolState,
        window: &Window,
    ) -> Result<Derivation, IngestError> {
        let Window::Interval { target, block } = window else {
            return Err(IngestError::fatal(&format!(
                "compounding rate adapter cannot derive {window}"
            )));
        };

        let raw = ctx.read_word(&self.rate, block.number).await?;

        match self.derive_from_raw(raw) {
            Ok(apy) => Ok(Derivation::Sample(ctx.sample(*target, apy), *state)),
            Err(reason) => Ok(Derivation::Skipped(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::{Address, Selector, U256};
    use assert_matches::assert_matches;

    use super::{compounding_apy, compounding_apy_from_excess, CompoundingRateAdapter};
    use crate::{
        adapter::{
            testing::CallTable, AdapterContext, Derivation, ProtocolAdapter, ProtocolState, Window,
        },
        chain::ContractCall,
        types::BlockRef,
    };

    fn ray() -> U256 {
        U256::from(10u64).pow(U256::from(27u64))
    }

    fn adapter() -> CompoundingRateAdapter {
        let call = ContractCall {
            address: Address::from_str("0x7d2768de32b0b80b7a3454c06bdac94a69ddc7a9").unwrap(),
            selector: Selector::from([0x12, 0x34, 0x56, 0x78]),
        };
        CompoundingRateAdapter::new(call, 27, 86_400)
    }

    #[test]
    fn test_compounding_formula() {
        // r = 1.0000001 compounded every second for a year.
        let expected = (1.0000001f64.powf(31_536_000.0) - 1.0) * 100.0;
        let apy = compounding_apy(1.0000001);
        assert!((apy - expected).abs() < 1e-3, "apy = {apy}");
        assert!((apy - 2242.022).abs() < 1e-2, "apy = {apy}");

        // A realistic 5% per-second rate.
        let apy = compounding_apy_from_excess(1.547_125_982_881_425_4e-9);
        assert!((apy - 5.0).abs() < 1e-6, "apy = {apy}");

        assert_eq!(compounding_apy(1.0), 0.0);
    }

    #[tokio::test]
    async fn test_derive_from_ray_rate() {
        let rate = ray() + U256::from(1_547_125_982_881_425_400u64);
        let oracle = CallTable::default().with(100, Some(rate));
        let ctx = AdapterContext {
            source_key: "aave",
            weight: 0.5,
            oracle: &oracle,
        };
        let window = Window::Interval {
            target: 1_200,
            block: BlockRef {
                number: 100,
                timestamp: 1_200,
            },
        };

        let derivation = adapter()
            .derive_sample(&ctx, &ProtocolState::Empty, &window)
            .await
            .unwrap();

        assert_matches!(derivation, Derivation::Sample(sample, ProtocolState::Empty) => {
            assert_eq!(sample.source_key, "aave");
            assert_eq!(sample.timestamp_seconds, 1_200);
            assert_eq!(sample.weight, 0.5);
            assert!((sample.apy_percent - 5.0).abs() < 1e-6);
        });
    }

    #[tokio::test]
    async fn test_zero_or_missing_rate_is_skipped() {
        let oracle = CallTable::default()
            .with(100, Some(U256::ZERO))
            .with(101, None);
        let ctx = AdapterContext {
            source_key: "aave",
            weight: 1.0,
            oracle: &oracle,
        };

        for number in [100, 101] {
            let window = Window::Interval {
                target: number * 12,
                block: BlockRef {
                    number,
                    timestamp: number * 12,
                },
            };
            let derivation = adapter()
                .derive_sample(&ctx, &ProtocolState::Empty, &window)
                .await
                .unwrap();
            assert_matches!(derivation, Derivation::Skipped(_));
        }
    }

    #[tokio::test]
    async fn test_unreachable_oracle_is_an_error() {
        let oracle = CallTable {
            fail_at: Some(100),
            ..Default::default()
        };
        let ctx = AdapterContext {
            source_key: "aave",
            weight: 1.0,
            oracle: &oracle,
        };
        let window = Window::Interval {
            target: 1_200,
            block: BlockRef {
                number: 100,
                timestamp: 1_200,
            },
        };

        assert!(adapter()
            .derive_sample(&ctx, &ProtocolState::Empty, &window)
            .await
            .is_err());
    }
}
