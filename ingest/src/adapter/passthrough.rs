use alloy_primitives::Address;
use async_trait::async_trait;
use error_stack::Result;

use crate::error::IngestError;

use super::{AdapterContext, Derivation, ProtocolAdapter, ProtocolState, Window, Windowing};

/// Converts a fractional yield into percent.
pub fn passthrough_apy(value: f64) -> f64 {
    value * 100.0
}

/// Forwards a yield series pre-computed by an external aggregator.
#[derive(Debug, Clone)]
pub struct SeriesPassthroughAdapter {
    address: Address,
    interval_seconds: u64,
}

impl SeriesPassthroughAdapter {
    pub fn new(address: Address, interval_seconds: u64) -> Self {
        Self {
            address,
            interval_seconds,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for SeriesPassthroughAdapter {
    fn kind(&self) -> &'static str {
        "seriesPassthrough"
    }

    fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }

    fn windowing(&self) -> Windowing {
        Windowing::Series {
            address: self.address,
        }
    }

    async fn derive_sample(
        &self,
        ctx: &AdapterContext<'_>,
        state: &ProtocolState,
        window: &Window,
    ) -> Result<Derivation, IngestError> {
        let Window::Point(point) = window else {
            return Err(IngestError::fatal(&format!(
                "series passthrough adapter cannot derive {window}"
            )));
        };

        match point.value {
            None => Ok(Derivation::skipped("series value not available")),
            Some(value) if value == 0.0 => Ok(Derivation::skipped("series value is zero")),
            Some(value) if !value.is_finite() => {
                Ok(Derivation::skipped("series value is not finite"))
            }
            Some(value) => Ok(Derivation::Sample(
                ctx.sample(point.timestamp, passthrough_apy(value)),
                *state,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;
    use assert_matches::assert_matches;

    use super::{passthrough_apy, SeriesPassthroughAdapter};
    use crate::{
        adapter::{
            testing::CallTable, AdapterContext, Derivation, ProtocolAdapter, ProtocolState, Window,
        },
        aggregator::SeriesPoint,
        types::CursorUnit,
    };

    #[test]
    fn test_passthrough_formula() {
        let apy = passthrough_apy(0.045);
        assert!((apy - 4.50).abs() < 1e-12, "apy = {apy}");
    }

    #[tokio::test]
    async fn test_derive_points() {
        let oracle = CallTable::default();
        let ctx = AdapterContext {
            source_key: "curve",
            weight: 0.1,
            oracle: &oracle,
        };
        let adapter = SeriesPassthroughAdapter::new(Address::ZERO, 86_400);
        assert_eq!(adapter.cursor_unit(), CursorUnit::Timestamp);

        let point = |value| {
            Window::Point(SeriesPoint {
                timestamp: 1_700_006_400,
                value,
            })
        };

        let derivation = adapter
            .derive_sample(&ctx, &ProtocolState::Empty, &point(Some(0.045)))
            .await
            .unwrap();
        assert_matches!(derivation, Derivation::Sample(sample, _) => {
            assert_eq!(sample.timestamp_seconds, 1_700_006_400);
            assert!((sample.apy_percent - 4.5).abs() < 1e-12);
        });

        for value in [None, Some(0.0), Some(f64::NAN)] {
            let derivation = adapter
                .derive_sample(&ctx, &ProtocolState::Empty, &point(value))
                .await
                .unwrap();
            assert_matches!(derivation, Derivation::Skipped(_));
        }
    }
}
