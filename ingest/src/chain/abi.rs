use std::str::FromStr;

use alloy_primitives::{keccak256, Selector, B256, U256};
use error_stack::{Result, ResultExt};

use crate::error::IngestError;

const WORD_SIZE: usize = 32;

/// Parses a function selector, either as `0x`-prefixed 4 bytes or as a signature such as
/// `exchangeRate()`.
pub fn parse_selector(value: &str) -> Result<Selector, IngestError> {
    let value = value.trim();
    if value.starts_with("0x") {
        return Selector::from_str(value)
            .change_context(IngestError::Configuration)
            .attach_printable_lazy(|| format!("invalid function selector: {value}"));
    }

    check_signature(value)?;
    let hash = keccak256(value.as_bytes());
    Ok(Selector::from_slice(&hash[..4]))
}

/// Parses an event topic, either as `0x`-prefixed 32 bytes or as an event signature such as
/// `RewardsReceived(uint256)`.
pub fn parse_topic(value: &str) -> Result<B256, IngestError> {
    let value = value.trim();
    if value.starts_with("0x") {
        return B256::from_str(value)
            .change_context(IngestError::Configuration)
            .attach_printable_lazy(|| format!("invalid event topic: {value}"));
    }

    check_signature(value)?;
    Ok(keccak256(value.as_bytes()))
}

fn check_signature(value: &str) -> Result<(), IngestError> {
    let well_formed = value
        .find('(')
        .map(|open| open > 0 && value.ends_with(')'))
        .unwrap_or(false);

    if !well_formed || value.contains(' ') {
        return Err(IngestError::configuration(&format!(
            "malformed signature: {value}"
        )));
    }

    Ok(())
}

/// Returns the `index`-th 32-byte big endian word of `data`.
pub fn word(data: &[u8], index: usize) -> Option<U256> {
    let start = index.checked_mul(WORD_SIZE)?;
    let end = start.checked_add(WORD_SIZE)?;
    let slice = data.get(start..end)?;
    U256::try_from_be_slice(slice)
}

/// Converts a fixed point integer with `decimals` decimals to a float.
pub fn scaled_to_f64(value: U256, decimals: u8) -> f64 {
    let raw = value.to_string().parse::<f64>().unwrap_or(f64::NAN);
    raw / 10f64.powi(decimals as i32)
}

/// Returns `value - 1` for a fixed point `value`, computed before the conversion to float so
/// that rates very close to one keep their precision.
pub fn signed_excess(value: U256, decimals: u8) -> f64 {
    let one = U256::from(10u64).pow(U256::from(decimals));
    if value >= one {
        scaled_to_f64(value - one, decimals)
    } else {
        -scaled_to_f64(one - value, decimals)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::*;

    #[test]
    fn test_selector_from_signature() {
        // keccak256("totalSupply()") = 0x18160ddd...
        let selector = parse_selector("totalSupply()").unwrap();
        assert_eq!(selector.as_slice(), &[0x18, 0x16, 0x0d, 0xdd]);

        let selector = parse_selector("0x18160ddd").unwrap();
        assert_eq!(selector.as_slice(), &[0x18, 0x16, 0x0d, 0xdd]);
    }

    #[test]
    fn test_topic_from_signature() {
        // keccak256("Transfer(address,address,uint256)")
        let topic = parse_topic("Transfer(address,address,uint256)").unwrap();
        assert_eq!(
            hex::encode(topic),
            "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_malformed_signatures() {
        assert!(parse_selector("totalSupply").is_err());
        assert!(parse_selector("(uint256)").is_err());
        assert!(parse_selector("0x1234").is_err());
        assert!(parse_topic("Rewards Received(uint256)").is_err());
    }

    #[test]
    fn test_word() {
        let mut data = vec![0u8; 64];
        data[31] = 7;
        data[63] = 9;
        assert_eq!(word(&data, 0), Some(U256::from(7u64)));
        assert_eq!(word(&data, 1), Some(U256::from(9u64)));
        assert_eq!(word(&data, 2), None);
        assert_eq!(word(&data[..31], 0), None);
    }

    #[test]
    fn test_scaled_values() {
        let value = U256::from(1_047_000_000_000_000_000u64);
        assert!((scaled_to_f64(value, 18) - 1.047).abs() < 1e-12);

        // 1 + 1.5e-9 in ray precision (27 decimals).
        let ray = U256::from(10u64).pow(U256::from(27u64));
        let value = ray + U256::from(1_500_000_000_000_000_000u64);
        assert!((signed_excess(value, 27) - 1.5e-9).abs() < 1e-18);

        let value = ray - U256::from(1_500_000_000_000_000_000u64);
        assert!((signed_excess(value, 27) + 1.5e-9).abs() < 1e-18);
    }
}
