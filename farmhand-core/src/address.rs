//! Reward addresses and the puzzle hashes they encode.

use bech32::primitives::decode::CheckedHrpstring;
use bech32::Bech32m;

use crate::error::ConfigError;

/// Length of a puzzle hash in bytes.
pub const PUZZLE_HASH_LEN: usize = 32;

/// Decode a bech32m address (`xch1…`) into its puzzle hash, hex encoded
/// without a `0x` prefix. The human-readable prefix is not checked.
pub fn decode_puzzle_hash(address: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddress {
        address: address.to_string(),
        reason,
    };
    let checked =
        CheckedHrpstring::new::<Bech32m>(address).map_err(|err| invalid(err.to_string()))?;
    let bytes: Vec<u8> = checked.byte_iter().collect();
    if bytes.len() != PUZZLE_HASH_LEN {
        return Err(invalid(format!(
            "decodes to {} bytes, expected {PUZZLE_HASH_LEN}",
            bytes.len()
        )));
    }
    Ok(hex::encode(bytes))
}
