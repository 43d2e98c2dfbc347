//! # Utility Functions
//!
//! Common helpers used throughout the vault core.

use bitcoin::Address;
use std::str::FromStr;

use crate::error::{VaultError, VaultResult};
use crate::vault::types::Network;

/// Address parsing and formatting utilities
pub mod address {
    use super::*;

    /// Validate and parse a Bitcoin address for the given network
    pub fn validate_and_parse(address_str: &str, network: Network) -> VaultResult<Address> {
        let address = Address::from_str(address_str)
            .map_err(|_| VaultError::invalid_address(address_str))?;

        address
            .require_network(bitcoin::Network::from(network))
            .map_err(|_| VaultError::NetworkMismatch {
                expected: network.to_string(),
                actual: format!("address {}", super::format_short(address_str)),
            })
    }

    /// Check if an address string looks like a Taproot address
    pub fn is_taproot_address(address: &str) -> bool {
        address.starts_with("bc1p")
            || address.starts_with("tb1p")
            || address.starts_with("bcrt1p")
    }
}

/// Transaction ID utilities
pub mod txid {
    use super::*;

    /// Validate transaction ID format (64 hex characters)
    pub fn validate(txid: &str) -> VaultResult<()> {
        if txid.len() != 64 {
            return Err(VaultError::invalid_input(format!(
                "transaction id must be 64 characters, got {}",
                txid.len()
            )));
        }

        if !txid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VaultError::invalid_input(
                "transaction id must contain only hexadecimal characters",
            ));
        }

        Ok(())
    }
}

/// Format a long identifier for display with ellipsis in the middle
pub fn format_short(value: &str) -> String {
    if value.len() <= 19 {
        value.to_string()
    } else {
        format!("{}...{}", &value[..8], &value[value.len() - 8..])
    }
}

/// Amount formatting utilities
pub mod amount {
    /// Convert satoshis to BTC with 8 decimal places
    pub fn sats_to_btc(sats: u64) -> f64 {
        sats as f64 / 100_000_000.0
    }

    /// Format an amount as a string with units
    pub fn format_sats(sats: u64) -> String {
        if sats < 1_000 {
            format!("{} sats", sats)
        } else if sats < 100_000_000 {
            format!("{:.3} K sats", sats as f64 / 1_000.0)
        } else {
            format!("{:.8} BTC", sats_to_btc(sats))
        }
    }
}

/// Time estimation utilities
pub mod time {
    /// Human-readable estimate for a block count at ~10 minutes per
    /// block, e.g. `"~7 days"` for 1008 blocks.
    pub fn blocks_to_time_estimate(blocks: u32) -> String {
        let minutes = blocks as u64 * 10;
        if minutes < 60 {
            format!("~{} minutes", minutes)
        } else if minutes < 24 * 60 {
            let hours = round_div(minutes, 60);
            if hours == 1 {
                "~1 hour".to_string()
            } else {
                format!("~{} hours", hours)
            }
        } else {
            let days = round_div(minutes, 24 * 60);
            if days == 1 {
                "~1 day".to_string()
            } else {
                format!("~{} days", days)
            }
        }
    }

    fn round_div(value: u64, divisor: u64) -> u64 {
        (value + divisor / 2) / divisor
    }
}
