//! # Configuration Constants and Settings
//!
//! This module centralizes all policy constants, limits, and default
//! settings used throughout the vault core.

use std::time::Duration;

/// Vault policy constants
pub mod vault {
    /// Default delay for the savings template (~1 week at 10 min/block)
    pub const SAVINGS_DELAY_BLOCKS: u32 = 1_008;

    /// Default delay for the spending template (~1 day)
    pub const SPENDING_DELAY_BLOCKS: u32 = 144;

    /// Minimum delay accepted by policy
    pub const MIN_DELAY_BLOCKS: u32 = 144;

    /// Maximum delay encodable as a BIP68 block-based relative timelock
    pub const MAX_DELAY_BLOCKS: u32 = 65_535;

    /// Metadata codec schema version
    pub const METADATA_VERSION: u8 = 1;

    /// Hard cap on an encoded metadata payload (Bitcoin script push limit)
    pub const MAX_METADATA_BYTES: usize = 520;
}

/// Fee and output policy constants
pub mod fees {
    /// Dust threshold for P2TR outputs in satoshis
    pub const DUST_THRESHOLD_SATS: u64 = 330;

    /// Minimum accepted fee rate in sat/vB
    pub const MIN_FEE_RATE: f64 = 1.0;

    /// Maximum accepted fee rate in sat/vB
    pub const MAX_FEE_RATE: f64 = 1_000.0;

    /// Fee rate above which policy verification attaches a warning
    pub const HIGH_FEE_RATE_WARN: f64 = 200.0;

    /// Schnorr signature size in a Taproot witness (64 bytes, default sighash)
    pub const SCHNORR_SIG_BYTES: usize = 64;

    /// Control block size for a depth-1 script tree (33 + 32)
    pub const CONTROL_BLOCK_BYTES: usize = 65;
}

/// Recovery scan constants
pub mod scan {
    use super::Duration;

    /// Default number of indices covered by one recovery sweep
    pub const DEFAULT_SCAN_COUNT: u32 = 100;

    /// Upper bound on indices tried when matching a single address
    pub const RECONSTRUCT_INDEX_LIMIT: u32 = 1_000;

    /// Retry attempts per address against the chain adapter
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;

    /// Base delay between retry attempts; doubles per attempt
    pub const RETRY_DELAY: Duration = Duration::from_millis(500);
}

/// Validation functions
pub mod validation {
    use super::{fees, vault};
    use crate::error::{VaultError, VaultResult};

    /// Validate a relative timelock delay against policy bounds
    pub fn validate_delay_blocks(delay_blocks: u32) -> VaultResult<()> {
        if delay_blocks < vault::MIN_DELAY_BLOCKS {
            return Err(VaultError::invalid_input(format!(
                "delay of {} blocks is below the policy minimum of {} blocks",
                delay_blocks,
                vault::MIN_DELAY_BLOCKS
            )));
        }

        if delay_blocks > vault::MAX_DELAY_BLOCKS {
            return Err(VaultError::invalid_input(format!(
                "delay of {} blocks does not fit a BIP68 block-based timelock (max {})",
                delay_blocks,
                vault::MAX_DELAY_BLOCKS
            )));
        }

        Ok(())
    }

    /// Validate a fee rate in sat/vB
    pub fn validate_fee_rate(fee_rate: f64) -> VaultResult<()> {
        if !fee_rate.is_finite() || fee_rate <= 0.0 {
            return Err(VaultError::invalid_input(format!(
                "fee rate must be a positive number of sat/vB, got {}",
                fee_rate
            )));
        }

        if fee_rate > fees::MAX_FEE_RATE {
            return Err(VaultError::invalid_input(format!(
                "fee rate {} sat/vB exceeds maximum {} sat/vB",
                fee_rate,
                fees::MAX_FEE_RATE
            )));
        }

        Ok(())
    }

    /// Validate a multisig recovery threshold
    pub fn validate_multisig(threshold: u8, total: u8) -> VaultResult<()> {
        if threshold == 0 || total == 0 || threshold > total {
            return Err(VaultError::invalid_input(format!(
                "invalid multisig configuration: {}-of-{}",
                threshold, total
            )));
        }
        Ok(())
    }
}
