//! # Error Types for the Vault Core
//!
//! This module provides the error taxonomy for all vault operations.
//! Every error carries a stable numeric code so the foreign-boundary
//! shim can surface it unchanged; no error message ever contains raw
//! key material.

use thiserror::Error;

/// Main error type for all vault-core operations
#[derive(Debug, Error)]
pub enum VaultError {
    /// Extended public key failed to parse or has the wrong version bytes
    #[error("Invalid xpub: {message}")]
    InvalidXpub { message: String },

    /// Address failed to parse or is not usable here
    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    /// Key or address belongs to a different network than requested
    #[error("Network mismatch: expected {expected}, got {actual}")]
    NetworkMismatch { expected: String, actual: String },

    /// PSBT construction or decoding failures
    #[error("PSBT building failed: {message}")]
    PsbtBuildFailed { message: String },

    /// Selected UTXOs cannot cover the requested amount plus fees
    #[error("Insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds { needed: u64, available: u64 },

    /// A returned PSBT violates the vault's spending policy
    #[error("Policy violation: {message}")]
    PolicyViolation { message: String },

    /// The value left for the destination output is below the dust threshold
    #[error("Output of {value_sats} sats is below the dust threshold of {dust_sats} sats")]
    DustOutput { value_sats: u64, dust_sats: u64 },

    /// BIP32 child derivation failures
    #[error("Key derivation failed: {message}")]
    KeyDerivationFailed { message: String },

    /// Metadata payload could not be decoded
    #[error("Invalid metadata encoding: {message}")]
    MetadataDecodeFailed { message: String },

    /// Metadata payload exceeds a codec length limit
    #[error("Metadata field too long: {message}")]
    MetadataEncodeTooLong { message: String },

    /// JSON or binary serialization failures
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    /// Malformed external input that never reached a pipeline
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Transient chain-adapter failure; retried internally
    #[error("Chain adapter transient failure: {message}")]
    AdapterTransient { message: String },

    /// Permanent chain-adapter failure; surfaced without retry
    #[error("Chain adapter permanent failure: {message}")]
    AdapterPermanent { message: String },

    /// Operation cancelled through the caller's cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for vault-core operations
pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// Create an invalid-xpub error
    pub fn invalid_xpub(message: impl Into<String>) -> Self {
        Self::InvalidXpub {
            message: message.into(),
        }
    }

    /// Create an invalid-address error
    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
        }
    }

    /// Create a PSBT build error
    pub fn psbt(message: impl Into<String>) -> Self {
        Self::PsbtBuildFailed {
            message: message.into(),
        }
    }

    /// Create a policy violation error
    pub fn policy(message: impl Into<String>) -> Self {
        Self::PolicyViolation {
            message: message.into(),
        }
    }

    /// Create a key derivation error
    pub fn derivation(message: impl Into<String>) -> Self {
        Self::KeyDerivationFailed {
            message: message.into(),
        }
    }

    /// Create a metadata decode error
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::MetadataDecodeFailed {
            message: message.into(),
        }
    }

    /// Create an invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a transient adapter error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::AdapterTransient {
            message: message.into(),
        }
    }

    /// Create a permanent adapter error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::AdapterPermanent {
            message: message.into(),
        }
    }

    /// Stable numeric code for the foreign boundary
    pub fn code(&self) -> i32 {
        match self {
            VaultError::InvalidXpub { .. } => 1001,
            VaultError::InvalidAddress { .. } => 1002,
            VaultError::NetworkMismatch { .. } => 1003,
            VaultError::PsbtBuildFailed { .. } => 2001,
            VaultError::InsufficientFunds { .. } => 2002,
            VaultError::PolicyViolation { .. } => 2003,
            VaultError::DustOutput { .. } => 2004,
            VaultError::KeyDerivationFailed { .. } => 3001,
            VaultError::MetadataDecodeFailed { .. } => 3002,
            VaultError::MetadataEncodeTooLong { .. } => 3003,
            VaultError::SerializationError { .. } => 4001,
            VaultError::InvalidInput { .. } => 4002,
            VaultError::AdapterTransient { .. } => 5001,
            VaultError::AdapterPermanent { .. } => 5002,
            VaultError::Cancelled => 5003,
        }
    }

    /// Check if this error is retryable (transient adapter issues only)
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::AdapterTransient { .. })
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::SerializationError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(VaultError::invalid_xpub("bad checksum").code(), 1001);
        assert_eq!(VaultError::invalid_address("tb1q...").code(), 1002);
        assert_eq!(
            VaultError::NetworkMismatch {
                expected: "mainnet".into(),
                actual: "testnet".into(),
            }
            .code(),
            1003
        );
        assert_eq!(VaultError::psbt("no inputs").code(), 2001);
        assert_eq!(
            VaultError::InsufficientFunds {
                needed: 200_000,
                available: 100_000,
            }
            .code(),
            2002
        );
        assert_eq!(VaultError::policy("wrong sequence").code(), 2003);
        assert_eq!(
            VaultError::DustOutput {
                value_sats: 100,
                dust_sats: 330,
            }
            .code(),
            2004
        );
        assert_eq!(VaultError::derivation("hardened child").code(), 3001);
        assert_eq!(VaultError::metadata("truncated").code(), 3002);
        assert_eq!(
            VaultError::MetadataEncodeTooLong {
                message: "template id".into(),
            }
            .code(),
            3003
        );
        assert_eq!(VaultError::transient("timeout").code(), 5001);
        assert_eq!(VaultError::permanent("gone").code(), 5002);
        assert_eq!(VaultError::Cancelled.code(), 5003);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(VaultError::transient("socket reset").is_retryable());
        assert!(!VaultError::permanent("not found").is_retryable());
        assert!(!VaultError::Cancelled.is_retryable());
        assert!(!VaultError::policy("bad fee").is_retryable());
    }
}
