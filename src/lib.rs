//! # Vault Core: Bitcoin Taproot Vault Library
//!
//! Cryptographic core of a Bitcoin vault system. Turns user intent
//! (create a vault, spend from it, recover it) into Taproot outputs
//! and PSBTs whose policies are enforced by Bitcoin consensus. The
//! core never holds private keys: it consumes extended public keys
//! and emits addresses, output descriptors, and unsigned PSBTs ready
//! for an external hardware signer.

pub mod config;
pub mod encoding;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod services;
pub mod utils;
pub mod vault;

// Re-export commonly used types
pub use error::{VaultError, VaultResult};
pub use services::{CancelToken, ChainAdapter, MemoryChainAdapter};
pub use vault::{
    Network, PolicyReport, PsbtData, RecoveryScanner, RecoverySweep, RecoveryType, ScanStatus,
    SpendIntent, SpendPath, Utxo, VaultConfig, VaultMetadata, VaultOutput, VaultTemplate,
};
