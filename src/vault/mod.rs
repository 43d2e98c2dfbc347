//! # Vault Domain
//!
//! Core vault machinery: the data model, the metadata codec, Taproot
//! output assembly, PSBT construction and policy checks, and the
//! deterministic recovery scanner.

pub mod descriptor;
pub mod metadata;
pub mod psbt;
pub mod recovery;
pub mod taproot;
pub mod types;

#[cfg(test)]
mod tests;

pub use metadata::VaultMetadata;
pub use psbt::{PolicyReport, PsbtBuilder};
pub use recovery::{RecoveryScanner, RecoverySweep, ScanStatus};
pub use taproot::VaultOutput;
pub use types::{
    Network, PsbtData, RecoveryType, SpendIntent, SpendPath, SpendSummary, Utxo, VaultConfig,
    VaultTemplate,
};
