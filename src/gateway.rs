//! # Request Gateway
//!
//! The typed request/response surface of the core. Every operation is
//! total: it validates its inputs, delegates to one of the three
//! pipelines (create-vault, build-PSBT, recover), and returns either a
//! success payload or a typed [`VaultError`]. A foreign-boundary shim
//! may serialize these types to JSON; that schema belongs to the
//! shim, not to this module.

use bitcoin::Script;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::encoding;
use crate::error::VaultResult;
use crate::utils;
use crate::vault::metadata::VaultMetadata;
use crate::vault::psbt::{self, FinalizedPsbt, PolicyReport, PsbtBuilder};
use crate::vault::recovery::{self, ScanAddressEntry};
use crate::vault::taproot::{creation_metadata, VaultOutput};
use crate::vault::types::{
    Network, PsbtData, RecoveryType, SpendIntent, Utxo, VaultConfig, VaultTemplate,
};

/// Library version as `MAJOR.MINOR.PATCH`.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Validate a raw network tag coming over the foreign boundary.
pub fn init(network: i32) -> VaultResult<Network> {
    Network::try_from(network)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateVaultAddressRequest {
    pub primary_xpub: String,
    pub emergency_xpub: Option<String>,
    pub template: VaultTemplate,
    pub vault_index: u32,
    pub network: Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateVaultAddressResponse {
    pub address: String,
    pub descriptor: String,
    pub internal_key: String,
    pub spending_script_hex: String,
    pub metadata_script_hex: String,
    pub metadata: VaultMetadata,
}

/// Create-vault pipeline: derive keys, build the script tree, and
/// return the deposit address with everything needed to audit it.
pub fn generate_vault_address(
    request: &GenerateVaultAddressRequest,
) -> VaultResult<GenerateVaultAddressResponse> {
    config::validation::validate_delay_blocks(request.template.delay_blocks())?;
    if let VaultTemplate::Custom {
        recovery_type: RecoveryType::MultiSig { threshold, total },
        ..
    } = request.template
    {
        config::validation::validate_multisig(threshold, total)?;
    }

    let metadata = creation_metadata(
        &request.template,
        request.vault_index,
        request.emergency_xpub.is_some(),
    );
    let output = VaultOutput::assemble(
        &request.primary_xpub,
        request.emergency_xpub.as_deref(),
        metadata,
        request.network,
    )?;

    Ok(GenerateVaultAddressResponse {
        address: output.address.to_string(),
        descriptor: output.descriptor(),
        internal_key: output.internal_key.to_string(),
        spending_script_hex: encoding::to_hex(output.spending_script.as_bytes()),
        metadata_script_hex: encoding::to_hex(output.metadata_script.as_bytes()),
        metadata: output.metadata,
    })
}

/// Decode a metadata leaf script back into its payload.
pub fn decode_metadata_leaf(script_bytes: &[u8]) -> VaultResult<VaultMetadata> {
    crate::vault::taproot::decode_metadata_leaf(Script::from_bytes(script_bytes))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedSpendRequest {
    pub config: VaultConfig,
    pub intent: SpendIntent,
    pub utxos: Vec<Utxo>,
    /// Current chain tip, when the caller knows it; used only for the
    /// unlock-height estimate in the summary.
    pub current_height: Option<u32>,
}

pub fn build_delayed_spend_psbt(request: &DelayedSpendRequest) -> VaultResult<PsbtData> {
    PsbtBuilder::new(&request.config)?.build_delayed_spend(
        &request.intent,
        &request.utxos,
        request.current_height,
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencySpendRequest {
    pub vault_id: String,
    pub config: VaultConfig,
    pub destination: String,
    pub fee_rate: f64,
    pub utxos: Vec<Utxo>,
}

pub fn build_emergency_psbt(request: &EmergencySpendRequest) -> VaultResult<PsbtData> {
    if request.vault_id != request.config.id {
        return Err(crate::error::VaultError::policy(format!(
            "request targets vault {} but carries config for {}",
            request.vault_id, request.config.id
        )));
    }
    PsbtBuilder::new(&request.config)?.build_emergency(
        &request.destination,
        request.fee_rate,
        &request.utxos,
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSpendRequest {
    pub original_txid: String,
    pub config: VaultConfig,
    pub fee_rate: f64,
    /// Fee rate of the in-flight spend being replaced, when known;
    /// the replacement must strictly exceed it.
    pub original_fee_rate: Option<f64>,
    pub utxos: Vec<Utxo>,
}

pub fn build_cancel_psbt(request: &CancelSpendRequest) -> VaultResult<PsbtData> {
    PsbtBuilder::new(&request.config)?.build_cancel(
        &request.original_txid,
        request.fee_rate,
        request.original_fee_rate,
        &request.utxos,
    )
}

/// Check a returned PSBT against a vault's policy, offline.
pub fn verify_psbt_policy(psbt_base64: &str, config: &VaultConfig) -> VaultResult<PolicyReport> {
    PsbtBuilder::new(config)?.verify_policy(psbt_base64)
}

/// Extract the broadcastable transaction from a fully signed PSBT.
pub fn finalize_psbt(signed_psbt_base64: &str) -> VaultResult<FinalizedPsbt> {
    psbt::finalize_psbt(signed_psbt_base64)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanAddressesRequest {
    pub xpub: String,
    /// Emergency xpub, when the wallet was set up with one; candidate
    /// addresses are then also derived in their emergency-keyed form.
    pub emergency_xpub: Option<String>,
    pub start_index: u32,
    /// Window size; defaults to the configured scan count.
    pub count: Option<u32>,
    pub network: Network,
}

pub fn derive_scan_addresses(request: &ScanAddressesRequest) -> VaultResult<Vec<ScanAddressEntry>> {
    let count = request
        .count
        .unwrap_or(config::scan::DEFAULT_SCAN_COUNT);
    recovery::derive_scan_addresses(
        &request.xpub,
        request.emergency_xpub.as_deref(),
        request.start_index,
        count,
        request.network,
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructVaultRequest {
    pub address: String,
    pub utxos: Vec<Utxo>,
    pub xpub: String,
    /// Emergency xpub, when the vault may have been created with one;
    /// emergency-keyed vaults can only be matched with it present.
    pub emergency_xpub: Option<String>,
    pub network: Network,
}

pub fn reconstruct_vault(request: &ReconstructVaultRequest) -> VaultResult<Option<VaultConfig>> {
    utils::address::validate_and_parse(&request.address, request.network)?;
    recovery::reconstruct_vault(
        &request.address,
        &request.utxos,
        &request.xpub,
        request.emergency_xpub.as_deref(),
        request.network,
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressValidation {
    pub valid: bool,
    pub address_type: Option<String>,
    pub network: Option<Network>,
}

pub fn validate_address(address: &str, network: Network) -> AddressValidation {
    match utils::address::validate_and_parse(address, network) {
        Ok(parsed) => AddressValidation {
            valid: true,
            address_type: parsed.address_type().map(|t| t.to_string()),
            network: Some(network),
        },
        Err(_) => AddressValidation {
            valid: false,
            address_type: None,
            network: None,
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpubValidation {
    pub valid: bool,
    pub network: Option<Network>,
}

pub fn validate_xpub(xpub: &str, network: Network) -> XpubValidation {
    match crate::keys::parse_xpub(xpub, network) {
        Ok(_) => XpubValidation {
            valid: true,
            network: Some(network),
        },
        Err(_) => XpubValidation {
            valid: false,
            network: None,
        },
    }
}

/// Human-readable duration estimate for a block count.
pub fn blocks_to_time_estimate(blocks: u32) -> String {
    utils::time::blocks_to_time_estimate(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::descriptor;

    const MAINNET_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    #[test]
    fn test_version_is_semver() {
        let version = version();
        assert_eq!(version.split('.').count(), 3);
    }

    #[test]
    fn test_init_network_tags() {
        assert_eq!(init(0).unwrap(), Network::Mainnet);
        assert_eq!(init(3).unwrap(), Network::Regtest);
        assert!(init(4).is_err());
        assert!(init(-1).is_err());
    }

    #[test]
    fn test_generate_vault_address_mainnet_savings() {
        let request = GenerateVaultAddressRequest {
            primary_xpub: MAINNET_XPUB.to_string(),
            emergency_xpub: None,
            template: VaultTemplate::savings(),
            vault_index: 0,
            network: Network::Mainnet,
        };

        let response = generate_vault_address(&request).unwrap();
        assert!(response.address.starts_with("bc1p"));
        assert_eq!(response.address.len(), 62);
        assert_eq!(response.metadata.delay_blocks, 1008);
        assert_eq!(response.metadata.version, 1);

        let parsed = descriptor::parse(&response.descriptor).unwrap();
        assert_eq!(parsed.delay_blocks, 1008);
        assert_eq!(
            parsed.derive_address(Network::Mainnet).unwrap().to_string(),
            response.address
        );
    }

    #[test]
    fn test_generate_is_deterministic() {
        let request = GenerateVaultAddressRequest {
            primary_xpub: MAINNET_XPUB.to_string(),
            emergency_xpub: None,
            template: VaultTemplate::spending(),
            vault_index: 11,
            network: Network::Mainnet,
        };
        let a = generate_vault_address(&request).unwrap();
        let b = generate_vault_address(&request).unwrap();
        assert_eq!(a.address, b.address);
        assert_eq!(a.descriptor, b.descriptor);
        assert_eq!(a.internal_key, b.internal_key);
        assert_eq!(a.spending_script_hex, b.spending_script_hex);
    }

    #[test]
    fn test_generate_rejects_bad_multisig() {
        let request = GenerateVaultAddressRequest {
            primary_xpub: MAINNET_XPUB.to_string(),
            emergency_xpub: None,
            template: VaultTemplate::Custom {
                delay_blocks: 288,
                recovery_type: RecoveryType::MultiSig {
                    threshold: 5,
                    total: 3,
                },
            },
            vault_index: 0,
            network: Network::Mainnet,
        };
        assert_eq!(generate_vault_address(&request).unwrap_err().code(), 4002);
    }

    #[test]
    fn test_decode_metadata_leaf_roundtrip() {
        let request = GenerateVaultAddressRequest {
            primary_xpub: MAINNET_XPUB.to_string(),
            emergency_xpub: None,
            template: VaultTemplate::savings(),
            vault_index: 5,
            network: Network::Mainnet,
        };
        let response = generate_vault_address(&request).unwrap();
        let script_bytes = encoding::from_hex("script", &response.metadata_script_hex).unwrap();

        let decoded = decode_metadata_leaf(&script_bytes).unwrap();
        assert_eq!(decoded, response.metadata);
    }

    #[test]
    fn test_derive_scan_addresses_defaults_count() {
        let request = ScanAddressesRequest {
            xpub: MAINNET_XPUB.to_string(),
            emergency_xpub: None,
            start_index: 0,
            count: None,
            network: Network::Mainnet,
        };
        let entries = derive_scan_addresses(&request).unwrap();
        assert_eq!(entries.len(), 2 * config::scan::DEFAULT_SCAN_COUNT as usize);
    }

    #[test]
    fn test_derive_scan_addresses_explicit_count() {
        let request = ScanAddressesRequest {
            xpub: MAINNET_XPUB.to_string(),
            emergency_xpub: None,
            start_index: 0,
            count: Some(2),
            network: Network::Mainnet,
        };
        let entries = derive_scan_addresses(&request).unwrap();
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn test_validate_address_reports_type() {
        let request = GenerateVaultAddressRequest {
            primary_xpub: MAINNET_XPUB.to_string(),
            emergency_xpub: None,
            template: VaultTemplate::savings(),
            vault_index: 0,
            network: Network::Mainnet,
        };
        let response = generate_vault_address(&request).unwrap();

        let report = validate_address(&response.address, Network::Mainnet);
        assert!(report.valid);
        assert_eq!(report.address_type.as_deref(), Some("p2tr"));
        assert_eq!(report.network, Some(Network::Mainnet));

        let miss = validate_address(&response.address, Network::Signet);
        assert!(!miss.valid);
        assert!(!validate_address("garbage", Network::Mainnet).valid);
    }

    #[test]
    fn test_validate_xpub() {
        assert!(validate_xpub(MAINNET_XPUB, Network::Mainnet).valid);
        assert!(!validate_xpub(MAINNET_XPUB, Network::Testnet).valid);
        assert!(!validate_xpub("xpub-junk", Network::Mainnet).valid);
    }

    #[test]
    fn test_blocks_to_time_estimate() {
        assert_eq!(blocks_to_time_estimate(1008), "~7 days");
    }
}
