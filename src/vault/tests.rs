//! End-to-end scenarios exercising the three pipelines together:
//! create-vault, build-PSBT, and recover.

use std::str::FromStr;

use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::psbt::Psbt;

use crate::error::VaultError;
use crate::gateway::{
    self, DelayedSpendRequest, EmergencySpendRequest, GenerateVaultAddressRequest,
    ReconstructVaultRequest,
};
use crate::keys;
use crate::services::chain::CancelToken;
use crate::services::memory::MemoryChainAdapter;
use crate::vault::metadata::VaultMetadata;
use crate::vault::psbt::PsbtBuilder;
use crate::vault::recovery::RecoveryScanner;
use crate::vault::taproot::{creation_metadata, VaultOutput};
use crate::vault::types::{
    Network, RecoveryType, SpendIntent, SpendPath, Utxo, VaultConfig, VaultTemplate,
};

const MAINNET_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

fn signet_xpub(seed_byte: u8) -> String {
    let master = Xpriv::new_master(bitcoin::Network::Signet, &[seed_byte; 32]).unwrap();
    Xpub::from_priv(keys::secp(), &master).to_string()
}

fn destination_address(network: bitcoin::Network) -> String {
    let master = Xpriv::new_master(network, &[99u8; 32]).unwrap();
    let key = Xpub::from_priv(keys::secp(), &master).to_x_only_pub();
    bitcoin::Address::p2tr(keys::secp(), key, None, network).to_string()
}

fn signet_vault(with_emergency: bool) -> VaultConfig {
    let primary = signet_xpub(1);
    let emergency = with_emergency.then(|| signet_xpub(2));
    let metadata = creation_metadata(&VaultTemplate::savings(), 0, with_emergency);
    let output =
        VaultOutput::assemble(&primary, emergency.as_deref(), metadata, Network::Signet).unwrap();
    output.to_config("scenario vault", &primary, emergency.as_deref(), 0)
}

fn fund(config: &VaultConfig, value: u64, tag: u8) -> Utxo {
    let output = VaultOutput::assemble(
        &config.primary_xpub,
        config.emergency_xpub.as_deref(),
        config.metadata.clone(),
        config.network,
    )
    .unwrap();
    Utxo {
        txid: hex::encode([tag; 32]),
        vout: 0,
        value_sats: value,
        script_pubkey: crate::encoding::to_hex(output.script_pubkey().as_bytes()),
        confirmations: 6,
        block_height: Some(840_000),
    }
}

// S1: address generation, mainnet savings, index 0
#[test]
fn scenario_address_generation_mainnet_savings() {
    let response = gateway::generate_vault_address(&GenerateVaultAddressRequest {
        primary_xpub: MAINNET_XPUB.to_string(),
        emergency_xpub: None,
        template: VaultTemplate::savings(),
        vault_index: 0,
        network: Network::Mainnet,
    })
    .unwrap();

    assert!(response.address.starts_with("bc1p"));
    assert_eq!(response.address.len(), 62);
    assert_eq!(response.metadata.delay_blocks, 1008);
    assert_eq!(response.metadata.version, 1);
    assert!(crate::vault::descriptor::parse(&response.descriptor).is_ok());
}

// S2: metadata roundtrip with fixed seed values
#[test]
fn scenario_metadata_roundtrip() {
    let metadata = VaultMetadata {
        version: 1,
        template_id: "savings_v1".to_string(),
        delay_blocks: 1008,
        destination_indices: vec![0, 1],
        recovery_type: RecoveryType::EmergencyKey,
        created_at_block: 830_000,
        vault_index: 42,
    };

    let encoded = metadata.to_bytes().unwrap();
    assert!(encoded.len() < 520);
    assert_eq!(VaultMetadata::from_bytes(&encoded).unwrap(), metadata);
}

// S3: delayed-spend PSBT from a single 100k utxo
#[test]
fn scenario_delayed_spend_psbt() {
    let config = signet_vault(false);
    let result = gateway::build_delayed_spend_psbt(&DelayedSpendRequest {
        intent: SpendIntent {
            vault_id: config.id.clone(),
            destination: destination_address(bitcoin::Network::Signet),
            amount_sats: Some(50_000),
            fee_rate: 5.0,
            path_type: SpendPath::Delayed,
        },
        utxos: vec![fund(&config, 100_000, 1)],
        config,
        current_height: None,
    })
    .unwrap();

    assert!(result.is_valid);
    assert_eq!(result.summary.amount_sats, 50_000);
    assert!(result.summary.fee_sats > 0 && result.summary.fee_sats < 10_000);

    let psbt = Psbt::from_str(&result.psbt_base64).unwrap();
    assert_eq!(psbt.unsigned_tx.output.len(), 1);
    for input in &psbt.unsigned_tx.input {
        assert_eq!(input.sequence.to_consensus_u32(), 1008);
    }
}

// S4: insufficient funds
#[test]
fn scenario_insufficient_funds() {
    let config = signet_vault(false);
    let err = gateway::build_delayed_spend_psbt(&DelayedSpendRequest {
        intent: SpendIntent {
            vault_id: config.id.clone(),
            destination: destination_address(bitcoin::Network::Signet),
            amount_sats: Some(200_000),
            fee_rate: 5.0,
            path_type: SpendPath::Delayed,
        },
        utxos: vec![fund(&config, 60_000, 1), fund(&config, 40_000, 2)],
        config,
        current_height: None,
    })
    .unwrap_err();

    match err {
        VaultError::InsufficientFunds { needed, available } => {
            assert!(needed >= 200_000);
            assert_eq!(available, 100_000);
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }
}

// S5: emergency path is a key-path spend
#[test]
fn scenario_emergency_key_path() {
    let config = signet_vault(true);
    let result = gateway::build_emergency_psbt(&EmergencySpendRequest {
        vault_id: config.id.clone(),
        destination: destination_address(bitcoin::Network::Signet),
        fee_rate: 3.0,
        utxos: vec![fund(&config, 80_000, 1)],
        config: config.clone(),
    })
    .unwrap();

    let psbt = Psbt::from_str(&result.psbt_base64).unwrap();
    for input in &psbt.inputs {
        assert!(input.tap_scripts.is_empty());
        assert!(input.tap_internal_key.is_some());
    }
    for input in &psbt.unsigned_tx.input {
        assert_eq!(input.sequence.to_consensus_u32(), 0xFFFF_FFFE);
    }

    let report = gateway::verify_psbt_policy(&result.psbt_base64, &config).unwrap();
    assert!(report.valid, "policy errors: {:?}", report.errors);
}

// S6: recovery reconstructs the vault at index 7
#[tokio::test]
async fn scenario_recovery_reconstructs_vault() {
    let xpub = signet_xpub(1);
    let metadata = creation_metadata(&VaultTemplate::savings(), 7, false);
    let output = VaultOutput::assemble(&xpub, None, metadata, Network::Signet).unwrap();
    let address = output.address.to_string();
    let spk_hex = crate::encoding::to_hex(output.script_pubkey().as_bytes());

    let utxo = Utxo {
        txid: hex::encode([7u8; 32]),
        vout: 0,
        value_sats: 30_000,
        script_pubkey: spk_hex,
        confirmations: 12,
        block_height: Some(841_000),
    };

    let mut adapter = MemoryChainAdapter::new(841_500);
    adapter.add_utxos(&address, vec![utxo.clone()]);
    adapter.add_witness(&utxo.txid, 0, output.metadata_script.to_bytes());

    let scanner = RecoveryScanner::new(&adapter, Network::Signet);
    let sweep = scanner
        .scan(&xpub, None, 0, 10, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(sweep.vaults.len(), 1);
    assert_eq!(sweep.vaults[0].address, address);
    assert_eq!(sweep.vaults[0].metadata.vault_index, 7);

    let reconstructed = gateway::reconstruct_vault(&ReconstructVaultRequest {
        address: address.clone(),
        utxos: vec![utxo],
        xpub: xpub.clone(),
        emergency_xpub: None,
        network: Network::Signet,
    })
    .unwrap()
    .expect("vault should be found");

    assert_eq!(reconstructed.address, address);
    assert_eq!(reconstructed.metadata.vault_index, 7);

    // regenerating the address from the reconstructed config
    // reproduces the same bytes
    let regenerated = VaultOutput::assemble(
        &reconstructed.primary_xpub,
        None,
        reconstructed.metadata.clone(),
        reconstructed.network,
    )
    .unwrap();
    assert_eq!(regenerated.address.to_string(), address);
}

// invariant: every PSBT the core produces verifies clean against its
// own vault config
#[test]
fn invariant_policy_soundness() {
    let config = signet_vault(true);
    let builder = PsbtBuilder::new(&config).unwrap();
    let utxos = vec![fund(&config, 150_000, 1), fund(&config, 70_000, 2)];

    let delayed = builder
        .build_delayed_spend(
            &SpendIntent {
                vault_id: config.id.clone(),
                destination: destination_address(bitcoin::Network::Signet),
                amount_sats: None,
                fee_rate: 4.0,
                path_type: SpendPath::Delayed,
            },
            &utxos,
            None,
        )
        .unwrap();
    let emergency = builder
        .build_emergency(&destination_address(bitcoin::Network::Signet), 4.0, &utxos)
        .unwrap();
    let cancel = builder
        .build_cancel(&"cd".repeat(32), 9.0, Some(4.0), &utxos)
        .unwrap();

    for built in [&delayed, &emergency, &cancel] {
        let report = gateway::verify_psbt_policy(&built.psbt_base64, &config).unwrap();
        assert!(report.valid, "policy errors: {:?}", report.errors);
        assert!(report.errors.is_empty());

        // no-change invariant: exactly one output, always
        let psbt = Psbt::from_str(&built.psbt_base64).unwrap();
        assert_eq!(psbt.unsigned_tx.output.len(), 1);
    }
}

// invariant: cross-vault PSBTs are rejected by policy verification
#[test]
fn invariant_policy_rejects_foreign_vault() {
    let config_a = signet_vault(false);
    let builder_a = PsbtBuilder::new(&config_a).unwrap();
    let result = builder_a
        .build_delayed_spend(
            &SpendIntent {
                vault_id: config_a.id.clone(),
                destination: destination_address(bitcoin::Network::Signet),
                amount_sats: None,
                fee_rate: 2.0,
                path_type: SpendPath::Delayed,
            },
            &[fund(&config_a, 90_000, 1)],
            None,
        )
        .unwrap();

    // same xpub family, different index: different vault identity
    let primary = signet_xpub(1);
    let metadata = creation_metadata(&VaultTemplate::savings(), 1, false);
    let output = VaultOutput::assemble(&primary, None, metadata, Network::Signet).unwrap();
    let config_b = output.to_config("other vault", &primary, None, 0);

    let report = gateway::verify_psbt_policy(&result.psbt_base64, &config_b).unwrap();
    assert!(!report.valid);
}
