//! # Taproot Output Assembly
//!
//! Builds the vault's Taproot output: a depth-1 script tree holding
//! the CSV-delayed spending leaf and the provably-unspendable
//! metadata leaf, committed under either the emergency key (immediate
//! key-path recovery) or a salted NUMS point (script-path only).
//!
//! ## Script Tree Structure
//! ```text
//! Root
//! ├── Leaf: <primary_key> OP_CHECKSIGVERIFY <delay> OP_CSV
//! └── Leaf: OP_RETURN <encoded metadata>
//! ```
//!
//! The metadata leaf can never be spent (OP_RETURN fails immediately)
//! but its bytes are committed to the Merkle root, so revealing the
//! leaf reconstructs the vault configuration from the UTXO alone.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::opcodes::all::{OP_CHECKSIGVERIFY, OP_CSV, OP_RETURN};
use bitcoin::script::{Builder, Instruction, PushBytesBuf, Script};
use bitcoin::secp256k1::Scalar;
use bitcoin::taproot::{
    ControlBlock, LeafVersion, TapLeafHash, TapNodeHash, TaprootBuilder, TaprootSpendInfo,
};
use bitcoin::{Address, ScriptBuf, XOnlyPublicKey};

use crate::config;
use crate::error::{VaultError, VaultResult};
use crate::keys;
use crate::vault::descriptor;
use crate::vault::metadata::VaultMetadata;
use crate::vault::types::{vault_id_for_script, Network, RecoveryType, VaultConfig, VaultTemplate};

/// The BIP341 NUMS point: SHA-256 of the standard generator encoding,
/// lifted to a curve point. No discrete logarithm is known for it, so
/// an output keyed to it has no usable key path.
pub const NUMS_POINT_BYTES: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a,
    0x5e, 0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80,
    0x3a, 0xc0,
];

fn nums_point() -> VaultResult<XOnlyPublicKey> {
    XOnlyPublicKey::from_slice(&NUMS_POINT_BYTES)
        .map_err(|e| VaultError::derivation(format!("NUMS point: {}", e)))
}

/// A provably-unspendable internal key: the NUMS point tweaked with a
/// salt derived from the encoded metadata.
///
/// The salt is the SHA-256 of the metadata bytes, so anyone holding
/// the metadata can recompute the key and verify the key path is
/// unusable, while the derivation stays byte-for-byte deterministic.
pub fn unspendable_internal_key(metadata_bytes: &[u8]) -> VaultResult<XOnlyPublicKey> {
    let salt = sha256::Hash::hash(metadata_bytes);
    let tweak = Scalar::from_be_bytes(salt.to_byte_array())
        .map_err(|e| VaultError::derivation(format!("metadata salt out of range: {}", e)))?;
    let (tweaked, _parity) = nums_point()?
        .add_tweak(keys::secp(), &tweak)
        .map_err(|e| VaultError::derivation(format!("NUMS tweak: {}", e)))?;
    Ok(tweaked)
}

/// Build the CSV-delayed spending leaf.
///
/// Script: `<key> OP_CHECKSIGVERIFY <delay> OP_CSV`. CHECKSIGVERIFY
/// consumes the signature and aborts on failure; OP_CSV then enforces
/// that the input's nSequence satisfies the BIP68 relative timelock
/// (block-based, minimally-encoded CScriptNum).
pub fn spending_leaf_script(primary_key: &XOnlyPublicKey, delay_blocks: u32) -> ScriptBuf {
    Builder::new()
        .push_x_only_key(primary_key)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(delay_blocks as i64)
        .push_opcode(OP_CSV)
        .into_script()
}

/// Build the provably-unspendable metadata leaf: `OP_RETURN <bytes>`.
pub fn metadata_leaf_script(metadata_bytes: &[u8]) -> VaultResult<ScriptBuf> {
    let push = PushBytesBuf::try_from(metadata_bytes.to_vec())
        .map_err(|_| VaultError::MetadataEncodeTooLong {
            message: format!("{} bytes exceed the script push limit", metadata_bytes.len()),
        })?;
    Ok(Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(push)
        .into_script())
}

/// Decode the metadata payload out of a metadata leaf script.
pub fn decode_metadata_leaf(script: &Script) -> VaultResult<VaultMetadata> {
    let mut instructions = script.instructions();

    match instructions.next() {
        Some(Ok(Instruction::Op(op))) if op == OP_RETURN => {}
        _ => {
            return Err(VaultError::metadata(
                "metadata leaf does not start with OP_RETURN",
            ))
        }
    }

    let payload = match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) => bytes.as_bytes().to_vec(),
        _ => return Err(VaultError::metadata("metadata leaf has no data push")),
    };

    if instructions.next().is_some() {
        return Err(VaultError::metadata(
            "metadata leaf has trailing instructions",
        ));
    }

    VaultMetadata::from_bytes(&payload)
}

/// Canonical creation-time metadata for a template at an index.
///
/// The core has no chain access when an address is generated, so
/// `created_at_block` is 0 and the destination list is empty; these
/// are exactly the values a recovery sweep assumes when it re-derives
/// candidate addresses.
pub fn creation_metadata(
    template: &VaultTemplate,
    vault_index: u32,
    has_emergency_key: bool,
) -> VaultMetadata {
    VaultMetadata {
        version: config::vault::METADATA_VERSION,
        template_id: template.template_id().to_string(),
        delay_blocks: template.delay_blocks(),
        destination_indices: Vec::new(),
        recovery_type: template.recovery_type(has_emergency_key),
        created_at_block: 0,
        vault_index,
    }
}

/// A fully assembled vault output: keys, leaves, tree, and address.
#[derive(Debug, Clone)]
pub struct VaultOutput {
    /// X-only key the Taproot output key is tweaked from
    pub internal_key: XOnlyPublicKey,
    /// Primary key appearing in the spending leaf
    pub primary_key: XOnlyPublicKey,
    /// Emergency key, when an emergency xpub was supplied
    pub emergency_key: Option<XOnlyPublicKey>,
    /// CSV-delayed spending leaf
    pub spending_script: ScriptBuf,
    /// OP_RETURN metadata leaf
    pub metadata_script: ScriptBuf,
    /// Finalized tree with output key and Merkle data
    pub spend_info: TaprootSpendInfo,
    /// Bech32m vault address
    pub address: Address,
    /// Metadata committed through the metadata leaf
    pub metadata: VaultMetadata,
    /// Encoded metadata bytes as committed
    pub metadata_bytes: Vec<u8>,
    /// Network the output targets
    pub network: Network,
}

impl VaultOutput {
    /// Assemble the Taproot output for a vault.
    ///
    /// Deterministic: for fixed (primary xpub, emergency xpub,
    /// metadata, network) every call produces byte-identical scripts,
    /// keys, and address.
    pub fn assemble(
        primary_xpub: &str,
        emergency_xpub: Option<&str>,
        metadata: VaultMetadata,
        network: Network,
    ) -> VaultResult<Self> {
        config::validation::validate_delay_blocks(metadata.delay_blocks)?;

        let primary = keys::parse_xpub(primary_xpub, network)?;
        let primary_key = keys::derive_vault_key(&primary, metadata.vault_index)?;

        let emergency_key = match emergency_xpub {
            Some(xpub) => {
                let parsed = keys::parse_xpub(xpub, network)?;
                Some(keys::derive_vault_key(&parsed, metadata.vault_index)?)
            }
            None => None,
        };

        let metadata_bytes = metadata.to_bytes()?;
        let spending_script = spending_leaf_script(&primary_key, metadata.delay_blocks);
        let metadata_script = metadata_leaf_script(&metadata_bytes)?;

        // Emergency recovery keeps the key path live; everything else
        // commits to a verifiably unspendable internal key.
        let internal_key = match (metadata.recovery_type, emergency_key) {
            (RecoveryType::EmergencyKey, Some(key)) => key,
            _ => unspendable_internal_key(&metadata_bytes)?,
        };

        let spend_info = TaprootBuilder::new()
            .add_leaf(1, spending_script.clone())
            .and_then(|builder| builder.add_leaf(1, metadata_script.clone()))
            .map_err(|e| VaultError::derivation(format!("taproot tree: {}", e)))?
            .finalize(keys::secp(), internal_key)
            .map_err(|_| VaultError::derivation("taproot tree finalization failed"))?;

        let address = Address::p2tr_tweaked(spend_info.output_key(), bitcoin::Network::from(network));

        Ok(VaultOutput {
            internal_key,
            primary_key,
            emergency_key,
            spending_script,
            metadata_script,
            spend_info,
            address,
            metadata,
            metadata_bytes,
            network,
        })
    }

    /// The vault's output script.
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    /// Vault identity: hash of the output script.
    pub fn vault_id(&self) -> String {
        vault_id_for_script(&self.script_pubkey())
    }

    /// Merkle root of the two-leaf tree.
    pub fn merkle_root(&self) -> VaultResult<TapNodeHash> {
        self.spend_info
            .merkle_root()
            .ok_or_else(|| VaultError::derivation("script tree has no merkle root"))
    }

    /// Tap leaf hash of the spending leaf.
    pub fn spending_leaf_hash(&self) -> TapLeafHash {
        TapLeafHash::from_script(&self.spending_script, LeafVersion::TapScript)
    }

    /// Control block proving the spending leaf's tree membership.
    pub fn control_block(&self) -> VaultResult<ControlBlock> {
        self.spend_info
            .control_block(&(self.spending_script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| VaultError::derivation("no control block for spending leaf"))
    }

    /// Taproot descriptor with checksum.
    pub fn descriptor(&self) -> String {
        descriptor::serialize(
            &self.internal_key,
            &self.primary_key,
            self.metadata.delay_blocks,
            &self.metadata_bytes,
        )
    }

    /// Wrap this output into the caller-owned vault identity.
    pub fn to_config(
        &self,
        name: impl Into<String>,
        primary_xpub: &str,
        emergency_xpub: Option<&str>,
        created_at_block: u32,
    ) -> VaultConfig {
        VaultConfig {
            id: self.vault_id(),
            name: name.into(),
            template: self.metadata.template(),
            primary_xpub: primary_xpub.to_string(),
            emergency_xpub: emergency_xpub.map(str::to_string),
            network: self.network,
            descriptor: self.descriptor(),
            address: self.address.to_string(),
            metadata: self.metadata.clone(),
            created_at_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::types::VaultTemplate;
    use bitcoin::bip32::{Xpriv, Xpub};

    pub const MAINNET_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    fn signet_xpub(seed_byte: u8) -> String {
        let master = Xpriv::new_master(bitcoin::Network::Signet, &[seed_byte; 32]).unwrap();
        Xpub::from_priv(keys::secp(), &master).to_string()
    }

    fn assemble_savings(index: u32) -> VaultOutput {
        let metadata = creation_metadata(&VaultTemplate::savings(), index, false);
        VaultOutput::assemble(MAINNET_XPUB, None, metadata, Network::Mainnet).unwrap()
    }

    #[test]
    fn test_mainnet_savings_address_shape() {
        let output = assemble_savings(0);
        let address = output.address.to_string();
        assert!(address.starts_with("bc1p"));
        assert_eq!(address.len(), 62);
        assert_eq!(output.metadata.delay_blocks, 1008);
        assert_eq!(output.metadata.version, 1);
    }

    #[test]
    fn test_address_is_deterministic() {
        let a = assemble_savings(3);
        let b = assemble_savings(3);
        assert_eq!(a.address, b.address);
        assert_eq!(a.descriptor(), b.descriptor());
        assert_eq!(a.spending_script, b.spending_script);
        assert_eq!(a.internal_key, b.internal_key);
    }

    #[test]
    fn test_distinct_indices_distinct_addresses() {
        let a = assemble_savings(0);
        let b = assemble_savings(1);
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn test_spending_leaf_layout() {
        let output = assemble_savings(0);
        let bytes = output.spending_script.as_bytes();
        // 32-byte key push, CHECKSIGVERIFY, minimal 1008 push, CSV
        assert_eq!(bytes[0], 0x20);
        assert_eq!(bytes[33], OP_CHECKSIGVERIFY.to_u8());
        assert_eq!(&bytes[34..37], &[0x02, 0xf0, 0x03]);
        assert_eq!(bytes[37], OP_CSV.to_u8());
        assert_eq!(bytes.len(), 38);
    }

    #[test]
    fn test_metadata_leaf_roundtrip() {
        let output = assemble_savings(7);
        let decoded = decode_metadata_leaf(&output.metadata_script).unwrap();
        assert_eq!(decoded, output.metadata);
        assert_eq!(decoded.vault_index, 7);
    }

    #[test]
    fn test_decode_rejects_non_metadata_scripts() {
        let output = assemble_savings(0);
        assert!(decode_metadata_leaf(&output.spending_script).is_err());
        assert!(decode_metadata_leaf(Script::from_bytes(&[])).is_err());
    }

    #[test]
    fn test_emergency_key_becomes_internal_key() {
        let emergency = signet_xpub(9);
        let primary = signet_xpub(1);
        let metadata = creation_metadata(&VaultTemplate::savings(), 0, true);
        let output =
            VaultOutput::assemble(&primary, Some(&emergency), metadata, Network::Signet).unwrap();

        assert_eq!(output.internal_key, output.emergency_key.unwrap());
        assert!(output.address.to_string().starts_with("tb1p"));
    }

    #[test]
    fn test_without_emergency_key_internal_key_is_salted_nums() {
        let output = assemble_savings(0);
        let expected = unspendable_internal_key(&output.metadata_bytes).unwrap();
        assert_eq!(output.internal_key, expected);
        assert_ne!(
            output.internal_key,
            XOnlyPublicKey::from_slice(&NUMS_POINT_BYTES).unwrap()
        );
    }

    #[test]
    fn test_delay_below_policy_minimum_rejected() {
        let template = VaultTemplate::Custom {
            delay_blocks: 10,
            recovery_type: crate::vault::types::RecoveryType::TimelockOnly,
        };
        let metadata = creation_metadata(&template, 0, false);
        let err =
            VaultOutput::assemble(MAINNET_XPUB, None, metadata, Network::Mainnet).unwrap_err();
        assert_eq!(err.code(), 4002);
    }

    #[test]
    fn test_control_block_commits_spending_leaf() {
        let output = assemble_savings(0);
        let control = output.control_block().unwrap();
        assert_eq!(control.serialize().len(), 65);

        let spk = output.script_pubkey();
        let program = XOnlyPublicKey::from_slice(&spk.as_bytes()[2..34]).unwrap();
        assert!(control.verify_taproot_commitment(
            keys::secp(),
            program,
            &output.spending_script
        ));
    }
}
