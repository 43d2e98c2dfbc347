//! # Vault Data Model
//!
//! Value types shared by every pipeline. Entities are created by the
//! core, handed to the caller, and never mutated afterwards; the
//! caller owns persistence.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config;
use crate::error::{VaultError, VaultResult};
use crate::vault::metadata::VaultMetadata;

/// Bitcoin network selection
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Mainnet = 0,
    Testnet = 1,
    Signet = 2,
    Regtest = 3,
}

impl From<Network> for bitcoin::Network {
    fn from(n: Network) -> Self {
        match n {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

impl TryFrom<i32> for Network {
    type Error = VaultError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Network::Mainnet),
            1 => Ok(Network::Testnet),
            2 => Ok(Network::Signet),
            3 => Ok(Network::Regtest),
            _ => Err(VaultError::invalid_input(format!(
                "invalid network value: {}",
                value
            ))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        };
        write!(f, "{}", name)
    }
}

impl Network {
    /// Whether xpubs for this network use mainnet version bytes
    pub fn is_mainnet(&self) -> bool {
        matches!(self, Network::Mainnet)
    }
}

/// Pre-defined vault security templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VaultTemplate {
    #[serde(rename = "savings")]
    Savings {
        #[serde(default = "default_savings_delay")]
        delay_blocks: u32,
    },

    #[serde(rename = "spending")]
    Spending {
        #[serde(default = "default_spending_delay")]
        delay_blocks: u32,
    },

    #[serde(rename = "custom")]
    Custom {
        delay_blocks: u32,
        recovery_type: RecoveryType,
    },
}

fn default_savings_delay() -> u32 {
    config::vault::SAVINGS_DELAY_BLOCKS
}

fn default_spending_delay() -> u32 {
    config::vault::SPENDING_DELAY_BLOCKS
}

impl VaultTemplate {
    pub fn savings() -> Self {
        VaultTemplate::Savings {
            delay_blocks: config::vault::SAVINGS_DELAY_BLOCKS,
        }
    }

    pub fn spending() -> Self {
        VaultTemplate::Spending {
            delay_blocks: config::vault::SPENDING_DELAY_BLOCKS,
        }
    }

    pub fn delay_blocks(&self) -> u32 {
        match self {
            VaultTemplate::Savings { delay_blocks } => *delay_blocks,
            VaultTemplate::Spending { delay_blocks } => *delay_blocks,
            VaultTemplate::Custom { delay_blocks, .. } => *delay_blocks,
        }
    }

    pub fn template_id(&self) -> &str {
        match self {
            VaultTemplate::Savings { .. } => "savings_v1",
            VaultTemplate::Spending { .. } => "spending_v1",
            VaultTemplate::Custom { .. } => "custom_v1",
        }
    }

    /// Recovery mechanism implied by the template.
    ///
    /// The savings and spending templates resolve to `EmergencyKey`
    /// when an emergency xpub was supplied and `TimelockOnly`
    /// otherwise; custom templates carry their own choice.
    pub fn recovery_type(&self, has_emergency_key: bool) -> RecoveryType {
        match self {
            VaultTemplate::Custom { recovery_type, .. } => *recovery_type,
            _ if has_emergency_key => RecoveryType::EmergencyKey,
            _ => RecoveryType::TimelockOnly,
        }
    }

    /// The closed set of templates a recovery sweep derives candidate
    /// addresses for.
    pub fn known() -> Vec<VaultTemplate> {
        vec![VaultTemplate::savings(), VaultTemplate::spending()]
    }
}

/// Recovery mechanism type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryType {
    EmergencyKey,
    TimelockOnly,
    MultiSig { threshold: u8, total: u8 },
}

/// Spending path through a vault output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendPath {
    /// Script-path spend through the CSV-delayed leaf
    Delayed,
    /// Key-path spend through the emergency internal key
    Emergency,
}

impl fmt::Display for SpendPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpendPath::Delayed => write!(f, "delayed"),
            SpendPath::Emergency => write!(f, "emergency"),
        }
    }
}

/// An unspent output funding a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Funding transaction id (64 hex characters)
    pub txid: String,
    /// Output index within the funding transaction
    pub vout: u32,
    /// Output value in satoshis
    pub value_sats: u64,
    /// Output script, hex-encoded
    pub script_pubkey: String,
    /// Confirmation count at query time
    pub confirmations: u32,
    /// Block height of the funding transaction, if confirmed
    pub block_height: Option<u32>,
}

impl Utxo {
    /// Validate the structural invariants: 32-byte txid, positive value.
    pub fn validate(&self) -> VaultResult<()> {
        if self.value_sats == 0 {
            return Err(VaultError::invalid_input(format!(
                "utxo {}:{} has zero value",
                self.txid, self.vout
            )));
        }
        Txid::from_str(&self.txid)
            .map_err(|e| VaultError::invalid_input(format!("utxo txid: {}", e)))?;
        Ok(())
    }

    pub fn outpoint(&self) -> VaultResult<OutPoint> {
        let txid = Txid::from_str(&self.txid)
            .map_err(|e| VaultError::invalid_input(format!("utxo txid: {}", e)))?;
        Ok(OutPoint::new(txid, self.vout))
    }

    pub fn script(&self) -> VaultResult<ScriptBuf> {
        let bytes = crate::encoding::from_hex("utxo script_pubkey", &self.script_pubkey)?;
        Ok(ScriptBuf::from_bytes(bytes))
    }

    /// Oldest-first ordering key: confirmed before unconfirmed, then
    /// by block height, txid, vout.
    pub fn age_key(&self) -> (u32, String, u32) {
        (
            self.block_height.unwrap_or(u32::MAX),
            self.txid.clone(),
            self.vout,
        )
    }
}

/// A request to spend from a vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendIntent {
    /// Identity of the vault being spent
    pub vault_id: String,
    /// Destination address string
    pub destination: String,
    /// Amount to send; `None` sweeps everything minus fees
    pub amount_sats: Option<u64>,
    /// Fee rate in sat/vB
    pub fee_rate: f64,
    /// Which spending path to take
    pub path_type: SpendPath,
}

/// Human-auditable summary of a built PSBT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendSummary {
    /// Vault address being spent from
    pub from_address: String,
    /// Destination address
    pub to_address: String,
    /// Value of the destination output in satoshis
    pub amount_sats: u64,
    /// Estimated fee in satoshis at the requested rate
    pub fee_sats: u64,
    /// Spending path
    pub path: SpendPath,
    /// CSV delay enforced on the inputs, for delayed spends
    pub delay_blocks: Option<u32>,
    /// Height at which the delayed spend becomes broadcastable
    pub estimated_unlock_height: Option<u32>,
}

/// A built PSBT plus its audit summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsbtData {
    /// BIP174 PSBT, base64-encoded
    pub psbt_base64: String,
    /// Audit summary for display to the user
    pub summary: SpendSummary,
    /// Whether the PSBT passed self-verification against its vault
    pub is_valid: bool,
    /// Non-fatal observations (unusually high implied fee, etc.)
    pub warnings: Vec<String>,
}

/// Logical identity of a vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Hash of the vault's script pubkey, hex-encoded
    pub id: String,
    /// Display name chosen by the caller
    pub name: String,
    /// Security template the vault was created from
    pub template: VaultTemplate,
    /// Account-level xpub controlling the delayed path
    pub primary_xpub: String,
    /// Optional xpub controlling the emergency key path
    pub emergency_xpub: Option<String>,
    /// Network the vault lives on
    pub network: Network,
    /// Taproot output descriptor with checksum
    pub descriptor: String,
    /// Bech32m vault address
    pub address: String,
    /// Metadata committed to the Taproot tree
    pub metadata: VaultMetadata,
    /// Block height recorded at creation (0 when unknown)
    pub created_at_block: u32,
}

/// Vault identity derived from an output script: SHA-256 of the
/// script pubkey bytes, hex-encoded.
pub fn vault_id_for_script(script_pubkey: &ScriptBuf) -> String {
    let digest = sha256::Hash::hash(script_pubkey.as_bytes());
    digest.to_string()
}
