//! # Vault Metadata Codec
//!
//! `VaultMetadata` is the self-describing recovery payload committed
//! to the Taproot tree through the OP_RETURN leaf. The wire format is
//! version-prefixed, little-endian, and small enough to fit a single
//! script push, so a vault can be reconstructed from its UTXO alone.

use serde::{Deserialize, Serialize};

use crate::config;
use crate::encoding::{ByteReader, ByteWriter};
use crate::error::{VaultError, VaultResult};
use crate::vault::types::{RecoveryType, VaultTemplate};

/// Metadata encoded in the Taproot metadata leaf for recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMetadata {
    /// Schema version for future compatibility
    pub version: u8,

    /// Template identifier, e.g. `"savings_v1"`
    pub template_id: String,

    /// Delay in blocks; matches the spending leaf's CSV value
    pub delay_blocks: u32,

    /// Indices into the caller's approved destinations list
    pub destination_indices: Vec<u8>,

    /// Recovery mechanism type
    pub recovery_type: RecoveryType,

    /// Block height at creation (0 when the core had no chain access)
    pub created_at_block: u32,

    /// BIP32 derivation index for this vault
    pub vault_index: u32,
}

impl VaultMetadata {
    /// Encode to the wire format.
    ///
    /// Layout: version u8, template_id (u8 len + bytes), delay u32le,
    /// destination_indices (u8 count + bytes), recovery discriminant
    /// u8 (+ threshold/total for multisig), created_at_block u32le,
    /// vault_index u32le.
    pub fn to_bytes(&self) -> VaultResult<Vec<u8>> {
        let mut writer = ByteWriter::new();

        writer.push_u8(self.version);
        writer.push_str_u8("template_id", &self.template_id)?;
        writer.push_u32_le(self.delay_blocks);
        writer.push_bytes_u8("destination_indices", &self.destination_indices)?;

        match self.recovery_type {
            RecoveryType::EmergencyKey => writer.push_u8(0),
            RecoveryType::TimelockOnly => writer.push_u8(1),
            RecoveryType::MultiSig { threshold, total } => {
                writer.push_u8(2);
                writer.push_u8(threshold);
                writer.push_u8(total);
            }
        }

        writer.push_u32_le(self.created_at_block);
        writer.push_u32_le(self.vault_index);

        let bytes = writer.into_bytes();
        if bytes.len() >= config::vault::MAX_METADATA_BYTES {
            return Err(VaultError::MetadataEncodeTooLong {
                message: format!(
                    "encoded metadata is {} bytes, script push limit is {}",
                    bytes.len(),
                    config::vault::MAX_METADATA_BYTES
                ),
            });
        }
        Ok(bytes)
    }

    /// Decode from the wire format.
    pub fn from_bytes(data: &[u8]) -> VaultResult<Self> {
        if data.is_empty() {
            return Err(VaultError::metadata("empty metadata bytes"));
        }

        let mut reader = ByteReader::new(data);

        let version = reader.read_u8("version")?;
        if version != config::vault::METADATA_VERSION {
            return Err(VaultError::metadata(format!(
                "unsupported metadata version {}",
                version
            )));
        }

        let template_id = reader.read_str_u8("template_id")?;
        let delay_blocks = reader.read_u32_le("delay_blocks")?;
        let destination_indices = reader.read_bytes_u8("destination_indices")?.to_vec();

        let recovery_type = match reader.read_u8("recovery_type")? {
            0 => RecoveryType::EmergencyKey,
            1 => RecoveryType::TimelockOnly,
            2 => RecoveryType::MultiSig {
                threshold: reader.read_u8("multisig threshold")?,
                total: reader.read_u8("multisig total")?,
            },
            v => {
                return Err(VaultError::metadata(format!(
                    "unknown recovery_type discriminant {}",
                    v
                )))
            }
        };

        let created_at_block = reader.read_u32_le("created_at_block")?;
        let vault_index = reader.read_u32_le("vault_index")?;

        if reader.remaining() != 0 {
            return Err(VaultError::metadata(format!(
                "{} trailing bytes after metadata",
                reader.remaining()
            )));
        }

        Ok(VaultMetadata {
            version,
            template_id,
            delay_blocks,
            destination_indices,
            recovery_type,
            created_at_block,
            vault_index,
        })
    }

    /// Reconstruct the template this metadata was created from.
    /// Unknown template ids fall back to a custom template carrying
    /// the committed delay and recovery type.
    pub fn template(&self) -> VaultTemplate {
        match self.template_id.as_str() {
            "savings_v1" => VaultTemplate::Savings {
                delay_blocks: self.delay_blocks,
            },
            "spending_v1" => VaultTemplate::Spending {
                delay_blocks: self.delay_blocks,
            },
            _ => VaultTemplate::Custom {
                delay_blocks: self.delay_blocks,
                recovery_type: self.recovery_type,
            },
        }
    }
}
