//! # Key Derivation
//!
//! BIP32 handling for the vault core. The account-level derivation
//! (`m/86'/coin'/0'`) is performed by the hardware signer before the
//! xpub is exported; this module only parses the exported xpub,
//! derives the non-hardened `0/vault_index` child, and projects it to
//! the x-only form used by BIP341.

use std::str::FromStr;
use std::sync::OnceLock;

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpub};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{NetworkKind, XOnlyPublicKey};

use crate::error::{VaultError, VaultResult};
use crate::vault::types::Network;

static SECP: OnceLock<Secp256k1<All>> = OnceLock::new();

/// Process-wide secp256k1 context, initialized on first use and
/// immutable thereafter.
pub fn secp() -> &'static Secp256k1<All> {
    SECP.get_or_init(Secp256k1::new)
}

/// Parse an extended public key and check it against the requested
/// network's version bytes.
pub fn parse_xpub(xpub: &str, network: Network) -> VaultResult<Xpub> {
    let parsed = Xpub::from_str(xpub).map_err(|e| VaultError::invalid_xpub(e.to_string()))?;

    let expected = if network.is_mainnet() {
        NetworkKind::Main
    } else {
        NetworkKind::Test
    };
    if parsed.network != expected {
        let actual = match parsed.network {
            NetworkKind::Main => "mainnet",
            NetworkKind::Test => "testnet",
        };
        return Err(VaultError::NetworkMismatch {
            expected: network.to_string(),
            actual: actual.to_string(),
        });
    }

    Ok(parsed)
}

/// The non-hardened child path `0/vault_index` below the account xpub.
pub fn vault_child_path(vault_index: u32) -> VaultResult<DerivationPath> {
    let children = vec![
        ChildNumber::from_normal_idx(0)
            .map_err(|e| VaultError::derivation(format!("external chain index: {}", e)))?,
        ChildNumber::from_normal_idx(vault_index)
            .map_err(|e| VaultError::derivation(format!("vault index {}: {}", vault_index, e)))?,
    ];
    Ok(DerivationPath::from(children))
}

/// Derive the x-only vault key at `0/vault_index`.
///
/// Same inputs produce byte-identical output; this is what makes
/// addresses recoverable from the xpub alone.
pub fn derive_vault_key(xpub: &Xpub, vault_index: u32) -> VaultResult<XOnlyPublicKey> {
    let path = vault_child_path(vault_index)?;
    let child = xpub
        .derive_pub(secp(), &path)
        .map_err(|e| VaultError::derivation(format!("child 0/{}: {}", vault_index, e)))?;
    Ok(child.to_x_only_pub())
}

/// Key-origin information for PSBT annotation: the account xpub's
/// fingerprint plus the relative child path.
pub fn key_origin(xpub: &Xpub, vault_index: u32) -> VaultResult<(Fingerprint, DerivationPath)> {
    Ok((xpub.fingerprint(), vault_child_path(vault_index)?))
}
