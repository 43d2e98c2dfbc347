//! # Taproot Descriptor Serialization
//!
//! Emits and parses the vault's output descriptor:
//!
//! ```text
//! tr(INTERNAL_KEY,{and_v(v:pk(PRIMARY_KEY),older(DELAY)),raw(METADATA_HEX)})#CHECKSUM
//! ```
//!
//! The spending leaf is miniscript-legal; the OP_RETURN metadata leaf
//! has no miniscript form and is carried as a `raw()` fragment. The
//! checksum is the standard 8-character descriptor checksum, and
//! every descriptor this module emits round-trips through [`parse`].

use std::str::FromStr;

use bitcoin::taproot::TaprootBuilder;
use bitcoin::{Address, XOnlyPublicKey};

use crate::encoding;
use crate::error::{VaultError, VaultResult};
use crate::keys;
use crate::vault::taproot::{metadata_leaf_script, spending_leaf_script};
use crate::vault::types::Network;

const INPUT_CHARSET: &str =
    "0123456789()[],'/*abcdefgh@:$%{}IJKLMNOPQRSTUVWXYZ&+-.;<=>?!^_|~ijklmnopqrstuvwxyzABCDEFGH`#\"\\ ";

const CHECKSUM_CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

fn poly_mod(mut c: u64, val: u64) -> u64 {
    let c0 = c >> 35;
    c = ((c & 0x7_ffff_ffff) << 5) ^ val;
    if c0 & 1 > 0 {
        c ^= 0xf5_dee5_1989;
    }
    if c0 & 2 > 0 {
        c ^= 0xa9_fdca_3312;
    }
    if c0 & 4 > 0 {
        c ^= 0x1b_ab10_e32d;
    }
    if c0 & 8 > 0 {
        c ^= 0x37_06b1_677a;
    }
    if c0 & 16 > 0 {
        c ^= 0x64_4d62_6ffd;
    }
    c
}

/// Compute the 8-character checksum for a descriptor body.
pub fn checksum(body: &str) -> VaultResult<String> {
    let mut c = 1u64;
    let mut cls = 0u64;
    let mut cls_count = 0u8;

    for ch in body.chars() {
        let pos = INPUT_CHARSET
            .find(ch)
            .ok_or_else(|| {
                VaultError::invalid_input(format!("descriptor contains invalid character {:?}", ch))
            })? as u64;
        c = poly_mod(c, pos & 31);
        cls = cls * 3 + (pos >> 5);
        cls_count += 1;
        if cls_count == 3 {
            c = poly_mod(c, cls);
            cls = 0;
            cls_count = 0;
        }
    }
    if cls_count > 0 {
        c = poly_mod(c, cls);
    }
    for _ in 0..8 {
        c = poly_mod(c, 0);
    }
    c ^= 1;

    let mut out = String::with_capacity(8);
    for j in 0..8 {
        let idx = ((c >> (5 * (7 - j))) & 31) as usize;
        out.push(CHECKSUM_CHARSET[idx] as char);
    }
    Ok(out)
}

/// Serialize the vault descriptor with its checksum appended.
pub fn serialize(
    internal_key: &XOnlyPublicKey,
    primary_key: &XOnlyPublicKey,
    delay_blocks: u32,
    metadata_bytes: &[u8],
) -> String {
    let body = format!(
        "tr({},{{and_v(v:pk({}),older({})),raw({})}})",
        internal_key,
        primary_key,
        delay_blocks,
        encoding::to_hex(metadata_bytes)
    );
    // the body alphabet is fixed, so the checksum cannot fail
    let check = checksum(&body).unwrap_or_default();
    format!("{}#{}", body, check)
}

/// Structured form of a parsed vault descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDescriptor {
    pub internal_key: XOnlyPublicKey,
    pub primary_key: XOnlyPublicKey,
    pub delay_blocks: u32,
    pub metadata_bytes: Vec<u8>,
}

impl ParsedDescriptor {
    /// Rebuild the Taproot output this descriptor commits to.
    pub fn derive_address(&self, network: Network) -> VaultResult<Address> {
        let spending = spending_leaf_script(&self.primary_key, self.delay_blocks);
        let metadata = metadata_leaf_script(&self.metadata_bytes)?;

        let spend_info = TaprootBuilder::new()
            .add_leaf(1, spending)
            .and_then(|builder| builder.add_leaf(1, metadata))
            .map_err(|e| VaultError::derivation(format!("taproot tree: {}", e)))?
            .finalize(keys::secp(), self.internal_key)
            .map_err(|_| VaultError::derivation("taproot tree finalization failed"))?;

        Ok(Address::p2tr_tweaked(
            spend_info.output_key(),
            bitcoin::Network::from(network),
        ))
    }
}

/// Split a tree expression at the single top-level comma.
fn split_top_level(tree: &str) -> VaultResult<(&str, &str)> {
    let mut depth = 0usize;
    for (i, ch) in tree.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| VaultError::invalid_input("unbalanced descriptor tree"))?
            }
            ',' if depth == 0 => return Ok((&tree[..i], &tree[i + 1..])),
            _ => {}
        }
    }
    Err(VaultError::invalid_input(
        "descriptor tree is missing its second leaf",
    ))
}

fn parse_key(field: &str, value: &str) -> VaultResult<XOnlyPublicKey> {
    XOnlyPublicKey::from_str(value)
        .map_err(|e| VaultError::invalid_input(format!("{}: {}", field, e)))
}

fn parse_spend_leaf(fragment: &str) -> VaultResult<(XOnlyPublicKey, u32)> {
    let inner = fragment
        .strip_prefix("and_v(v:pk(")
        .ok_or_else(|| VaultError::invalid_input("spending leaf is not and_v(v:pk(..),older(..))"))?;
    let (key_hex, rest) = inner
        .split_once(')')
        .ok_or_else(|| VaultError::invalid_input("spending leaf key is unterminated"))?;
    let delay_str = rest
        .strip_prefix(",older(")
        .and_then(|s| s.strip_suffix("))"))
        .ok_or_else(|| VaultError::invalid_input("spending leaf is missing older(..)"))?;

    let key = parse_key("spending leaf key", key_hex)?;
    let delay = delay_str
        .parse::<u32>()
        .map_err(|e| VaultError::invalid_input(format!("spending leaf delay: {}", e)))?;
    Ok((key, delay))
}

fn parse_raw_leaf(fragment: &str) -> VaultResult<Vec<u8>> {
    let hex = fragment
        .strip_prefix("raw(")
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| VaultError::invalid_input("metadata leaf is not raw(..)"))?;
    encoding::from_hex("metadata leaf", hex)
}

/// Parse a vault descriptor, verifying its checksum.
pub fn parse(descriptor: &str) -> VaultResult<ParsedDescriptor> {
    let (body, check) = descriptor
        .rsplit_once('#')
        .ok_or_else(|| VaultError::invalid_input("descriptor is missing its checksum"))?;
    let expected = checksum(body)?;
    if check != expected {
        return Err(VaultError::invalid_input(format!(
            "descriptor checksum mismatch: expected {}, got {}",
            expected, check
        )));
    }

    let inner = body
        .strip_prefix("tr(")
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| VaultError::invalid_input("descriptor is not tr(..)"))?;
    let (internal_hex, tree) = inner
        .split_once(',')
        .ok_or_else(|| VaultError::invalid_input("descriptor has no script tree"))?;
    let internal_key = parse_key("internal key", internal_hex)?;

    let tree = tree
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| VaultError::invalid_input("descriptor tree is not braced"))?;
    let (first, second) = split_top_level(tree)?;

    // we emit the spending leaf first, but accept either order
    let (spend_fragment, raw_fragment) = if first.starts_with("and_v(") {
        (first, second)
    } else {
        (second, first)
    };
    let (primary_key, delay_blocks) = parse_spend_leaf(spend_fragment)?;
    let metadata_bytes = parse_raw_leaf(raw_fragment)?;

    Ok(ParsedDescriptor {
        internal_key,
        primary_key,
        delay_blocks,
        metadata_bytes,
    })
}
