//! # Deterministic Recovery Scanner
//!
//! Re-derives the universe of possible vault addresses from an xpub
//! alone and matches them against on-chain state through the injected
//! chain adapter. On a hit, the vault configuration is reconstructed
//! from the candidate's committed metadata, optionally enriched by
//! reading back the metadata leaf from witness data.
//!
//! The sweep itself is pure: all I/O goes through [`ChainAdapter`],
//! transient failures are retried with backoff, per-address failures
//! are aggregated without aborting, and the result is sorted by
//! vault index so repeated runs are byte-identical.

use bitcoin::Script;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{VaultError, VaultResult};
use crate::keys;
use crate::services::chain::{with_retry, CancelToken, ChainAdapter};
use crate::vault::taproot::{creation_metadata, decode_metadata_leaf, VaultOutput};
use crate::vault::types::{Network, Utxo, VaultConfig, VaultTemplate};

/// One derived candidate address for external scanning tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanAddressEntry {
    pub index: u32,
    pub template_id: String,
    /// Whether this candidate uses the emergency key as its Taproot
    /// internal key (as opposed to the salted-NUMS form)
    pub emergency: bool,
    pub address: String,
    pub descriptor: String,
}

/// Key arrangements to try for one template: the salted-NUMS form
/// always, plus the emergency-keyed form when an emergency xpub is
/// available. A vault created with an emergency xpub commits that key
/// as its Taproot internal key, so its address only matches the
/// second arrangement.
fn candidate_variants(emergency_xpub: Option<&str>) -> Vec<(bool, Option<&str>)> {
    match emergency_xpub {
        Some(xpub) => vec![(false, None), (true, Some(xpub))],
        None => vec![(false, None)],
    }
}

/// Terminal disposition of a single candidate index.
///
/// Lifecycle: `Pending → Queried → (Empty | Found | TransientError |
/// PermanentError)`. Terminal states are entered on the first
/// transition out of `Queried`; there are no back-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    Pending,
    Queried,
    Empty,
    Found,
    TransientError,
    PermanentError,
}

/// How a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    Cancelled,
}

/// A per-address failure recorded during a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFailure {
    pub vault_index: u32,
    pub address: String,
    pub error: String,
}

/// Result of a recovery sweep. A cancelled sweep still carries every
/// vault confirmed before the token fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySweep {
    pub vaults: Vec<VaultConfig>,
    pub failures: Vec<ScanFailure>,
    pub status: ScanStatus,
    pub tip_height: Option<u32>,
}

/// Derive candidate addresses for every known template over a window
/// of indices. When an emergency xpub is supplied, each index and
/// template is also derived in its emergency-keyed form.
pub fn derive_scan_addresses(
    xpub: &str,
    emergency_xpub: Option<&str>,
    start_index: u32,
    count: u32,
    network: Network,
) -> VaultResult<Vec<ScanAddressEntry>> {
    keys::parse_xpub(xpub, network)?;
    if let Some(emergency) = emergency_xpub {
        keys::parse_xpub(emergency, network)?;
    }
    let end = start_index
        .checked_add(count)
        .ok_or_else(|| VaultError::invalid_input("scan window overflows the index space"))?;

    let mut entries = Vec::new();
    for index in start_index..end {
        for template in VaultTemplate::known() {
            for (has_emergency, emergency) in candidate_variants(emergency_xpub) {
                let metadata = creation_metadata(&template, index, has_emergency);
                let output = VaultOutput::assemble(xpub, emergency, metadata, network)?;
                entries.push(ScanAddressEntry {
                    index,
                    template_id: template.template_id().to_string(),
                    emergency: has_emergency,
                    address: output.address.to_string(),
                    descriptor: output.descriptor(),
                });
            }
        }
    }
    Ok(entries)
}

/// Match a single address back to its vault by re-deriving candidates
/// until one reproduces it. Returns `None` when no index within the
/// reconstruction limit matches.
pub fn reconstruct_vault(
    address: &str,
    utxos: &[Utxo],
    xpub: &str,
    emergency_xpub: Option<&str>,
    network: Network,
) -> VaultResult<Option<VaultConfig>> {
    keys::parse_xpub(xpub, network)?;
    if let Some(emergency) = emergency_xpub {
        keys::parse_xpub(emergency, network)?;
    }

    for index in 0..config::scan::RECONSTRUCT_INDEX_LIMIT {
        for template in VaultTemplate::known() {
            for (has_emergency, emergency) in candidate_variants(emergency_xpub) {
                let metadata = creation_metadata(&template, index, has_emergency);
                let output = VaultOutput::assemble(xpub, emergency, metadata, network)?;
                if output.address.to_string() == address {
                    let created_at = earliest_height(utxos);
                    return Ok(Some(output.to_config(
                        "recovered vault",
                        xpub,
                        emergency,
                        created_at,
                    )));
                }
            }
        }
    }
    Ok(None)
}

fn earliest_height(utxos: &[Utxo]) -> u32 {
    utxos
        .iter()
        .filter_map(|u| u.block_height)
        .min()
        .unwrap_or(0)
}

/// Scans a window of derivation indices against a chain adapter.
pub struct RecoveryScanner<'a, A: ChainAdapter> {
    adapter: &'a A,
    network: Network,
}

impl<'a, A: ChainAdapter> RecoveryScanner<'a, A> {
    pub fn new(adapter: &'a A, network: Network) -> Self {
        Self { adapter, network }
    }

    /// Sweep `[start_index, start_index + count)`.
    ///
    /// The cancellation token is checked between per-index queries;
    /// cancellation keeps all progress and flips the status.
    pub async fn scan(
        &self,
        xpub: &str,
        emergency_xpub: Option<&str>,
        start_index: u32,
        count: u32,
        cancel: &CancelToken,
    ) -> VaultResult<RecoverySweep> {
        keys::parse_xpub(xpub, self.network)?;
        if let Some(emergency) = emergency_xpub {
            keys::parse_xpub(emergency, self.network)?;
        }
        let end = start_index
            .checked_add(count)
            .ok_or_else(|| VaultError::invalid_input("scan window overflows the index space"))?;

        let tip_height = with_retry("get_tip_height", || self.adapter.get_tip_height())
            .await
            .ok();

        let mut vaults = Vec::new();
        let mut failures = Vec::new();
        let mut status = ScanStatus::Completed;

        'window: for index in start_index..end {
            for template in VaultTemplate::known() {
                for (has_emergency, emergency) in candidate_variants(emergency_xpub) {
                    if cancel.is_cancelled() {
                        status = ScanStatus::Cancelled;
                        break 'window;
                    }
                    self.probe_candidate(
                        xpub,
                        emergency,
                        has_emergency,
                        &template,
                        index,
                        &mut vaults,
                        &mut failures,
                    )
                    .await;
                }
            }
        }

        vaults.sort_by_key(|v| v.metadata.vault_index);
        failures.sort_by(|a, b| (a.vault_index, &a.address).cmp(&(b.vault_index, &b.address)));

        Ok(RecoverySweep {
            vaults,
            failures,
            status,
            tip_height,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn probe_candidate(
        &self,
        xpub: &str,
        emergency_xpub: Option<&str>,
        has_emergency: bool,
        template: &VaultTemplate,
        index: u32,
        vaults: &mut Vec<VaultConfig>,
        failures: &mut Vec<ScanFailure>,
    ) {
        let mut state = CandidateState::Pending;

        let metadata = creation_metadata(template, index, has_emergency);
        let output = match VaultOutput::assemble(xpub, emergency_xpub, metadata, self.network) {
            Ok(output) => output,
            Err(e) => {
                failures.push(ScanFailure {
                    vault_index: index,
                    address: String::new(),
                    error: e.to_string(),
                });
                return;
            }
        };
        let address = output.address.to_string();

        debug_assert_eq!(state, CandidateState::Pending);
        state = CandidateState::Queried;
        log::debug!("recovery probe index {} at {} ({:?})", index, address, state);
        let result = with_retry("get_utxos", || self.adapter.get_utxos(&address)).await;

        state = match result {
            Ok(utxos) if utxos.is_empty() => CandidateState::Empty,
            Ok(utxos) => {
                let config = self
                    .reconstruct_from_hit(xpub, emergency_xpub, &output, &utxos)
                    .await;
                vaults.push(config);
                CandidateState::Found
            }
            Err(e) => {
                let terminal = if e.is_retryable() {
                    CandidateState::TransientError
                } else {
                    CandidateState::PermanentError
                };
                failures.push(ScanFailure {
                    vault_index: index,
                    address,
                    error: e.to_string(),
                });
                terminal
            }
        };
        debug_assert_ne!(state, CandidateState::Pending);
        debug_assert_ne!(state, CandidateState::Queried);
    }

    /// Build a config for a funded candidate, preferring the metadata
    /// leaf read back from witness data when the adapter can serve it.
    async fn reconstruct_from_hit(
        &self,
        xpub: &str,
        emergency_xpub: Option<&str>,
        output: &VaultOutput,
        utxos: &[Utxo],
    ) -> VaultConfig {
        let created_at = earliest_height(utxos);

        if let Some(first) = utxos.first() {
            if let Ok(Some(bytes)) = self
                .adapter
                .get_tx_witness(&first.txid, first.vout)
                .await
            {
                if let Some(config) =
                    self.config_from_witness(xpub, emergency_xpub, output, &bytes, created_at)
                {
                    return config;
                }
            }
        }

        output.to_config("recovered vault", xpub, emergency_xpub, created_at)
    }

    /// Any metadata byte feeds the leaf hash (and, for NUMS vaults,
    /// the internal-key salt), so a commitment that differs from the
    /// probed form can only pass the address check below if it was
    /// produced by an implementation whose canonical creation values
    /// differ from ours while still landing on this address. Witness
    /// read-back therefore confirms commitments rather than widening
    /// them; mismatches fall back to the probed form.
    fn config_from_witness(
        &self,
        xpub: &str,
        emergency_xpub: Option<&str>,
        output: &VaultOutput,
        witness_bytes: &[u8],
        created_at: u32,
    ) -> Option<VaultConfig> {
        let decoded = decode_metadata_leaf(Script::from_bytes(witness_bytes)).ok()?;
        if decoded == output.metadata {
            return None;
        }

        // only accept committed metadata that reproduces the on-chain address
        let enriched = VaultOutput::assemble(xpub, emergency_xpub, decoded, self.network).ok()?;
        if enriched.address != output.address {
            log::warn!(
                "witness metadata for {} does not reproduce the address; keeping canonical form",
                output.address
            );
            return None;
        }
        let created_at = if enriched.metadata.created_at_block > 0 {
            enriched.metadata.created_at_block
        } else {
            created_at
        };
        Some(enriched.to_config("recovered vault", xpub, emergency_xpub, created_at))
    }
}
