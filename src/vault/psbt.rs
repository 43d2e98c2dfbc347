//! # PSBT Construction and Policy Verification
//!
//! Builds the unsigned spending transactions for a vault as BIP174
//! PSBTs, annotated so an external hardware signer can produce the
//! Schnorr signatures without any other context:
//!
//! - **Delayed spends** reveal the CSV leaf (script-path): the input
//!   carries the tapscript, leaf version, and control block.
//! - **Emergency spends** use the key path: the input carries the
//!   internal key and Merkle root so the signer can compute the tweak.
//!
//! All vault spends are sweep-or-single-output; there is never a
//! change output. A partial-amount spend therefore pays its entire
//! residual to miners, which the builder surfaces as a warning.

use std::collections::BTreeMap;
use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::psbt::{Input, Psbt, PsbtSighashType};
use bitcoin::sighash::TapSighashType;
use bitcoin::taproot::{LeafVersion, TapLeafHash};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness, XOnlyPublicKey,
};
use serde::{Deserialize, Serialize};

use crate::config::{fees, validation};
use crate::encoding::compact_size_len;
use crate::error::{VaultError, VaultResult};
use crate::keys;
use crate::utils;
use crate::vault::taproot::VaultOutput;
use crate::vault::types::{
    PsbtData, RecoveryType, SpendIntent, SpendPath, SpendSummary, Utxo, VaultConfig,
};

/// Outcome of checking a PSBT against a vault's spending policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// A finalized transaction extracted from a fully signed PSBT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedPsbt {
    pub tx_hex: String,
    pub txid: String,
    pub vsize: usize,
}

/// PSBT factory bound to one vault.
///
/// Construction re-derives the vault's Taproot output from its xpubs
/// and metadata and refuses configs whose stored address does not
/// match, so every PSBT built here is internally consistent.
pub struct PsbtBuilder<'a> {
    config: &'a VaultConfig,
    output: VaultOutput,
}

impl<'a> PsbtBuilder<'a> {
    pub fn new(config: &'a VaultConfig) -> VaultResult<Self> {
        let output = VaultOutput::assemble(
            &config.primary_xpub,
            config.emergency_xpub.as_deref(),
            config.metadata.clone(),
            config.network,
        )?;

        if output.address.to_string() != config.address {
            return Err(VaultError::policy(format!(
                "config address {} does not match the address derived from its keys and metadata",
                config.address
            )));
        }

        Ok(Self { config, output })
    }

    /// The re-derived Taproot output backing this builder.
    pub fn vault_output(&self) -> &VaultOutput {
        &self.output
    }

    /// Build a script-path PSBT through the CSV-delayed leaf.
    ///
    /// Every input's nSequence carries the vault delay in BIP68 block
    /// units, so the transaction is only broadcastable once each
    /// spent output has aged past the delay.
    pub fn build_delayed_spend(
        &self,
        intent: &SpendIntent,
        utxos: &[Utxo],
        current_height: Option<u32>,
    ) -> VaultResult<PsbtData> {
        if intent.path_type != SpendPath::Delayed {
            return Err(VaultError::invalid_input(
                "delayed spend requested with a non-delayed path type",
            ));
        }
        if intent.vault_id != self.config.id {
            return Err(VaultError::policy(format!(
                "spend intent targets vault {} but this builder is bound to {}",
                intent.vault_id, self.config.id
            )));
        }

        let delay = self.config.metadata.delay_blocks;
        let sequence = delay_sequence(delay)?;
        self.build(
            SpendPath::Delayed,
            &intent.destination,
            intent.amount_sats,
            intent.fee_rate,
            sequence,
            utxos,
            current_height.map(|h| h.saturating_add(delay)),
        )
    }

    /// Build a key-path PSBT through the emergency internal key.
    ///
    /// Emergency spends always sweep; nSequence is `0xFFFFFFFE`,
    /// which leaves the relative timelock unenforced for the input.
    pub fn build_emergency(
        &self,
        destination: &str,
        fee_rate: f64,
        utxos: &[Utxo],
    ) -> VaultResult<PsbtData> {
        self.require_emergency_path()?;
        self.build(
            SpendPath::Emergency,
            destination,
            None,
            fee_rate,
            Sequence::ENABLE_LOCKTIME_NO_RBF,
            utxos,
            None,
        )
    }

    /// Build a cancel PSBT: an emergency sweep back to the vault's
    /// own address, fee-bumped to replace an in-flight spend.
    pub fn build_cancel(
        &self,
        original_txid: &str,
        fee_rate: f64,
        original_fee_rate: Option<f64>,
        utxos: &[Utxo],
    ) -> VaultResult<PsbtData> {
        utils::txid::validate(original_txid)?;
        if let Some(original) = original_fee_rate {
            if fee_rate <= original {
                return Err(VaultError::policy(format!(
                    "replacement fee rate {} sat/vB must exceed the original {} sat/vB",
                    fee_rate, original
                )));
            }
        }

        let own_address = self.config.address.clone();
        self.require_emergency_path()?;
        self.build(
            SpendPath::Emergency,
            &own_address,
            None,
            fee_rate,
            Sequence::ENABLE_LOCKTIME_NO_RBF,
            utxos,
            None,
        )
    }

    fn require_emergency_path(&self) -> VaultResult<()> {
        if self.config.metadata.recovery_type != RecoveryType::EmergencyKey
            || self.output.emergency_key.is_none()
        {
            return Err(VaultError::policy(
                "vault has no emergency key path; only the delayed path is available",
            ));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        path: SpendPath,
        destination: &str,
        amount_sats: Option<u64>,
        fee_rate: f64,
        sequence: Sequence,
        utxos: &[Utxo],
        estimated_unlock_height: Option<u32>,
    ) -> VaultResult<PsbtData> {
        validation::validate_fee_rate(fee_rate)?;
        let dest_address = utils::address::validate_and_parse(destination, self.config.network)?;
        let dest_spk = dest_address.script_pubkey();

        let (selected, fee_sats, output_value) =
            self.select_utxos(utxos, amount_sats, fee_rate, path, dest_spk.len())?;

        let unsigned = self.unsigned_tx(&selected, &dest_spk, output_value, sequence)?;
        let mut psbt = Psbt::from_unsigned_tx(unsigned)
            .map_err(|e| VaultError::psbt(format!("unsigned tx rejected: {}", e)))?;
        self.annotate_inputs(&mut psbt, &selected, path)?;

        let mut warnings = Vec::new();
        let selected_total: u64 = selected.iter().map(|u| u.value_sats).sum();
        let surplus = selected_total
            .saturating_sub(output_value)
            .saturating_sub(fee_sats);
        if surplus > 0 {
            warnings.push(format!(
                "{} sats beyond the estimated fee go to miners: vault spends carry no change output",
                surplus
            ));
        }

        let report = self.verify_parsed(&psbt);
        warnings.extend(report.warnings.iter().cloned());

        let summary = SpendSummary {
            from_address: self.config.address.clone(),
            to_address: dest_address.to_string(),
            amount_sats: output_value,
            fee_sats,
            path,
            delay_blocks: match path {
                SpendPath::Delayed => Some(self.config.metadata.delay_blocks),
                SpendPath::Emergency => None,
            },
            estimated_unlock_height,
        };

        Ok(PsbtData {
            psbt_base64: psbt.to_string(),
            summary,
            is_valid: report.valid,
            warnings,
        })
    }

    /// Deterministic oldest-first coin selection.
    ///
    /// Returns the selected outputs, the estimated fee at the
    /// requested rate, and the destination output value.
    fn select_utxos<'u>(
        &self,
        utxos: &'u [Utxo],
        amount_sats: Option<u64>,
        fee_rate: f64,
        path: SpendPath,
        dest_spk_len: usize,
    ) -> VaultResult<(Vec<&'u Utxo>, u64, u64)> {
        let vault_spk_hex = crate::encoding::to_hex(self.output.script_pubkey().as_bytes());
        for utxo in utxos {
            utxo.validate()?;
            if !utxo.script_pubkey.eq_ignore_ascii_case(&vault_spk_hex) {
                return Err(VaultError::policy(format!(
                    "utxo {}:{} does not belong to this vault",
                    utxo.txid, utxo.vout
                )));
            }
        }

        let mut sorted: Vec<&Utxo> = utxos.iter().collect();
        sorted.sort_by_key(|u| u.age_key());
        let available: u64 = sorted.iter().map(|u| u.value_sats).sum();

        let fee_for = |n_inputs: usize| -> u64 {
            let vsize = self.estimate_vsize(n_inputs, dest_spk_len, path);
            (vsize as f64 * fee_rate).ceil() as u64
        };

        match amount_sats {
            // sweep: spend everything, destination takes value minus fee
            None => {
                let fee = fee_for(sorted.len());
                if available <= fee {
                    return Err(VaultError::InsufficientFunds {
                        needed: fee + fees::DUST_THRESHOLD_SATS,
                        available,
                    });
                }
                let value = available - fee;
                if value < fees::DUST_THRESHOLD_SATS {
                    return Err(VaultError::DustOutput {
                        value_sats: value,
                        dust_sats: fees::DUST_THRESHOLD_SATS,
                    });
                }
                Ok((sorted, fee, value))
            }
            Some(target) => {
                if target < fees::DUST_THRESHOLD_SATS {
                    return Err(VaultError::DustOutput {
                        value_sats: target,
                        dust_sats: fees::DUST_THRESHOLD_SATS,
                    });
                }

                let mut selected = Vec::new();
                let mut gathered = 0u64;
                for utxo in sorted {
                    selected.push(utxo);
                    gathered += utxo.value_sats;
                    let fee = fee_for(selected.len());
                    if gathered >= target.saturating_add(fee) {
                        return Ok((selected, fee, target));
                    }
                }

                Err(VaultError::InsufficientFunds {
                    needed: target.saturating_add(fee_for(selected.len().max(1))),
                    available,
                })
            }
        }
    }

    /// Conservative virtual-size estimate for a spend of `n_inputs`
    /// vault outputs to a single destination.
    fn estimate_vsize(&self, n_inputs: usize, dest_spk_len: usize, path: SpendPath) -> usize {
        let base = 4
            + compact_size_len(n_inputs as u64)
            + n_inputs * (36 + 1 + 4)
            + compact_size_len(1)
            + (8 + compact_size_len(dest_spk_len as u64) + dest_spk_len)
            + 4;
        let witness = n_inputs * self.witness_bytes(path);
        let weight = base * 4 + 2 + witness;
        (weight + 3) / 4
    }

    /// Upper-bound witness size per input for a spending path.
    fn witness_bytes(&self, path: SpendPath) -> usize {
        let sig = 1 + fees::SCHNORR_SIG_BYTES;
        match path {
            SpendPath::Emergency => 1 + sig,
            SpendPath::Delayed => {
                let script_len = self.output.spending_script.len();
                1 + sig + compact_size_len(script_len as u64) + script_len + 1
                    + fees::CONTROL_BLOCK_BYTES
            }
        }
    }

    fn unsigned_tx(
        &self,
        selected: &[&Utxo],
        dest_spk: &ScriptBuf,
        output_value: u64,
        sequence: Sequence,
    ) -> VaultResult<Transaction> {
        let mut inputs = Vec::with_capacity(selected.len());
        for utxo in selected {
            inputs.push(TxIn {
                previous_output: utxo.outpoint()?,
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            });
        }

        Ok(Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: vec![TxOut {
                value: Amount::from_sat(output_value),
                script_pubkey: dest_spk.clone(),
            }],
        })
    }

    /// Attach the per-input Taproot annotations the signer needs.
    fn annotate_inputs(
        &self,
        psbt: &mut Psbt,
        selected: &[&Utxo],
        path: SpendPath,
    ) -> VaultResult<()> {
        let vault_spk = self.output.script_pubkey();
        let merkle_root = self.output.merkle_root()?;

        for (psbt_input, utxo) in psbt.inputs.iter_mut().zip(selected) {
            let mut input = Input {
                witness_utxo: Some(TxOut {
                    value: Amount::from_sat(utxo.value_sats),
                    script_pubkey: vault_spk.clone(),
                }),
                sighash_type: Some(PsbtSighashType::from(TapSighashType::Default)),
                tap_merkle_root: Some(merkle_root),
                ..Input::default()
            };

            match path {
                SpendPath::Delayed => {
                    let mut tap_scripts = BTreeMap::new();
                    tap_scripts.insert(
                        self.output.control_block()?,
                        (self.output.spending_script.clone(), LeafVersion::TapScript),
                    );
                    input.tap_scripts = tap_scripts;
                    input.tap_internal_key = Some(self.output.internal_key);

                    let xpub =
                        keys::parse_xpub(&self.config.primary_xpub, self.config.network)?;
                    let origin = keys::key_origin(&xpub, self.config.metadata.vault_index)?;
                    let mut origins = BTreeMap::new();
                    origins.insert(
                        self.output.primary_key,
                        (vec![self.output.spending_leaf_hash()], origin),
                    );
                    input.tap_key_origins = origins;
                }
                SpendPath::Emergency => {
                    let emergency_key = self.output.emergency_key.ok_or_else(|| {
                        VaultError::policy("vault has no emergency key path")
                    })?;
                    input.tap_internal_key = Some(emergency_key);

                    if let Some(xpub_str) = self.config.emergency_xpub.as_deref() {
                        let xpub = keys::parse_xpub(xpub_str, self.config.network)?;
                        let origin = keys::key_origin(&xpub, self.config.metadata.vault_index)?;
                        let mut origins = BTreeMap::new();
                        origins.insert(emergency_key, (Vec::<TapLeafHash>::new(), origin));
                        input.tap_key_origins = origins;
                    }
                }
            }

            *psbt_input = input;
        }
        Ok(())
    }

    /// Check a returned, possibly signed, PSBT against this vault's
    /// policy. Violations are collected in order; warnings never
    /// invalidate.
    pub fn verify_policy(&self, psbt_base64: &str) -> VaultResult<PolicyReport> {
        let psbt = parse_psbt(psbt_base64)?;
        Ok(self.verify_parsed(&psbt))
    }

    fn verify_parsed(&self, psbt: &Psbt) -> PolicyReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let vault_spk = self.output.script_pubkey();
        let delay = self.config.metadata.delay_blocks;

        // path is implied by the presence of tapscript annotations
        let path = if psbt.inputs.iter().any(|i| !i.tap_scripts.is_empty()) {
            SpendPath::Delayed
        } else {
            SpendPath::Emergency
        };

        if psbt.inputs.is_empty() {
            errors.push("psbt has no inputs".to_string());
        }

        let mut total_in = 0u64;
        let mut inputs_complete = true;
        for (i, input) in psbt.inputs.iter().enumerate() {
            match &input.witness_utxo {
                Some(prev) => {
                    total_in += prev.value.to_sat();
                    if prev.script_pubkey != vault_spk {
                        errors.push(format!(
                            "input {} spends an output that does not belong to this vault",
                            i
                        ));
                    }
                }
                None => {
                    inputs_complete = false;
                    errors.push(format!("input {} is missing its witness utxo", i));
                }
            }
        }

        for (i, txin) in psbt.unsigned_tx.input.iter().enumerate() {
            let expected = match path {
                SpendPath::Delayed => delay_sequence(delay).ok(),
                SpendPath::Emergency => Some(Sequence::ENABLE_LOCKTIME_NO_RBF),
            };
            match expected {
                Some(seq) if txin.sequence == seq => {}
                Some(seq) => errors.push(format!(
                    "input {} nSequence {:#010x} does not match the {} path requirement {:#010x}",
                    i,
                    txin.sequence.to_consensus_u32(),
                    path,
                    seq.to_consensus_u32()
                )),
                None => errors.push(format!("input {} delay is not BIP68-encodable", i)),
            }
        }

        if psbt.unsigned_tx.output.len() != 1 {
            errors.push(format!(
                "expected exactly one output, found {}",
                psbt.unsigned_tx.output.len()
            ));
        }
        let mut total_out = 0u64;
        for (i, txout) in psbt.unsigned_tx.output.iter().enumerate() {
            total_out += txout.value.to_sat();
            if Address::from_script(
                &txout.script_pubkey,
                bitcoin::Network::from(self.config.network),
            )
            .is_err()
            {
                errors.push(format!(
                    "output {} is not a valid {} address",
                    i, self.config.network
                ));
            }
        }

        if inputs_complete && !psbt.inputs.is_empty() {
            if total_out > total_in {
                errors.push(format!(
                    "outputs ({} sats) exceed inputs ({} sats)",
                    total_out, total_in
                ));
            } else {
                let fee = total_in - total_out;
                let vsize = self.estimate_vsize(
                    psbt.inputs.len(),
                    psbt.unsigned_tx
                        .output
                        .first()
                        .map(|o| o.script_pubkey.len())
                        .unwrap_or(34),
                    path,
                );
                let rate = fee as f64 / vsize.max(1) as f64;
                if rate < fees::MIN_FEE_RATE {
                    errors.push(format!(
                        "fee rate {:.2} sat/vB is below the minimum {:.0} sat/vB",
                        rate,
                        fees::MIN_FEE_RATE
                    ));
                } else if rate > fees::MAX_FEE_RATE {
                    errors.push(format!(
                        "fee rate {:.2} sat/vB exceeds the maximum {:.0} sat/vB",
                        rate,
                        fees::MAX_FEE_RATE
                    ));
                } else if rate > fees::HIGH_FEE_RATE_WARN {
                    warnings.push(format!("unusually high fee rate: {:.2} sat/vB", rate));
                }
            }
        }

        match path {
            SpendPath::Delayed => self.verify_script_path(psbt, &mut errors),
            SpendPath::Emergency => self.verify_key_path(psbt, &mut errors),
        }

        PolicyReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn verify_script_path(&self, psbt: &Psbt, errors: &mut Vec<String>) {
        let spk = self.output.script_pubkey();
        let output_key = spk
            .as_bytes()
            .get(2..34)
            .and_then(|b| XOnlyPublicKey::from_slice(b).ok());

        for (i, input) in psbt.inputs.iter().enumerate() {
            if input.tap_scripts.is_empty() {
                errors.push(format!("input {} is missing its tapscript leaf", i));
                continue;
            }
            for (control, (script, version)) in &input.tap_scripts {
                if *version != LeafVersion::TapScript {
                    errors.push(format!("input {} leaf version is not 0xc0", i));
                }
                if *script != self.output.spending_script {
                    errors.push(format!(
                        "input {} references a leaf that is not this vault's spending leaf",
                        i
                    ));
                    continue;
                }
                match output_key {
                    Some(key)
                        if control.verify_taproot_commitment(keys::secp(), key, script) => {}
                    Some(_) => errors.push(format!(
                        "input {} control block does not commit the spending leaf to the vault output",
                        i
                    )),
                    None => errors.push("vault script pubkey is not P2TR".to_string()),
                }
            }
        }
    }

    fn verify_key_path(&self, psbt: &Psbt, errors: &mut Vec<String>) {
        if self.config.metadata.recovery_type != RecoveryType::EmergencyKey {
            errors.push(format!(
                "recovery type {:?} does not permit immediate key-path recovery",
                self.config.metadata.recovery_type
            ));
            return;
        }
        let Some(emergency_key) = self.output.emergency_key else {
            errors.push("vault has no emergency key".to_string());
            return;
        };

        for (i, input) in psbt.inputs.iter().enumerate() {
            match input.tap_internal_key {
                Some(key) if key == emergency_key => {}
                Some(_) => errors.push(format!(
                    "input {} internal key is not the vault's emergency key",
                    i
                )),
                None => errors.push(format!("input {} is missing its internal key", i)),
            }
        }
    }
}

/// Encode a delay as a BIP68 block-based sequence (disable flag and
/// type flag both clear).
fn delay_sequence(delay_blocks: u32) -> VaultResult<Sequence> {
    let height = u16::try_from(delay_blocks).map_err(|_| {
        VaultError::invalid_input(format!(
            "delay of {} blocks does not fit a BIP68 height lock",
            delay_blocks
        ))
    })?;
    Ok(Sequence::from_height(height))
}

fn parse_psbt(psbt_base64: &str) -> VaultResult<Psbt> {
    Psbt::from_str(psbt_base64).map_err(|e| VaultError::psbt(format!("psbt decode: {}", e)))
}

/// Extract the raw transaction from a fully signed PSBT.
///
/// Refuses PSBTs with any input still missing its final witness.
pub fn finalize_psbt(psbt_base64: &str) -> VaultResult<FinalizedPsbt> {
    let psbt = parse_psbt(psbt_base64)?;

    for (i, input) in psbt.inputs.iter().enumerate() {
        match &input.final_script_witness {
            Some(witness) if !witness.is_empty() => {}
            _ => {
                return Err(VaultError::psbt(format!(
                    "input {} is missing its final witness; sign the psbt first",
                    i
                )))
            }
        }
    }

    let tx = psbt.extract_tx_unchecked_fee_rate();
    Ok(FinalizedPsbt {
        tx_hex: serialize_hex(&tx),
        txid: tx.compute_txid().to_string(),
        vsize: tx.vsize(),
    })
}
