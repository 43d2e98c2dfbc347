//! # In-Memory Chain Adapter
//!
//! Deterministic [`ChainAdapter`] double used by the test suite.
//! Failures can be injected per address: a transient count burns down
//! on every query, a permanent flag fails forever.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::{VaultError, VaultResult};
use crate::services::chain::ChainAdapter;
use crate::vault::types::Utxo;

#[derive(Debug, Default)]
pub struct MemoryChainAdapter {
    utxos: HashMap<String, Vec<Utxo>>,
    witnesses: HashMap<(String, u32), Vec<u8>>,
    tip_height: u32,
    transient_failures: Mutex<HashMap<String, u32>>,
    permanent_failures: HashSet<String>,
}

impl MemoryChainAdapter {
    pub fn new(tip_height: u32) -> Self {
        Self {
            tip_height,
            ..Self::default()
        }
    }

    /// Seed an address with unspent outputs.
    pub fn add_utxos(&mut self, address: &str, utxos: Vec<Utxo>) {
        self.utxos.entry(address.to_string()).or_default().extend(utxos);
    }

    /// Seed witness bytes for an outpoint.
    pub fn add_witness(&mut self, txid: &str, vout: u32, witness: Vec<u8>) {
        self.witnesses.insert((txid.to_string(), vout), witness);
    }

    /// Fail the next `count` queries for an address with a transient
    /// error, then answer normally.
    pub fn fail_transiently(&mut self, address: &str, count: u32) {
        self.transient_failures
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string(), count);
    }

    /// Fail every query for an address with a permanent error.
    pub fn fail_permanently(&mut self, address: &str) {
        self.permanent_failures.insert(address.to_string());
    }

    fn check_failures(&self, address: &str) -> VaultResult<()> {
        if self.permanent_failures.contains(address) {
            return Err(VaultError::permanent(format!(
                "backend rejected address {}",
                address
            )));
        }

        let mut transient = self
            .transient_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(remaining) = transient.get_mut(address) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(VaultError::transient(format!(
                    "backend unavailable for {}",
                    address
                )));
            }
        }
        Ok(())
    }
}

impl ChainAdapter for MemoryChainAdapter {
    async fn get_utxos(&self, address: &str) -> VaultResult<Vec<Utxo>> {
        self.check_failures(address)?;
        Ok(self.utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_tip_height(&self) -> VaultResult<u32> {
        Ok(self.tip_height)
    }

    async fn get_tx_witness(&self, txid: &str, vout: u32) -> VaultResult<Option<Vec<u8>>> {
        Ok(self.witnesses.get(&(txid.to_string(), vout)).cloned())
    }
}
