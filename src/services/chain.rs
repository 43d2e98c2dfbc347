//! # Blockchain Adapter Interface
//!
//! The core never opens a socket. Everything it learns about the
//! chain flows through [`ChainAdapter`], injected by the caller; the
//! Electrum/Esplora transports implementing it live outside the
//! library. Transient adapter failures are retried here with
//! exponential backoff, everything else is surfaced unchanged.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config;
use crate::error::{VaultError, VaultResult};
use crate::vault::types::Utxo;

/// Blockchain query capability injected into the recovery scanner.
pub trait ChainAdapter: Send + Sync {
    /// Unspent outputs currently held by an address.
    fn get_utxos(&self, address: &str) -> impl Future<Output = VaultResult<Vec<Utxo>>> + Send;

    /// Current chain tip height.
    fn get_tip_height(&self) -> impl Future<Output = VaultResult<u32>> + Send;

    /// Witness data revealing a spent output's script path, when the
    /// backend can serve it. Enables metadata-leaf retrieval during
    /// recovery; `None` when unavailable.
    fn get_tx_witness(
        &self,
        txid: &str,
        vout: u32,
    ) -> impl Future<Output = VaultResult<Option<Vec<u8>>>> + Send;
}

/// Cooperative cancellation handle for a recovery sweep.
///
/// The scanner checks the token between per-index queries; a
/// cancelled sweep returns everything confirmed so far.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Run an adapter call, retrying transient failures with exponential
/// backoff up to the configured attempt limit.
pub async fn with_retry<T, F, Fut>(operation: &str, mut call: F) -> VaultResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VaultResult<T>>,
{
    let mut delay = config::scan::RETRY_DELAY;
    let mut last_error = None;

    for attempt in 1..=config::scan::MAX_RETRY_ATTEMPTS {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config::scan::MAX_RETRY_ATTEMPTS => {
                log::warn!(
                    "{}: transient failure on attempt {}/{}: {}",
                    operation,
                    attempt,
                    config::scan::MAX_RETRY_ATTEMPTS,
                    e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error
        .unwrap_or_else(|| VaultError::transient(format!("{}: retries exhausted", operation))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("get_utxos", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(VaultError::transient("connection reset"))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: VaultResult<u32> = with_retry("get_utxos", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VaultError::transient("timeout")) }
        })
        .await;

        assert_eq!(result.unwrap_err().code(), 5001);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: VaultResult<u32> = with_retry("get_utxos", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VaultError::permanent("unknown address index")) }
        })
        .await;

        assert_eq!(result.unwrap_err().code(), 5002);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
    }
}
