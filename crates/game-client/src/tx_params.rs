//! Transaction Param Cache
//!
//! Next nonce and fee parameters for one signing identity. Only the
//! submitter advances the nonce.

use crate::error::SubmitError;
use alloy::primitives::Address;
use ledger_client::{Ledger, LedgerError};
use parking_lot::Mutex;

/// Cached nonce and EIP-1559 fees
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedTxParams {
    pub nonce: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Per-identity parameter cache
pub struct TxParamCache {
    address: Address,
    fallback_max_fee_per_gas: u128,
    fallback_max_priority_fee_per_gas: u128,
    params: Mutex<Option<CachedTxParams>>,
}

impl TxParamCache {
    /// Empty cache for `address`; fees fall back to the given values
    pub fn new(
        address: Address,
        fallback_max_fee_per_gas: u128,
        fallback_max_priority_fee_per_gas: u128,
    ) -> Self {
        Self {
            address,
            fallback_max_fee_per_gas,
            fallback_max_priority_fee_per_gas,
            params: Mutex::new(None),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Read the pending nonce and fee estimate and replace the cache wholesale.
    ///
    /// Any read failure invalidates the cache.
    pub async fn refresh(&self, ledger: &dyn Ledger) -> Result<CachedTxParams, LedgerError> {
        let result = tokio::try_join!(ledger.pending_nonce(self.address), ledger.fee_estimate());

        match result {
            Ok((nonce, fees)) => {
                let params = CachedTxParams {
                    nonce,
                    max_fee_per_gas: fees.max_fee_per_gas.unwrap_or(self.fallback_max_fee_per_gas),
                    max_priority_fee_per_gas: fees
                        .max_priority_fee_per_gas
                        .unwrap_or(self.fallback_max_priority_fee_per_gas),
                };
                *self.params.lock() = Some(params);
                tracing::debug!(
                    "Tx params refreshed: nonce {} maxFee {} priority {}",
                    params.nonce,
                    params.max_fee_per_gas,
                    params.max_priority_fee_per_gas
                );
                Ok(params)
            }
            Err(e) => {
                *self.params.lock() = None;
                tracing::warn!("Tx param refresh failed, cache invalidated: {}", e);
                Err(e)
            }
        }
    }

    /// Hand out the current nonce and advance it, in one critical section.
    ///
    /// The returned record carries the nonce to use.
    pub fn take_nonce(&self) -> Result<CachedTxParams, SubmitError> {
        let mut guard = self.params.lock();
        let params = guard
            .as_mut()
            .ok_or(SubmitError::NotReady("transaction parameters unavailable"))?;
        let taken = *params;
        params.nonce += 1;
        Ok(taken)
    }

    /// Drop the cached values. `take_nonce` fails until the next refresh.
    pub fn invalidate(&self) {
        *self.params.lock() = None;
    }

    /// Cached values without reserving a nonce
    pub fn current(&self) -> Option<CachedTxParams> {
        *self.params.lock()
    }

    /// Whether a nonce can be taken without a network read
    pub fn is_ready(&self) -> bool {
        self.params.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLedger;
    use ledger_client::FeeEstimate;

    fn cache() -> TxParamCache {
        TxParamCache::new(Address::repeat_byte(1), 50, 2)
    }

    #[test]
    fn test_take_before_refresh_is_not_ready() {
        let cache = cache();
        assert!(matches!(cache.take_nonce(), Err(SubmitError::NotReady(_))));
    }

    #[tokio::test]
    async fn test_take_increments() {
        let ledger = ScriptedLedger::new();
        ledger.set_chain_nonce(5);
        let cache = cache();
        cache.refresh(&ledger).await.unwrap();

        assert_eq!(cache.take_nonce().unwrap().nonce, 5);
        assert_eq!(cache.take_nonce().unwrap().nonce, 6);
        assert_eq!(cache.current().unwrap().nonce, 7);
    }

    #[tokio::test]
    async fn test_missing_fees_fall_back() {
        let ledger = ScriptedLedger::new();
        ledger.set_fees(FeeEstimate {
            max_fee_per_gas: None,
            max_priority_fee_per_gas: Some(9),
        });
        let params = cache().refresh(&ledger).await.unwrap();
        assert_eq!(params.max_fee_per_gas, 50);
        assert_eq!(params.max_priority_fee_per_gas, 9);
    }

    #[tokio::test]
    async fn test_refresh_failure_invalidates() {
        let ledger = ScriptedLedger::new();
        let cache = cache();
        cache.refresh(&ledger).await.unwrap();
        assert!(cache.is_ready());

        ledger.fail_reads(true);
        assert!(cache.refresh(&ledger).await.is_err());
        assert!(!cache.is_ready());
        assert!(cache.take_nonce().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_takes_never_repeat() {
        let ledger = ScriptedLedger::new();
        let cache = std::sync::Arc::new(cache());
        cache.refresh(&ledger).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    (0..25).map(|_| cache.take_nonce().unwrap().nonce).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
        assert_eq!(all.first(), Some(&0));
        assert_eq!(all.last(), Some(&199));
    }
}
