//! Raw Transaction Submitter
//!
//! Builds, signs and broadcasts one game transaction with a single network
//! round trip. Preparation (nonce, signature, pending registration) is
//! synchronous; the broadcast runs as its own task and reports a
//! [`SubmitOutcome`].

use crate::error::SubmitError;
use crate::identity::{SignedTx, SigningIdentity};
use crate::tracker::ConfirmationTracker;
use crate::tx_params::TxParamCache;
use alloy::consensus::TxEip1559;
use alloy::primitives::{Address, TxKind, B256, U256};
use ballgame_types::GameAction;
use ledger_client::contract::encode_action;
use ledger_client::Ledger;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A signed transaction whose pending record is registered
#[derive(Clone, Debug)]
pub struct PreparedTx {
    pub action: GameAction,
    pub nonce: u64,
    pub signed: SignedTx,
}

/// How a broadcast ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted {
        action: GameAction,
        tx_hash: B256,
        nonce: u64,
    },
    /// Accepted after one nonce refresh
    AcceptedAfterRetry {
        action: GameAction,
        tx_hash: B256,
        nonce: u64,
    },
    /// The broadcast call errored, but the ledger event for the action had
    /// already been observed
    ConfirmedByEvent {
        action: GameAction,
        broadcast_error: String,
    },
    Failed {
        action: GameAction,
        reason: String,
    },
}

impl SubmitOutcome {
    pub fn action(&self) -> GameAction {
        match self {
            SubmitOutcome::Accepted { action, .. }
            | SubmitOutcome::AcceptedAfterRetry { action, .. }
            | SubmitOutcome::ConfirmedByEvent { action, .. }
            | SubmitOutcome::Failed { action, .. } => *action,
        }
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self, SubmitOutcome::Failed { .. })
    }
}

/// Signs and broadcasts game actions for one identity
pub struct RawSubmitter {
    ledger: Arc<dyn Ledger>,
    identity: Arc<SigningIdentity>,
    params: Arc<TxParamCache>,
    tracker: Arc<ConfirmationTracker>,
    contract: Address,
    chain_id: u64,
}

impl RawSubmitter {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        identity: Arc<SigningIdentity>,
        params: Arc<TxParamCache>,
        tracker: Arc<ConfirmationTracker>,
        contract: Address,
        chain_id: u64,
    ) -> Self {
        Self {
            ledger,
            identity,
            params,
            tracker,
            contract,
            chain_id,
        }
    }

    /// Take a nonce, sign, and register the pending action.
    ///
    /// Never suspends, so concurrent callers can never share a nonce.
    pub fn prepare(&self, action: GameAction) -> Result<PreparedTx, SubmitError> {
        let action_id = action.action_id();
        if self.tracker.is_pending(action_id) {
            return Err(SubmitError::AlreadyPending(action_id));
        }

        let prepared = self.sign(action)?;
        self.tracker
            .register(action_id, self.identity.address(), Instant::now());
        Ok(prepared)
    }

    /// Broadcast a prepared transaction, retrying once on a nonce conflict.
    pub async fn broadcast(&self, prepared: PreparedTx) -> SubmitOutcome {
        let action = prepared.action;
        let action_id = action.action_id();
        let mut current = prepared;
        let mut retried = false;

        let failure = loop {
            match self.ledger.send_raw_transaction(current.signed.raw.clone()).await {
                Ok(tx_hash) => {
                    let completed = self.tracker.record_broadcast_ack(action_id, Instant::now());
                    tracing::debug!(
                        "{} accepted: tx {} nonce {}{}",
                        action,
                        tx_hash,
                        current.nonce,
                        if completed.is_some() { " (event already seen)" } else { "" }
                    );
                    return if retried {
                        SubmitOutcome::AcceptedAfterRetry {
                            action,
                            tx_hash,
                            nonce: current.nonce,
                        }
                    } else {
                        SubmitOutcome::Accepted {
                            action,
                            tx_hash,
                            nonce: current.nonce,
                        }
                    };
                }
                Err(e) if e.is_nonce_conflict() && !retried => {
                    tracing::warn!("{} hit nonce conflict at {}: {}, retrying", action, current.nonce, e);
                    retried = true;
                    if let Err(refresh_err) = self.params.refresh(&*self.ledger).await {
                        break format!("{} (refresh failed: {})", e, refresh_err);
                    }
                    match self.sign(action) {
                        Ok(resigned) => current = resigned,
                        Err(sign_err) => break sign_err.to_string(),
                    }
                }
                Err(e) => break e.to_string(),
            }
        };

        let discarded = self.tracker.discard(action_id);
        if let Err(e) = self.params.refresh(&*self.ledger).await {
            tracing::warn!("Param refresh after failure failed: {}", e);
        }

        if discarded.is_some_and(|p| p.event_observed_at.is_some()) {
            tracing::warn!("{} broadcast errored after its event landed: {}", action, failure);
            return SubmitOutcome::ConfirmedByEvent {
                action,
                broadcast_error: failure,
            };
        }

        tracing::error!("{} failed: {}", action, failure);
        SubmitOutcome::Failed {
            action,
            reason: failure,
        }
    }

    /// Prepare and spawn the broadcast
    pub fn submit(self: &Arc<Self>, action: GameAction) -> Result<JoinHandle<SubmitOutcome>, SubmitError> {
        let prepared = self.prepare(action)?;
        let submitter = self.clone();
        Ok(tokio::spawn(async move { submitter.broadcast(prepared).await }))
    }

    fn sign(&self, action: GameAction) -> Result<PreparedTx, SubmitError> {
        let params = self.params.take_nonce()?;
        let tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce: params.nonce,
            gas_limit: action.gas_limit(),
            max_fee_per_gas: params.max_fee_per_gas,
            max_priority_fee_per_gas: params.max_priority_fee_per_gas,
            to: TxKind::Call(self.contract),
            value: U256::ZERO,
            access_list: Default::default(),
            input: encode_action(&action),
        };
        let signed = self.identity.sign_eip1559(tx)?;
        Ok(PreparedTx {
            action,
            nonce: params.nonce,
            signed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::InFlightGuards;
    use crate::testing::ScriptedLedger;
    use crate::tracker::EventObservation;
    use ballgame_types::ActionId;
    use ledger_client::LedgerError;

    struct Fixture {
        ledger: Arc<ScriptedLedger>,
        submitter: Arc<RawSubmitter>,
        params: Arc<TxParamCache>,
        tracker: Arc<ConfirmationTracker>,
        guards: Arc<InFlightGuards>,
        me: Address,
    }

    async fn fixture() -> Fixture {
        let ledger = Arc::new(ScriptedLedger::new());
        let identity = Arc::new(SigningIdentity::random());
        let me = identity.address();
        let params = Arc::new(TxParamCache::new(me, 50, 2));
        params.refresh(&*ledger).await.unwrap();
        let guards = Arc::new(InFlightGuards::new());
        let tracker = Arc::new(ConfirmationTracker::new(guards.clone(), 20, 64));
        let submitter = Arc::new(RawSubmitter::new(
            ledger.clone(),
            identity,
            params.clone(),
            tracker.clone(),
            Address::repeat_byte(0xee),
            10143,
        ));
        Fixture {
            ledger,
            submitter,
            params,
            tracker,
            guards,
            me,
        }
    }

    fn nonce_too_low() -> LedgerError {
        LedgerError::Rpc {
            code: -32000,
            message: "nonce too low".to_string(),
        }
    }

    #[tokio::test]
    async fn test_not_ready_without_params() {
        let f = fixture().await;
        f.params.invalidate();

        let err = f.submitter.prepare(GameAction::Claim { index: 1 }).unwrap_err();
        assert!(matches!(err, SubmitError::NotReady(_)));
        assert_eq!(f.tracker.pending_len(), 0);
        assert!(f.ledger.attempted_nonces().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_registers_before_broadcast() {
        let f = fixture().await;
        let prepared = f.submitter.prepare(GameAction::Claim { index: 3 }).unwrap();

        let pending = f.tracker.pending(ActionId::Claim(3)).unwrap();
        assert_eq!(pending.actor, f.me);
        assert!(pending.broadcast_ack_at.is_none());
        assert!(f.ledger.attempted_nonces().is_empty());

        let outcome = f.submitter.broadcast(prepared).await;
        assert!(matches!(outcome, SubmitOutcome::Accepted { nonce: 0, .. }));
        assert!(f.tracker.pending(ActionId::Claim(3)).unwrap().broadcast_ack_at.is_some());

        let sent = f.ledger.broadcasts();
        assert_eq!(sent[0].to, Some(Address::repeat_byte(0xee)));
        assert_eq!(sent[0].action, Some(GameAction::Claim { index: 3 }));
    }

    #[tokio::test]
    async fn test_duplicate_pending_refused_without_taking_nonce() {
        let f = fixture().await;
        f.submitter.prepare(GameAction::EndRound).unwrap();

        let err = f.submitter.prepare(GameAction::EndRound).unwrap_err();
        assert!(matches!(err, SubmitError::AlreadyPending(ActionId::EndRound)));
        assert_eq!(f.params.current().unwrap().nonce, 1);
    }

    #[tokio::test]
    async fn test_nonces_strictly_increase_across_retry() {
        let f = fixture().await;

        let first = f.submitter.submit(GameAction::Claim { index: 0 }).unwrap().await.unwrap();
        assert!(matches!(first, SubmitOutcome::Accepted { nonce: 0, .. }));

        // another device used the key: our cached nonce 1 is now stale
        f.ledger.set_chain_nonce(4);
        let second = f.submitter.submit(GameAction::Claim { index: 1 }).unwrap().await.unwrap();
        assert!(matches!(second, SubmitOutcome::AcceptedAfterRetry { nonce: 4, .. }));

        let third = f.submitter.submit(GameAction::Claim { index: 2 }).unwrap().await.unwrap();
        assert!(matches!(third, SubmitOutcome::Accepted { nonce: 5, .. }));

        let attempts = f.ledger.attempted_nonces();
        assert_eq!(attempts, vec![0, 1, 4, 5]);
        assert!(attempts.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_concurrent_prepares_get_distinct_nonces() {
        let f = fixture().await;
        let prepared: Vec<_> = (0..10u8)
            .map(|i| f.submitter.prepare(GameAction::Claim { index: i }).unwrap())
            .collect();
        let handles: Vec<_> = prepared
            .into_iter()
            .map(|p| {
                let submitter = f.submitter.clone();
                tokio::spawn(async move { submitter.broadcast(p).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_accepted());
        }

        let mut nonces = f.ledger.attempted_nonces();
        nonces.sort_unstable();
        assert_eq!(nonces, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_second_nonce_failure_is_terminal() {
        let f = fixture().await;
        f.guards.try_acquire(ActionId::Claim(9));
        f.ledger.fail_next_broadcasts([nonce_too_low(), nonce_too_low()]);

        let outcome = f.submitter.submit(GameAction::Claim { index: 9 }).unwrap().await.unwrap();
        match outcome {
            SubmitOutcome::Failed { reason, .. } => assert!(reason.contains("nonce too low")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(f.ledger.attempted_nonces().len(), 2);
        assert!(!f.tracker.is_pending(ActionId::Claim(9)));
        assert!(!f.guards.is_held(ActionId::Claim(9)));
        assert!(f.params.is_ready());
    }

    #[tokio::test]
    async fn test_other_failure_is_not_retried() {
        let f = fixture().await;
        f.ledger.fail_next_broadcasts([LedgerError::Rpc {
            code: -32000,
            message: "insufficient funds for gas * price + value".to_string(),
        }]);

        let outcome = f.submitter.submit(GameAction::StartRound).unwrap().await.unwrap();
        assert!(!outcome.is_accepted());
        assert_eq!(f.ledger.attempted_nonces().len(), 1);
        // cache refreshed from the ledger, which never saw nonce 0 land
        assert_eq!(f.params.current().unwrap().nonce, 0);
    }

    #[tokio::test]
    async fn test_ack_after_event_completes_existing_entry() {
        let f = fixture().await;
        let prepared = f.submitter.prepare(GameAction::Claim { index: 3 }).unwrap();
        f.tracker.record_event(
            ActionId::Claim(3),
            EventObservation {
                actor: Some(f.me),
                outcome: "Normal (+1)".to_string(),
                at: Instant::now(),
            },
        );

        assert!(f.submitter.broadcast(prepared).await.is_accepted());
        let log = f.tracker.log();
        assert_eq!(log.len(), 1);
        assert!(log[0].is_complete());
        assert!(!f.tracker.is_pending(ActionId::Claim(3)));
    }

    #[tokio::test]
    async fn test_broadcast_error_after_event_is_not_a_failure() {
        let f = fixture().await;
        let prepared = f.submitter.prepare(GameAction::Claim { index: 6 }).unwrap();
        f.tracker.record_event(
            ActionId::Claim(6),
            EventObservation {
                actor: Some(f.me),
                outcome: "Special (+3)".to_string(),
                at: Instant::now(),
            },
        );
        f.ledger
            .fail_next_broadcasts([LedgerError::Transport("request timeout".to_string())]);

        let outcome = f.submitter.broadcast(prepared).await;
        match &outcome {
            SubmitOutcome::ConfirmedByEvent { broadcast_error, .. } => {
                assert!(broadcast_error.contains("request timeout"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(outcome.is_accepted());
        assert!(!f.tracker.is_pending(ActionId::Claim(6)));
    }
}
