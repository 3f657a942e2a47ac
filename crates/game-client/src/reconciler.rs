//! Optimistic State Reconciler
//!
//! Marks an object claimed the moment the user targets it. The periodic
//! poll replaces local object state with authoritative ledger state, which
//! corrects any optimistic mark that did not stick.

use crate::guards::InFlightGuards;
use crate::round::{RoundPhase, RoundState};
use alloy::primitives::Address;
use ballgame_types::ActionId;
use ledger_client::{Ledger, LedgerError};
use parking_lot::RwLock;
use std::sync::Arc;

/// Result of targeting an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimStart {
    /// Guard acquired and object marked claimed locally
    Started,
    /// A claim on this object is already in flight
    InFlight,
    /// No active round, index out of range, or already claimed
    Unavailable,
}

/// Result of one authoritative poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollResult {
    /// The ledger has never started a round
    NoRound,
    /// A round we had not seen yet
    NewRound { round_id: u64 },
    /// Same round, objects replaced
    Synced { round_id: u64, phase: RoundPhase },
}

pub struct OptimisticReconciler {
    round: Arc<RwLock<RoundState>>,
    guards: Arc<InFlightGuards>,
    me: Address,
}

impl OptimisticReconciler {
    pub fn new(round: Arc<RwLock<RoundState>>, guards: Arc<InFlightGuards>, me: Address) -> Self {
        Self { round, guards, me }
    }

    /// Acquire the claim guard for `index` and mark the object claimed.
    pub fn begin_claim(&self, index: u8) -> ClaimStart {
        let id = ActionId::Claim(index);
        if !self.guards.try_acquire(id) {
            return ClaimStart::InFlight;
        }
        if !self.round.write().mark_claimed_locally(index, self.me) {
            self.guards.release(id);
            return ClaimStart::Unavailable;
        }
        ClaimStart::Started
    }

    /// Undo [`begin_claim`](Self::begin_claim) after the submission was refused
    pub fn abort_claim(&self, index: u8) {
        self.round.write().revert_local_claim(index, self.me);
        self.guards.release(ActionId::Claim(index));
    }

    /// Read the current round from the ledger and replace local state.
    ///
    /// Errors leave local state untouched.
    pub async fn poll_once(&self, ledger: &dyn Ledger) -> Result<PollResult, LedgerError> {
        let round_id = ledger.current_round_id().await?;
        if round_id == 0 {
            return Ok(PollResult::NoRound);
        }
        let snapshot = ledger.round_snapshot(round_id).await?;

        let mut round = self.round.write();
        if round_id < round.round_id {
            // an event for a newer round landed while we were reading
            return Ok(PollResult::Synced {
                round_id: round.round_id,
                phase: round.phase,
            });
        }

        let is_new = round_id > round.round_id;
        round.apply_snapshot(&snapshot);
        if is_new {
            tracing::info!("Poll found round #{}", round_id);
            Ok(PollResult::NewRound { round_id })
        } else {
            tracing::debug!(
                "Poll synced round #{}: {} unclaimed",
                round_id,
                round.unclaimed_count()
            );
            Ok(PollResult::Synced {
                round_id,
                phase: round.phase,
            })
        }
    }
}
