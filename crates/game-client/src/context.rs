//! Session context
//!
//! Every piece of shared session state, constructed once and handed to the
//! components that need it. Ownership of writes:
//! - clock offset: the calibrator
//! - cached nonce: the submitter
//! - guards and pending table: submitter, tracker and reconciler
//! - round state: the event subscriber and the reconciler's poll

use crate::clock::{ClockCalibrator, WallClock};
use crate::config::ClientConfig;
use crate::guards::InFlightGuards;
use crate::identity::SigningIdentity;
use crate::round::{RegenWindow, RoundState};
use crate::scoreboard::Scoreboard;
use crate::tracker::{ConfirmationTracker, LogEntry};
use crate::tx_params::TxParamCache;
use alloy::primitives::{Address, B256};
use ballgame_types::{GameAction, ObjectKind};
use ledger_client::Ledger;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the update channel
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Typed notification for the presentation layer
#[derive(Clone, Debug)]
pub enum SessionUpdate {
    Status(String),
    /// Event stream connected / disconnected
    Liveness(bool),
    RoundStarted {
        round_id: u64,
    },
    RoundEnded {
        round_id: u64,
        ended_by: Address,
    },
    BatchRegenerated {
        round_id: u64,
    },
    ObjectClaimed {
        round_id: u64,
        index: u8,
        actor: Address,
        kind: ObjectKind,
        new_score: u64,
    },
    /// Poll replaced local state
    RoundSynced {
        round_id: u64,
    },
    Submitted {
        action: GameAction,
        tx_hash: B256,
        retried: bool,
    },
    ActionFailed {
        action: GameAction,
        reason: String,
    },
    Logged(LogEntry),
}

/// Shared state of one game session
pub struct SessionContext {
    pub config: ClientConfig,
    pub ledger: Arc<dyn Ledger>,
    pub identity: Arc<SigningIdentity>,
    pub clock: Arc<ClockCalibrator>,
    pub params: Arc<TxParamCache>,
    pub guards: Arc<InFlightGuards>,
    pub tracker: Arc<ConfirmationTracker>,
    pub round: Arc<RwLock<RoundState>>,
    pub regen: Arc<RegenWindow>,
    pub scoreboard: Arc<Scoreboard>,
    live: AtomicBool,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionContext {
    pub fn new(
        config: ClientConfig,
        ledger: Arc<dyn Ledger>,
        identity: SigningIdentity,
        wall: Arc<dyn WallClock>,
    ) -> Self {
        let address = identity.address();
        let guards = Arc::new(InFlightGuards::new());
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            clock: Arc::new(ClockCalibrator::new(wall, config.calibration_samples)),
            params: Arc::new(TxParamCache::new(
                address,
                config.fallback_max_fee_per_gas,
                config.fallback_max_priority_fee_per_gas,
            )),
            tracker: Arc::new(ConfirmationTracker::new(
                guards.clone(),
                config.log_capacity,
                config.pending_capacity,
            )),
            guards,
            round: Arc::new(RwLock::new(RoundState::new())),
            regen: Arc::new(RegenWindow::new(config.regen_window())),
            scoreboard: Arc::new(Scoreboard::new(address)),
            identity: Arc::new(identity),
            ledger,
            config,
            live: AtomicBool::new(false),
            updates,
        }
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Publish an update. Having no listeners is fine.
    pub fn publish(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }

    pub fn status(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{}", text);
        self.publish(SessionUpdate::Status(text));
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn set_live(&self, live: bool) {
        if self.live.swap(live, Ordering::SeqCst) != live {
            self.publish(SessionUpdate::Liveness(live));
        }
    }

    /// Recalibrate the clock in the background. Failures keep the old offset.
    pub fn spawn_calibration(self: &Arc<Self>) {
        let ctx = self.clone();
        tokio::spawn(async move {
            if let Err(e) = ctx.clock.calibrate(&*ctx.ledger).await {
                tracing::warn!("Clock calibration failed, keeping offset {}ms: {}", ctx.clock.offset_ms(), e);
            }
        });
    }
}
