//! Game session
//!
//! Owns the session context and its components, accepts user intents, and
//! runs the cooperative loop over stream messages, the authoritative poll,
//! the countdown tick and scoreboard refreshes.

use crate::clock::WallClock;
use crate::config::ClientConfig;
use crate::context::{SessionContext, SessionUpdate};
use crate::error::SessionError;
use crate::identity::SigningIdentity;
use crate::reconciler::{ClaimStart, OptimisticReconciler, PollResult};
use crate::round::{RoundPhase, RoundState};
use crate::submitter::{PreparedTx, RawSubmitter, SubmitOutcome};
use crate::subscriber::EventSubscriber;
use crate::tracker::LogEntry;
use alloy::primitives::{Address, U256};
use ballgame_types::{ActionId, GameAction};
use ledger_client::{Ledger, StreamMessage};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Snapshot of everything the presentation layer shows
#[derive(Clone, Debug)]
pub struct SessionView {
    pub round: RoundState,
    pub my_score: u64,
    pub balance: Option<U256>,
    pub leaderboard: Vec<(Address, u64)>,
    pub log: Vec<LogEntry>,
    /// Event stream connected
    pub live: bool,
    pub remaining_ms: u64,
    pub regenerating: bool,
    pub clock_offset_ms: i64,
}

/// Handle of a spawned broadcast, `None` when the intent was a no-op
pub type Submission = Option<JoinHandle<SubmitOutcome>>;

pub struct GameSession {
    ctx: Arc<SessionContext>,
    submitter: Arc<RawSubmitter>,
    reconciler: OptimisticReconciler,
    subscriber: EventSubscriber,
}

impl GameSession {
    pub fn new(
        config: ClientConfig,
        ledger: Arc<dyn Ledger>,
        identity: SigningIdentity,
        wall: Arc<dyn WallClock>,
    ) -> Arc<Self> {
        let contract = config.contract;
        let chain_id = config.chain_id;
        let ctx = Arc::new(SessionContext::new(config, ledger, identity, wall));

        let submitter = Arc::new(RawSubmitter::new(
            ctx.ledger.clone(),
            ctx.identity.clone(),
            ctx.params.clone(),
            ctx.tracker.clone(),
            contract,
            chain_id,
        ));
        let reconciler = OptimisticReconciler::new(ctx.round.clone(), ctx.guards.clone(), ctx.address());
        let subscriber = EventSubscriber::new(ctx.clone());

        Arc::new(Self {
            ctx,
            submitter,
            reconciler,
            subscriber,
        })
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn address(&self) -> Address {
        self.ctx.address()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.ctx.subscribe()
    }

    /// Prime the param cache, clock, round state and scores
    pub async fn initialize(&self) {
        tracing::info!(
            "Session for {} on chain {} (contract {})",
            self.address(),
            self.ctx.config.chain_id,
            self.ctx.config.contract
        );
        let ledger = &*self.ctx.ledger;

        // failures are logged by the cache and leave it not ready
        let _ = self.ctx.params.refresh(ledger).await;
        if let Err(e) = self.ctx.clock.calibrate(ledger).await {
            tracing::warn!("Initial clock calibration failed: {}", e);
        }
        self.poll().await;
        self.ctx.scoreboard.refresh(ledger).await;
    }

    /// Claim object `index`. A second claim while one is in flight is a no-op.
    pub fn claim(self: &Arc<Self>, index: u8) -> Result<Submission, SessionError> {
        if self.ctx.regen.is_active(Instant::now()) {
            return Err(SessionError::ObjectUnavailable(index));
        }
        match self.reconciler.begin_claim(index) {
            ClaimStart::InFlight => {
                tracing::debug!("Claim of {} already in flight", index);
                return Ok(None);
            }
            ClaimStart::Unavailable => return Err(SessionError::ObjectUnavailable(index)),
            ClaimStart::Started => {}
        }

        match self.submitter.prepare(GameAction::Claim { index }) {
            Ok(prepared) => Ok(Some(self.spawn_broadcast(prepared))),
            Err(e) => {
                self.reconciler.abort_claim(index);
                self.ctx.status(format!("Claim of ball {} refused: {}", index, e));
                Err(e.into())
            }
        }
    }

    pub fn start_round(self: &Arc<Self>) -> Result<Submission, SessionError> {
        self.submit_guarded(GameAction::StartRound)
    }

    pub fn end_round(self: &Arc<Self>) -> Result<Submission, SessionError> {
        self.submit_guarded(GameAction::EndRound)
    }

    /// Regenerate the batch and open the shared animation window
    pub fn regenerate(self: &Arc<Self>) -> Result<Submission, SessionError> {
        let submission = self.submit_guarded(GameAction::RegenerateBatch)?;
        if submission.is_some() {
            self.ctx.regen.open(Instant::now());
        }
        Ok(submission)
    }

    fn submit_guarded(self: &Arc<Self>, action: GameAction) -> Result<Submission, SessionError> {
        let id = action.action_id();
        if !self.ctx.guards.try_acquire(id) {
            tracing::debug!("{} already in flight", action);
            return Ok(None);
        }
        match self.submitter.prepare(action) {
            Ok(prepared) => Ok(Some(self.spawn_broadcast(prepared))),
            Err(e) => {
                self.ctx.guards.release(id);
                self.ctx.status(format!("{} refused: {}", action, e));
                Err(e.into())
            }
        }
    }

    fn spawn_broadcast(self: &Arc<Self>, prepared: PreparedTx) -> JoinHandle<SubmitOutcome> {
        let session = self.clone();
        tokio::spawn(async move {
            let outcome = session.submitter.broadcast(prepared).await;
            session.on_outcome(&outcome);
            outcome
        })
    }

    fn on_outcome(&self, outcome: &SubmitOutcome) {
        match outcome {
            SubmitOutcome::Accepted { action, tx_hash, .. } => {
                self.ctx.publish(SessionUpdate::Submitted {
                    action: *action,
                    tx_hash: *tx_hash,
                    retried: false,
                });
            }
            SubmitOutcome::AcceptedAfterRetry { action, tx_hash, .. } => {
                self.ctx.publish(SessionUpdate::Submitted {
                    action: *action,
                    tx_hash: *tx_hash,
                    retried: true,
                });
            }
            SubmitOutcome::ConfirmedByEvent {
                action,
                broadcast_error,
            } => {
                // the event already applied the effect, keep it
                self.ctx
                    .status(format!("{} confirmed on chain despite broadcast error: {}", action, broadcast_error));
            }
            SubmitOutcome::Failed { action, reason } => {
                match action {
                    GameAction::Claim { index } => {
                        self.ctx.round.write().revert_local_claim(*index, self.address());
                    }
                    GameAction::RegenerateBatch => self.ctx.regen.close(),
                    GameAction::StartRound | GameAction::EndRound => {}
                }
                self.ctx.status(format!("{} failed: {}", action, reason));
                self.ctx.publish(SessionUpdate::ActionFailed {
                    action: *action,
                    reason: reason.clone(),
                });
            }
        }
    }

    /// Route one stream message
    pub async fn handle_stream_message(&self, message: StreamMessage) {
        match message {
            StreamMessage::Connected => {
                self.subscriber.on_connected();
                self.poll().await;
            }
            StreamMessage::Event(event) => self.subscriber.on_event(event).await,
            StreamMessage::Disconnected { reason } => self.subscriber.on_disconnected(&reason),
        }
    }

    /// Authoritative poll. Read errors are logged and leave state as is.
    pub async fn poll(&self) {
        let ledger = &*self.ctx.ledger;
        if !self.ctx.params.is_ready() {
            let _ = self.ctx.params.refresh(ledger).await;
        }

        match self.reconciler.poll_once(ledger).await {
            Ok(PollResult::NewRound { round_id }) => {
                self.ctx.guards.reset_round();
                self.ctx.tracker.reset_round();
                self.ctx.regen.close();
                self.ctx.spawn_calibration();
                self.observe_claimants();
                self.ctx.publish(SessionUpdate::RoundStarted { round_id });
            }
            Ok(PollResult::Synced { round_id, .. }) => {
                self.observe_claimants();
                self.ctx.publish(SessionUpdate::RoundSynced { round_id });
            }
            Ok(PollResult::NoRound) => {}
            Err(e) => tracing::warn!("Round poll failed: {}", e),
        }
        self.ctx.scoreboard.refresh_mine(ledger).await;
    }

    /// Put every claimant of the current round on the scoreboard
    fn observe_claimants(&self) {
        let claimants: Vec<Address> = self
            .ctx
            .round
            .read()
            .objects
            .iter()
            .filter_map(|slot| slot.claimed_by)
            .collect();
        for player in claimants {
            self.ctx.scoreboard.observe(player);
        }
    }

    /// Expire stale pending actions and run the autonomous round checks
    pub fn maintain(self: &Arc<Self>) {
        let now = Instant::now();
        self.ctx.tracker.evict_expired(now, self.ctx.config.pending_ttl());
        if !self.ctx.params.is_ready() {
            return;
        }

        let (phase, unclaimed, remaining_ms) = {
            let round = self.ctx.round.read();
            (
                round.phase,
                round.unclaimed_count(),
                round.remaining_ms(self.ctx.clock.now_ms(), self.ctx.config.round_duration_ms),
            )
        };
        let guards = &self.ctx.guards;

        if matches!(phase, RoundPhase::Active | RoundPhase::Draining) && remaining_ms == 0 {
            if !guards.is_held(ActionId::EndRound) {
                tracing::info!("Round time is up, ending round");
                // refusals are reported through status
                let _ = self.end_round();
            }
            return;
        }

        if phase == RoundPhase::Active
            && unclaimed > 0
            && unclaimed < self.ctx.config.regen_threshold
            && !self.ctx.regen.is_active(now)
            && !guards.is_held(ActionId::EndRound)
            && !guards.is_held(ActionId::Regenerate)
        {
            tracing::info!("{} balls left, regenerating", unclaimed);
            let _ = self.regenerate();
        }
    }

    /// Run until `shutdown` resolves
    pub async fn run<F>(self: Arc<Self>, mut events: mpsc::Receiver<StreamMessage>, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let config = &self.ctx.config;
        let mut poll = tokio::time::interval(config.poll_interval());
        let mut countdown = tokio::time::interval(config.countdown_tick());
        let mut scoreboard = tokio::time::interval(config.scoreboard_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);
        scoreboard.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Session stopping");
                    break;
                }
                message = events.recv(), if events_open => match message {
                    Some(message) => {
                        self.handle_stream_message(message).await;
                        self.maintain();
                    }
                    None => {
                        events_open = false;
                        self.ctx.set_live(false);
                    }
                },
                _ = poll.tick() => {
                    if self.ctx.regen.is_active(Instant::now()) {
                        tracing::debug!("Poll skipped during regeneration");
                    } else {
                        self.poll().await;
                        self.maintain();
                    }
                }
                _ = countdown.tick() => self.maintain(),
                _ = scoreboard.tick() => {
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move { ctx.scoreboard.refresh(&*ctx.ledger).await });
                }
            }
        }
    }

    pub fn view(&self) -> SessionView {
        let round = self.ctx.round.read().clone();
        let remaining_ms = round.remaining_ms(self.ctx.clock.now_ms(), self.ctx.config.round_duration_ms);
        SessionView {
            my_score: self.ctx.scoreboard.my_score(),
            balance: self.ctx.scoreboard.balance(),
            leaderboard: self.ctx.scoreboard.entries(),
            log: self.ctx.tracker.log(),
            live: self.ctx.is_live(),
            remaining_ms,
            regenerating: self.ctx.regen.is_active(Instant::now()),
            clock_offset_ms: self.ctx.clock.offset_ms(),
            round,
        }
    }
}
