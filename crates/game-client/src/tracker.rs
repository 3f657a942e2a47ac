//! Dual-Channel Confirmation Tracker
//!
//! A submitted action is confirmed by two independent signals: the node's
//! broadcast acknowledgment and the ledger event carrying its effect. They
//! race. Each write path sets only its own timestamp and then checks whether
//! both are present, so the merge is order-independent and every action
//! lands in the log exactly once.

use crate::guards::InFlightGuards;
use alloy::primitives::Address;
use ballgame_types::ActionId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One in-flight local action
#[derive(Clone, Debug)]
pub struct PendingAction {
    pub action_id: ActionId,
    pub actor: Address,
    pub submitted_at: Instant,
    pub broadcast_ack_at: Option<Instant>,
    pub event_observed_at: Option<Instant>,
}

impl PendingAction {
    pub fn is_complete(&self) -> bool {
        self.broadcast_ack_at.is_some() && self.event_observed_at.is_some()
    }
}

/// Who produced a log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Submitted by this client
    Local,
    /// Observed on the stream only
    Remote,
}

/// A row of the confirmation log
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub action_id: ActionId,
    pub actor: Address,
    /// Outcome text carried by the event, e.g. "Special (+3)"
    pub outcome: String,
    pub origin: EntryOrigin,
    pub submitted_at: Option<Instant>,
    pub broadcast_ack_at: Option<Instant>,
    pub event_observed_at: Option<Instant>,
}

impl LogEntry {
    /// `broadcast_ack_at - submitted_at`
    pub fn confirmation_latency(&self) -> Option<Duration> {
        Some(self.broadcast_ack_at?.saturating_duration_since(self.submitted_at?))
    }

    /// `event_observed_at - submitted_at`
    pub fn observed_latency(&self) -> Option<Duration> {
        Some(self.event_observed_at?.saturating_duration_since(self.submitted_at?))
    }

    pub fn is_complete(&self) -> bool {
        match self.origin {
            EntryOrigin::Local => self.broadcast_ack_at.is_some() && self.event_observed_at.is_some(),
            EntryOrigin::Remote => true,
        }
    }
}

/// What the event path knows about an action
#[derive(Clone, Debug)]
pub struct EventObservation {
    /// Actor named by the event. Claims only match a pending action of the
    /// same actor; round-level actions match regardless.
    pub actor: Option<Address>,
    pub outcome: String,
    pub at: Instant,
}

#[derive(Default)]
struct TrackerState {
    pending: HashMap<ActionId, PendingAction>,
    /// Most recent first
    log: VecDeque<LogEntry>,
}

/// Correlates broadcast acks and ledger events per [`ActionId`]
pub struct ConfirmationTracker {
    state: Mutex<TrackerState>,
    guards: Arc<InFlightGuards>,
    log_capacity: usize,
    pending_capacity: usize,
}

impl ConfirmationTracker {
    pub fn new(guards: Arc<InFlightGuards>, log_capacity: usize, pending_capacity: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            guards,
            log_capacity: log_capacity.max(1),
            pending_capacity: pending_capacity.max(1),
        }
    }

    /// Register a new pending action. Returns false if one already exists
    /// for `action_id`.
    pub fn register(&self, action_id: ActionId, actor: Address, submitted_at: Instant) -> bool {
        let mut state = self.state.lock();
        if state.pending.contains_key(&action_id) {
            return false;
        }

        if state.pending.len() >= self.pending_capacity {
            let oldest = state
                .pending
                .values()
                .min_by_key(|p| p.submitted_at)
                .map(|p| p.action_id);
            if let Some(oldest) = oldest {
                state.pending.remove(&oldest);
                self.guards.release(oldest);
                tracing::warn!("Pending table full, evicted {}", oldest);
            }
        }

        state.pending.insert(
            action_id,
            PendingAction {
                action_id,
                actor,
                submitted_at,
                broadcast_ack_at: None,
                event_observed_at: None,
            },
        );
        true
    }

    /// Whether `action_id` awaits a confirmation signal
    pub fn is_pending(&self, action_id: ActionId) -> bool {
        self.state.lock().pending.contains_key(&action_id)
    }

    /// Copy of the pending record for `action_id`
    pub fn pending(&self, action_id: ActionId) -> Option<PendingAction> {
        self.state.lock().pending.get(&action_id).cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Broadcast path. Returns the log entry if this ack completed the action.
    pub fn record_broadcast_ack(&self, action_id: ActionId, at: Instant) -> Option<LogEntry> {
        let mut state = self.state.lock();
        let pending = state.pending.get_mut(&action_id)?;
        if pending.broadcast_ack_at.is_some() {
            return None;
        }
        pending.broadcast_ack_at = Some(at);
        if pending.event_observed_at.is_none() {
            return None;
        }

        // The event got here first and already wrote the log entry
        let submitted_at = pending.submitted_at;
        state.pending.remove(&action_id);
        self.guards.release(action_id);

        let entry = state.log.iter_mut().find(|e| {
            e.action_id == action_id
                && e.origin == EntryOrigin::Local
                && e.submitted_at == Some(submitted_at)
        })?;
        entry.broadcast_ack_at = Some(at);
        Some(entry.clone())
    }

    /// Event path. Returns the log entry written or updated, if any.
    pub fn record_event(&self, action_id: ActionId, observation: EventObservation) -> Option<LogEntry> {
        let mut state = self.state.lock();

        let matches = state.pending.get(&action_id).is_some_and(|p| {
            !action_id.is_claim() || observation.actor.map_or(true, |actor| actor == p.actor)
        });

        if !matches {
            if !action_id.is_claim() {
                return None;
            }
            let entry = LogEntry {
                action_id,
                actor: observation.actor.unwrap_or(Address::ZERO),
                outcome: observation.outcome,
                origin: EntryOrigin::Remote,
                submitted_at: None,
                broadcast_ack_at: None,
                event_observed_at: Some(observation.at),
            };
            self.push_log(&mut state, entry.clone());
            return Some(entry);
        }

        let pending = state.pending.get_mut(&action_id)?;
        if pending.event_observed_at.is_some() {
            return None;
        }
        pending.event_observed_at = Some(observation.at);

        let entry = LogEntry {
            action_id,
            actor: observation.actor.unwrap_or(pending.actor),
            outcome: observation.outcome,
            origin: EntryOrigin::Local,
            submitted_at: Some(pending.submitted_at),
            broadcast_ack_at: pending.broadcast_ack_at,
            event_observed_at: Some(observation.at),
        };

        if pending.broadcast_ack_at.is_some() {
            state.pending.remove(&action_id);
            self.guards.release(action_id);
        }
        self.push_log(&mut state, entry.clone());
        Some(entry)
    }

    /// Drop a pending action after a terminal failure and release its guard
    pub fn discard(&self, action_id: ActionId) -> Option<PendingAction> {
        let mut state = self.state.lock();
        let removed = state.pending.remove(&action_id);
        self.guards.release(action_id);
        removed
    }

    /// Evict pending actions older than `ttl`, releasing their guards
    pub fn evict_expired(&self, now: Instant, ttl: Duration) -> Vec<ActionId> {
        let mut state = self.state.lock();
        let expired: Vec<ActionId> = state
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.submitted_at) >= ttl)
            .map(|p| p.action_id)
            .collect();

        for id in &expired {
            state.pending.remove(id);
            self.guards.release(*id);
            tracing::debug!("Pending action {} expired", id);
        }
        expired
    }

    /// Forget pending claims (their batch is gone)
    pub fn drop_claims(&self) {
        let mut state = self.state.lock();
        state.pending.retain(|id, _| !id.is_claim());
    }

    /// Forget everything from the previous round except a pending start
    pub fn reset_round(&self) {
        let mut state = self.state.lock();
        state.pending.retain(|id, _| *id == ActionId::StartRound);
    }

    /// Log snapshot, most recent first
    pub fn log(&self) -> Vec<LogEntry> {
        self.state.lock().log.iter().cloned().collect()
    }

    fn push_log(&self, state: &mut TrackerState, entry: LogEntry) {
        state.log.push_front(entry);
        state.log.truncate(self.log_capacity);
    }
}
