//! Round state machine
//!
//! `NoRound -> Active -> Draining -> Ended -> Active`. Regeneration swaps the
//! object list inside `Active`.

use alloy::primitives::Address;
use ballgame_types::{ObjectKind, POSITION_SCALE};
use ledger_client::{ObjectBatch, RoundSnapshot};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Round lifecycle phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundPhase {
    NoRound,
    Active,
    /// Every object claimed, waiting for the round-ended event
    Draining,
    Ended,
}

/// One claimable object
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectSlot {
    /// Tenths of a percent
    pub x: u16,
    pub y: u16,
    pub kind: ObjectKind,
    pub claimed: bool,
    pub claimed_by: Option<Address>,
}

impl ObjectSlot {
    /// Position in percent of the play field
    pub fn position(&self) -> (f64, f64) {
        (self.x as f64 / POSITION_SCALE, self.y as f64 / POSITION_SCALE)
    }
}

/// Local view of the current round
#[derive(Clone, Debug, PartialEq)]
pub struct RoundState {
    pub round_id: u64,
    /// Ledger time in seconds
    pub start_time: u64,
    pub objects: Vec<ObjectSlot>,
    pub phase: RoundPhase,
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundState {
    pub fn new() -> Self {
        Self {
            round_id: 0,
            start_time: 0,
            objects: Vec::new(),
            phase: RoundPhase::NoRound,
        }
    }

    /// Replace everything with a fresh round
    pub fn start(&mut self, round_id: u64, start_time: u64, batch: &ObjectBatch) {
        self.round_id = round_id;
        self.start_time = start_time;
        self.objects = slots_from_batch(batch);
        self.phase = RoundPhase::Active;
    }

    /// Apply a claim event in place. Stale or out-of-range claims are ignored.
    pub fn apply_claim(&mut self, round_id: u64, index: u8, actor: Address) -> bool {
        if round_id != self.round_id {
            return false;
        }
        let Some(slot) = self.objects.get_mut(index as usize) else {
            return false;
        };
        slot.claimed = true;
        slot.claimed_by = Some(actor);

        if self.phase == RoundPhase::Active && self.unclaimed_count() == 0 {
            self.phase = RoundPhase::Draining;
        }
        true
    }

    /// Close the round. Every object counts as claimed afterwards.
    pub fn end(&mut self, round_id: u64) -> bool {
        if round_id != self.round_id {
            return false;
        }
        for slot in &mut self.objects {
            slot.claimed = true;
        }
        self.phase = RoundPhase::Ended;
        true
    }

    /// Swap in a regenerated batch. The phase stays `Active`.
    pub fn regenerate(&mut self, round_id: u64, start_time: u64, batch: &ObjectBatch) -> bool {
        if round_id != self.round_id || self.phase == RoundPhase::Ended {
            return false;
        }
        self.start_time = start_time;
        self.objects = slots_from_batch(batch);
        self.phase = RoundPhase::Active;
        true
    }

    /// Replace local state with authoritative ledger state
    pub fn apply_snapshot(&mut self, snapshot: &RoundSnapshot) {
        let count = snapshot
            .kinds
            .len()
            .min(snapshot.xs.len())
            .min(snapshot.ys.len());

        self.round_id = snapshot.round_id;
        self.start_time = snapshot.start_time;
        self.objects = (0..count)
            .map(|i| {
                let claimed_by = snapshot.claimed_by.get(i).copied().flatten();
                ObjectSlot {
                    x: snapshot.xs[i],
                    y: snapshot.ys[i],
                    kind: snapshot.kinds[i],
                    claimed: claimed_by.is_some() || !snapshot.active,
                    claimed_by,
                }
            })
            .collect();

        self.phase = if !snapshot.active {
            RoundPhase::Ended
        } else if self.unclaimed_count() == 0 {
            RoundPhase::Draining
        } else {
            RoundPhase::Active
        };
    }

    /// Optimistically mark an object claimed by `actor`
    pub fn mark_claimed_locally(&mut self, index: u8, actor: Address) -> bool {
        if self.phase != RoundPhase::Active {
            return false;
        }
        match self.objects.get_mut(index as usize) {
            Some(slot) if !slot.claimed => {
                slot.claimed = true;
                slot.claimed_by = Some(actor);
                true
            }
            _ => false,
        }
    }

    /// Undo an optimistic mark made by `actor`
    pub fn revert_local_claim(&mut self, index: u8, actor: Address) {
        if let Some(slot) = self.objects.get_mut(index as usize) {
            if slot.claimed_by == Some(actor) && self.phase == RoundPhase::Active {
                slot.claimed = false;
                slot.claimed_by = None;
            }
        }
    }

    pub fn unclaimed_count(&self) -> usize {
        self.objects.iter().filter(|o| !o.claimed).count()
    }

    /// Active or draining
    pub fn is_running(&self) -> bool {
        matches!(self.phase, RoundPhase::Active | RoundPhase::Draining)
    }

    /// Milliseconds left in the round at ledger time `now_ms`
    pub fn remaining_ms(&self, now_ms: i64, duration_ms: u64) -> u64 {
        if !self.is_running() {
            return 0;
        }
        let elapsed = now_ms - self.start_time as i64 * 1000;
        (duration_ms as i64 - elapsed.max(0)).max(0) as u64
    }
}

fn slots_from_batch(batch: &ObjectBatch) -> Vec<ObjectSlot> {
    batch
        .xs
        .iter()
        .zip(&batch.ys)
        .zip(&batch.kinds)
        .map(|((x, y), kind)| ObjectSlot {
            x: *x,
            y: *y,
            kind: *kind,
            claimed: false,
            claimed_by: None,
        })
        .collect()
}

/// Shared regeneration animation window.
///
/// Opened by whichever signal arrives first (local action or remote event);
/// later signals inside the window join it instead of starting another.
/// A window nobody closed lapses once its duration has passed.
#[derive(Debug)]
pub struct RegenWindow {
    duration: Duration,
    opened_at: Mutex<Option<Instant>>,
}

impl RegenWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            opened_at: Mutex::new(None),
        }
    }

    /// Open the window. Returns false if one is already running.
    pub fn open(&self, now: Instant) -> bool {
        let mut opened = self.opened_at.lock();
        if let Some(at) = *opened {
            if now.saturating_duration_since(at) < self.duration {
                return false;
            }
        }
        *opened = Some(now);
        true
    }

    /// Time left before the animation completes
    pub fn remaining(&self, now: Instant) -> Duration {
        match *self.opened_at.lock() {
            Some(at) => self.duration.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    /// Whether an animation is in progress at `now`
    pub fn is_active(&self, now: Instant) -> bool {
        !self.remaining(now).is_zero()
    }

    /// Close the window early
    pub fn close(&self) {
        *self.opened_at.lock() = None;
    }
}
