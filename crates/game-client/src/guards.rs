//! In-flight action guards
//!
//! At most one attempt per [`ActionId`] may be outstanding.

use ballgame_types::ActionId;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct InFlightGuards {
    held: Mutex<HashSet<ActionId>>,
}

impl InFlightGuards {
    /// Create an empty guard set
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the action is already in flight
    pub fn try_acquire(&self, id: ActionId) -> bool {
        self.held.lock().insert(id)
    }

    /// Release a guard. Returns false if it was not held.
    pub fn release(&self, id: ActionId) -> bool {
        self.held.lock().remove(&id)
    }

    /// Whether an attempt for `id` is outstanding
    pub fn is_held(&self, id: ActionId) -> bool {
        self.held.lock().contains(&id)
    }

    /// Drop every claim guard (the batch they targeted is gone)
    pub fn clear_claims(&self) {
        self.held.lock().retain(|id| !id.is_claim());
    }

    /// Drop every guard that belongs to the previous round. A pending
    /// start-round survives, it completes through the tracker.
    pub fn reset_round(&self) {
        self.held.lock().retain(|id| *id == ActionId::StartRound);
    }

    /// Number of guards currently held
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails() {
        let guards = InFlightGuards::new();
        assert!(guards.try_acquire(ActionId::Claim(7)));
        assert!(!guards.try_acquire(ActionId::Claim(7)));
        assert!(guards.try_acquire(ActionId::Claim(8)));

        assert!(guards.release(ActionId::Claim(7)));
        assert!(guards.try_acquire(ActionId::Claim(7)));
    }

    #[test]
    fn test_round_reset_keeps_start() {
        let guards = InFlightGuards::new();
        guards.try_acquire(ActionId::StartRound);
        guards.try_acquire(ActionId::EndRound);
        guards.try_acquire(ActionId::Regenerate);
        guards.try_acquire(ActionId::Claim(1));

        guards.clear_claims();
        assert!(!guards.is_held(ActionId::Claim(1)));
        assert!(guards.is_held(ActionId::Regenerate));

        guards.reset_round();
        assert_eq!(guards.len(), 1);
        assert!(guards.is_held(ActionId::StartRound));
    }
}
