//! Live Event Subscriber
//!
//! Applies stream messages to the session: round state transitions,
//! confirmation tracking, scores and liveness.

use crate::context::{SessionContext, SessionUpdate};
use crate::tracker::EventObservation;
use ballgame_types::ActionId;
use ledger_client::{GameEvent, ObjectBatch};
use std::sync::Arc;
use tokio::time::Instant;

pub struct EventSubscriber {
    ctx: Arc<SessionContext>,
}

impl EventSubscriber {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// A fresh connection is a resynchronization point. Guards of the
    /// current round stay held; the poll that follows drops those of an
    /// older round.
    pub fn on_connected(&self) {
        self.ctx.set_live(true);
        self.ctx.spawn_calibration();
        tracing::info!("Event stream live");
    }

    pub fn on_disconnected(&self, reason: &str) {
        self.ctx.set_live(false);
        self.ctx.status(format!("Event stream lost ({}), polling only", reason));
    }

    pub async fn on_event(&self, event: GameEvent) {
        tracing::debug!("Event: {:?}", event);
        match event {
            GameEvent::RoundStarted {
                round_id,
                start_time,
                batch,
            } => self.round_started(round_id, start_time, &batch),
            GameEvent::ObjectClaimed {
                round_id,
                index,
                actor,
                kind,
                new_score,
            } => {
                let applied = self.ctx.round.write().apply_claim(round_id, index, actor);
                if !applied {
                    tracing::debug!("Ignoring claim of {} for round #{}", index, round_id);
                    return;
                }
                self.ctx.scoreboard.apply_claim(actor, new_score);
                self.track(
                    ActionId::Claim(index),
                    EventObservation {
                        actor: Some(actor),
                        outcome: kind.to_string(),
                        at: Instant::now(),
                    },
                );
                self.ctx.publish(SessionUpdate::ObjectClaimed {
                    round_id,
                    index,
                    actor,
                    kind,
                    new_score,
                });
            }
            GameEvent::RoundEnded { round_id, ended_by } => {
                if !self.ctx.round.write().end(round_id) {
                    tracing::debug!("Ignoring end of round #{}", round_id);
                    return;
                }
                self.ctx.guards.clear_claims();
                self.ctx.tracker.drop_claims();
                self.ctx.regen.close();
                self.track(
                    ActionId::EndRound,
                    EventObservation {
                        actor: Some(ended_by),
                        outcome: format!("round #{} ended", round_id),
                        at: Instant::now(),
                    },
                );
                self.ctx.publish(SessionUpdate::RoundEnded { round_id, ended_by });
                self.ctx.status(format!("Round #{} ended", round_id));
            }
            GameEvent::BatchRegenerated {
                round_id,
                start_time,
                batch,
            } => self.batch_regenerated(round_id, start_time, &batch).await,
        }
    }

    fn round_started(&self, round_id: u64, start_time: u64, batch: &ObjectBatch) {
        let (current, seen) = {
            let round = self.ctx.round.read();
            (round.round_id, round.phase != crate::round::RoundPhase::NoRound)
        };
        if round_id < current {
            tracing::debug!("Ignoring stale start of round #{}", round_id);
            return;
        }

        let observation = EventObservation {
            actor: None,
            outcome: format!("round #{} started", round_id),
            at: Instant::now(),
        };
        if round_id == current && seen {
            // the poll already picked this round up
            self.track(ActionId::StartRound, observation);
            return;
        }

        self.track(ActionId::StartRound, observation);
        self.ctx.guards.reset_round();
        self.ctx.tracker.reset_round();
        self.ctx.regen.close();
        self.ctx.round.write().start(round_id, start_time, batch);
        self.ctx.spawn_calibration();

        self.ctx.publish(SessionUpdate::RoundStarted { round_id });
        self.ctx
            .status(format!("Round #{} started with {} balls", round_id, batch.len()));
    }

    async fn batch_regenerated(&self, round_id: u64, start_time: u64, batch: &ObjectBatch) {
        let current = self.ctx.round.read().round_id;
        if round_id != current {
            tracing::debug!("Ignoring regeneration for round #{}", round_id);
            return;
        }

        self.ctx.guards.clear_claims();
        self.ctx.tracker.drop_claims();

        let now = Instant::now();
        if !self.ctx.regen.open(now) {
            tracing::debug!("Joining regeneration animation already in progress");
        }
        self.track(
            ActionId::Regenerate,
            EventObservation {
                actor: None,
                outcome: "balls regenerated".to_string(),
                at: now,
            },
        );

        let wait = self.ctx.regen.remaining(now);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let applied = self.ctx.round.write().regenerate(round_id, start_time, batch);
        self.ctx.regen.close();
        if !applied {
            return;
        }
        self.ctx.spawn_calibration();
        self.ctx.publish(SessionUpdate::BatchRegenerated { round_id });
        self.ctx.status("New balls generated!");
    }

    fn track(&self, action_id: ActionId, observation: EventObservation) {
        if let Some(entry) = self.ctx.tracker.record_event(action_id, observation) {
            self.ctx.publish(SessionUpdate::Logged(entry));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::identity::SigningIdentity;
    use crate::round::RoundPhase;
    use crate::testing::{batch, ManualClock, ScriptedLedger};
    use alloy::primitives::Address;
    use ballgame_types::ObjectKind;
    use std::time::Duration;

    fn subscriber() -> (EventSubscriber, Arc<SessionContext>) {
        let ctx = Arc::new(SessionContext::new(
            ClientConfig::default(),
            Arc::new(ScriptedLedger::new()),
            SigningIdentity::random(),
            Arc::new(ManualClock::new(1_700_000_000_000, 0)),
        ));
        (EventSubscriber::new(ctx.clone()), ctx)
    }

    fn started(round_id: u64) -> GameEvent {
        GameEvent::RoundStarted {
            round_id,
            start_time: 1_700_000_000,
            batch: batch(50),
        }
    }

    fn claimed(round_id: u64, index: u8, actor: Address) -> GameEvent {
        GameEvent::ObjectClaimed {
            round_id,
            index,
            actor,
            kind: ObjectKind::Special,
            new_score: 3,
        }
    }

    #[tokio::test]
    async fn test_round_start_resets_stale_guards() {
        let (subscriber, ctx) = subscriber();
        subscriber.on_event(started(1)).await;
        ctx.guards.try_acquire(ActionId::Claim(4));
        ctx.guards.try_acquire(ActionId::EndRound);

        subscriber.on_event(started(2)).await;
        assert!(ctx.guards.is_empty());
        assert_eq!(ctx.round.read().round_id, 2);

        // a claim in the new round is not blocked
        subscriber.on_event(claimed(2, 4, Address::repeat_byte(9))).await;
        assert!(ctx.round.read().objects[4].claimed);
        assert_eq!(ctx.scoreboard.score_of(Address::repeat_byte(9)), 3);
    }

    #[tokio::test]
    async fn test_stale_claim_ignored() {
        let (subscriber, ctx) = subscriber();
        let rival = Address::repeat_byte(9);
        subscriber.on_event(started(3)).await;
        ctx.scoreboard.apply_claim(rival, 10);

        // carries new_score 3 from the older round
        subscriber.on_event(claimed(2, 1, rival)).await;
        assert_eq!(ctx.round.read().unclaimed_count(), 50);
        assert!(ctx.tracker.log().is_empty());
        assert_eq!(ctx.scoreboard.score_of(rival), 10);
    }

    #[tokio::test]
    async fn test_end_moves_to_ended() {
        let (subscriber, ctx) = subscriber();
        let mut updates = ctx.subscribe();
        subscriber.on_event(started(1)).await;
        subscriber
            .on_event(GameEvent::RoundEnded {
                round_id: 1,
                ended_by: Address::repeat_byte(3),
            })
            .await;

        assert_eq!(ctx.round.read().phase, RoundPhase::Ended);
        let mut saw_end = false;
        while let Ok(update) = updates.try_recv() {
            saw_end |= matches!(update, SessionUpdate::RoundEnded { round_id: 1, .. });
        }
        assert!(saw_end);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regeneration_waits_for_shared_window() {
        let (subscriber, ctx) = subscriber();
        subscriber.on_event(started(1)).await;
        subscriber.on_event(claimed(1, 0, Address::repeat_byte(9))).await;

        // a local regenerate opened the window 500ms ago
        ctx.regen.open(Instant::now());
        tokio::time::advance(Duration::from_millis(500)).await;

        let t0 = Instant::now();
        subscriber
            .on_event(GameEvent::BatchRegenerated {
                round_id: 1,
                start_time: 1_700_000_020,
                batch: batch(50),
            })
            .await;

        assert_eq!(t0.elapsed(), Duration::from_millis(1_500));
        let round = ctx.round.read();
        assert_eq!(round.unclaimed_count(), 50);
        assert_eq!(round.start_time, 1_700_000_020);
        assert_eq!(round.phase, RoundPhase::Active);
        assert!(!ctx.regen.is_active(Instant::now()));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_toggle_liveness() {
        let (subscriber, ctx) = subscriber();
        let me = ctx.address();
        ctx.guards.try_acquire(ActionId::Claim(1));
        ctx.tracker.register(ActionId::Claim(1), me, Instant::now());

        // a reconnect in the middle of a round keeps in-flight claims
        subscriber.on_connected();
        assert!(ctx.is_live());
        assert!(ctx.guards.is_held(ActionId::Claim(1)));
        assert!(ctx.tracker.is_pending(ActionId::Claim(1)));

        subscriber.on_disconnected("reset");
        assert!(!ctx.is_live());
    }
}
