//! Session driver
//!
//! Background tasks around a running [`GameSession`]: event stream
//! supervision with reconnects, update logging and automatic play.

use alloy::primitives::Address;
use game_client::{EntryOrigin, GameSession, LogEntry, RoundPhase, SessionUpdate};
use ledger_client::{EventStream, StreamMessage};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};

/// How often a live stream handle is checked in case an update was missed
const LIVENESS_CHECK: Duration = Duration::from_secs(1);

/// Keep an event stream connected until shutdown.
///
/// A stream that drops is reopened after `reconnect`; with `None` the
/// session carries on with polling alone.
pub async fn supervise_stream(
    ws_url: String,
    contract: Address,
    session: Arc<GameSession>,
    sink: mpsc::Sender<StreamMessage>,
    reconnect: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut updates = session.subscribe();

    loop {
        match EventStream::connect(&ws_url, contract, sink.clone()).await {
            Ok(stream) => {
                let mut check = tokio::time::interval(LIVENESS_CHECK);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            stream.close();
                            return;
                        }
                        update = updates.recv() => match update {
                            Ok(SessionUpdate::Liveness(false)) => break,
                            Ok(_) | Err(RecvError::Lagged(_)) => {}
                            Err(RecvError::Closed) => return,
                        },
                        _ = check.tick() => {
                            if !stream.is_live() {
                                break;
                            }
                        }
                    }
                }
                stream.close();
            }
            Err(e) => tracing::warn!("Event stream connect to {} failed: {}", ws_url, e),
        }

        let Some(delay) = reconnect else {
            tracing::info!("Reconnect disabled, following the game by polling only");
            let _ = shutdown.changed().await;
            return;
        };
        tracing::info!("Reconnecting event stream in {}s", delay.as_secs());
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Log session updates until the session goes away
pub async fn print_updates(session: Arc<GameSession>) {
    let me = session.address();
    let mut updates = session.subscribe();

    loop {
        let update = match updates.recv().await {
            Ok(update) => update,
            Err(RecvError::Lagged(n)) => {
                tracing::debug!("Skipped {} updates", n);
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        match update {
            // already logged when published
            SessionUpdate::Status(_) => {}
            SessionUpdate::Liveness(live) => {
                tracing::info!("Event stream {}", if live { "live" } else { "down" });
            }
            SessionUpdate::RoundStarted { .. }
            | SessionUpdate::RoundEnded { .. }
            | SessionUpdate::BatchRegenerated { .. } => {}
            SessionUpdate::ObjectClaimed {
                index,
                actor,
                kind,
                new_score,
                ..
            } => {
                let who = if actor == me { "You".to_string() } else { short(actor) };
                tracing::info!("{} claimed ball {} ({}), score {}", who, index, kind, new_score);
            }
            SessionUpdate::RoundSynced { round_id } => tracing::debug!("Synced round #{}", round_id),
            SessionUpdate::Submitted {
                action,
                tx_hash,
                retried,
            } => {
                let note = if retried { " after nonce retry" } else { "" };
                tracing::info!("{} sent{}: {}", action, note, tx_hash);
            }
            SessionUpdate::ActionFailed { .. } => {}
            SessionUpdate::Logged(entry) => tracing::info!("{}", describe(&entry)),
        }
    }
}

/// Claim a random unclaimed ball every `interval` while a round is active
pub async fn autoplay(session: Arc<GameSession>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {}
        }

        let view = session.view();
        if view.round.phase != RoundPhase::Active || view.regenerating {
            continue;
        }
        let open: Vec<u8> = view
            .round
            .objects
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.claimed)
            .map(|(index, _)| index as u8)
            .collect();
        let Some(&index) = open.choose(&mut rand::thread_rng()) else {
            continue;
        };

        match session.claim(index) {
            Ok(Some(_)) => tracing::debug!("Claiming ball {}", index),
            Ok(None) => {}
            Err(e) => tracing::debug!("Claim of ball {} skipped: {}", index, e),
        }
    }
}

fn short(address: Address) -> String {
    let hex = address.to_string();
    format!("{}...{}", &hex[..6], &hex[hex.len() - 4..])
}

/// One log line for a confirmation entry
fn describe(entry: &LogEntry) -> String {
    let mut line = format!("[{}] {} by {}", entry.action_id, entry.outcome, short(entry.actor));
    if entry.origin == EntryOrigin::Remote {
        line.push_str(" (remote)");
    }
    if let Some(latency) = entry.confirmation_latency() {
        line.push_str(&format!(", ack {}ms", latency.as_millis()));
    }
    if let Some(latency) = entry.observed_latency() {
        line.push_str(&format!(", event {}ms", latency.as_millis()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballgame_types::ActionId;

    #[test]
    fn test_short_address() {
        let s = short(Address::repeat_byte(0xab));
        assert!(s.starts_with("0x"));
        assert_eq!(s.len(), 6 + 3 + 4);
    }

    #[test]
    fn test_describe_remote_entry() {
        let entry = LogEntry {
            action_id: ActionId::Claim(7),
            actor: Address::repeat_byte(1),
            outcome: "Bomb".to_string(),
            origin: EntryOrigin::Remote,
            submitted_at: None,
            broadcast_ack_at: None,
            event_observed_at: None,
        };
        let line = describe(&entry);
        assert!(line.contains("Bomb"));
        assert!(line.ends_with("(remote)"));
    }
}
