//! Typed game events decoded from contract logs

use crate::contract::{BallClaimed, BallsRegenerated, GameEnded, GameStarted};
use crate::ledger::LedgerError;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use ballgame_types::ObjectKind;
use serde::Deserialize;

/// A log entry as delivered by `eth_subscribe("logs")`
#[derive(Clone, Debug, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// Set when the log was removed by a reorg
    #[serde(default)]
    pub removed: bool,
}

/// Positions and kinds of a freshly spawned batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectBatch {
    pub xs: Vec<u16>,
    pub ys: Vec<u16>,
    pub kinds: Vec<ObjectKind>,
}

impl ObjectBatch {
    fn from_arrays(xs: &[u16], ys: &[u16], kinds: &[u8]) -> Self {
        Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            kinds: kinds.iter().copied().map(ObjectKind::from_u8).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Domain event emitted by the game contract
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameEvent {
    RoundStarted {
        round_id: u64,
        start_time: u64,
        batch: ObjectBatch,
    },
    ObjectClaimed {
        round_id: u64,
        index: u8,
        actor: Address,
        kind: ObjectKind,
        new_score: u64,
    },
    RoundEnded {
        round_id: u64,
        ended_by: Address,
    },
    BatchRegenerated {
        round_id: u64,
        start_time: u64,
        batch: ObjectBatch,
    },
}

impl GameEvent {
    pub fn round_id(&self) -> u64 {
        match self {
            GameEvent::RoundStarted { round_id, .. }
            | GameEvent::ObjectClaimed { round_id, .. }
            | GameEvent::RoundEnded { round_id, .. }
            | GameEvent::BatchRegenerated { round_id, .. } => *round_id,
        }
    }

    /// Decode a contract log. Returns `Ok(None)` for logs of unrelated events.
    pub fn decode(log: &RawLog) -> Result<Option<Self>, LedgerError> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let topics = log.topics.iter().copied();

        let event = if *topic0 == GameStarted::SIGNATURE_HASH {
            let ev = GameStarted::decode_raw_log(topics, &log.data, true).map_err(decode_err)?;
            GameEvent::RoundStarted {
                round_id: to_u64(ev.gameId, "gameId")?,
                start_time: to_u64(ev.startTime, "startTime")?,
                batch: ObjectBatch::from_arrays(&ev.xs, &ev.ys, &ev.ballTypes),
            }
        } else if *topic0 == BallClaimed::SIGNATURE_HASH {
            let ev = BallClaimed::decode_raw_log(topics, &log.data, true).map_err(decode_err)?;
            GameEvent::ObjectClaimed {
                round_id: to_u64(ev.gameId, "gameId")?,
                index: ev.index,
                actor: ev.player,
                kind: ObjectKind::from_u8(ev.ballType),
                new_score: to_u64(ev.newScore, "newScore")?,
            }
        } else if *topic0 == GameEnded::SIGNATURE_HASH {
            let ev = GameEnded::decode_raw_log(topics, &log.data, true).map_err(decode_err)?;
            GameEvent::RoundEnded {
                round_id: to_u64(ev.gameId, "gameId")?,
                ended_by: ev.endedBy,
            }
        } else if *topic0 == BallsRegenerated::SIGNATURE_HASH {
            let ev =
                BallsRegenerated::decode_raw_log(topics, &log.data, true).map_err(decode_err)?;
            GameEvent::BatchRegenerated {
                round_id: to_u64(ev.gameId, "gameId")?,
                start_time: to_u64(ev.startTime, "startTime")?,
                batch: ObjectBatch::from_arrays(&ev.xs, &ev.ys, &ev.ballTypes),
            }
        } else {
            return Ok(None);
        };

        Ok(Some(event))
    }
}

fn decode_err(e: alloy::sol_types::Error) -> LedgerError {
    LedgerError::Decode(e.to_string())
}

/// Narrow a `uint256` field to u64
pub(crate) fn to_u64(value: U256, field: &str) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::Decode(format!("{} out of range: {}", field, value)))
}
