//! Test doubles: a scripted in-memory ledger and a manual wall clock

use crate::clock::WallClock;
use crate::round::RoundState;
use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use async_trait::async_trait;
use ballgame_types::{GameAction, ObjectKind};
use ledger_client::contract::decode_action;
use ledger_client::{FeeEstimate, Ledger, LedgerError, ObjectBatch, RoundSnapshot};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// A batch of `count` unclaimed objects
pub(crate) fn batch(count: usize) -> ObjectBatch {
    ObjectBatch {
        xs: (0..count as u16).map(|i| i * 10).collect(),
        ys: vec![500; count],
        kinds: (0..count).map(|i| ObjectKind::from_u8((i % 3) as u8)).collect(),
    }
}

/// Ledger snapshot matching a local round
pub(crate) fn snapshot_of(round: &RoundState) -> RoundSnapshot {
    RoundSnapshot {
        round_id: round.round_id,
        start_time: round.start_time,
        xs: round.objects.iter().map(|o| o.x).collect(),
        ys: round.objects.iter().map(|o| o.y).collect(),
        kinds: round.objects.iter().map(|o| o.kind).collect(),
        claimed_by: round.objects.iter().map(|o| o.claimed_by).collect(),
        claimed_count: round.objects.iter().filter(|o| o.claimed_by.is_some()).count() as u8,
        active: round.is_running(),
    }
}

/// Wall clock that advances `step` milliseconds on every read
pub(crate) struct ManualClock {
    now: AtomicI64,
    step: i64,
}

impl ManualClock {
    pub(crate) fn new(start_ms: i64, step: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
            step,
        }
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}

/// A transaction accepted by [`ScriptedLedger`]
#[derive(Clone, Debug)]
pub(crate) struct Broadcast {
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub action: Option<GameAction>,
    pub hash: B256,
}

#[derive(Default)]
struct Script {
    chain_nonce: u64,
    fees: FeeEstimate,
    block_timestamps: VecDeque<Result<u64, LedgerError>>,
    default_timestamp: u64,
    broadcast_failures: VecDeque<LedgerError>,
    broadcast_delay: Option<Duration>,
    attempts: Vec<u64>,
    broadcasts: Vec<Broadcast>,
    round: Option<RoundSnapshot>,
    scores: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    fail_reads: bool,
}

/// In-memory [`Ledger`] driven by the test
pub(crate) struct ScriptedLedger {
    script: Mutex<Script>,
}

impl ScriptedLedger {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                fees: FeeEstimate {
                    max_fee_per_gas: Some(100),
                    max_priority_fee_per_gas: Some(10),
                },
                default_timestamp: 1_700_000_000,
                ..Default::default()
            }),
        }
    }

    pub(crate) fn set_chain_nonce(&self, nonce: u64) {
        self.script.lock().chain_nonce = nonce;
    }

    pub(crate) fn set_fees(&self, fees: FeeEstimate) {
        self.script.lock().fees = fees;
    }

    /// Timestamp of the latest block once the queued ones are used up
    pub(crate) fn set_block_time(&self, secs: u64) {
        self.script.lock().default_timestamp = secs;
    }

    /// Every broadcast takes this long to be acknowledged
    pub(crate) fn set_broadcast_delay(&self, delay: Duration) {
        self.script.lock().broadcast_delay = Some(delay);
    }

    pub(crate) fn push_block_timestamps(
        &self,
        results: impl IntoIterator<Item = Result<u64, LedgerError>>,
    ) {
        self.script.lock().block_timestamps.extend(results);
    }

    /// The next broadcasts fail with these errors, in order
    pub(crate) fn fail_next_broadcasts(&self, errors: impl IntoIterator<Item = LedgerError>) {
        self.script.lock().broadcast_failures.extend(errors);
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.script.lock().fail_reads = fail;
    }

    pub(crate) fn set_round(&self, snapshot: RoundSnapshot) {
        self.script.lock().round = Some(snapshot);
    }

    /// Mark an object claimed in the ledger's round
    pub(crate) fn claim(&self, index: u8, actor: Address) {
        let mut script = self.script.lock();
        if let Some(round) = script.round.as_mut() {
            round.claimed_by[index as usize] = Some(actor);
            round.claimed_count += 1;
        }
    }

    pub(crate) fn set_score(&self, player: Address, score: u64) {
        self.script.lock().scores.insert(player, score);
    }

    pub(crate) fn set_balance(&self, address: Address, balance: U256) {
        self.script.lock().balances.insert(address, balance);
    }

    /// Nonces of every broadcast attempt, accepted or not
    pub(crate) fn attempted_nonces(&self) -> Vec<u64> {
        self.script.lock().attempts.clone()
    }

    pub(crate) fn broadcasts(&self) -> Vec<Broadcast> {
        self.script.lock().broadcasts.clone()
    }

    pub(crate) fn broadcasts_of(&self, action: GameAction) -> usize {
        self.script
            .lock()
            .broadcasts
            .iter()
            .filter(|b| b.action == Some(action))
            .count()
    }

    fn check_reads(&self) -> Result<(), LedgerError> {
        if self.script.lock().fail_reads {
            return Err(LedgerError::Transport("scripted read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for ScriptedLedger {
    async fn latest_block_timestamp(&self) -> Result<u64, LedgerError> {
        self.check_reads()?;
        let mut script = self.script.lock();
        let default = script.default_timestamp;
        script.block_timestamps.pop_front().unwrap_or(Ok(default))
    }

    async fn pending_nonce(&self, _address: Address) -> Result<u64, LedgerError> {
        self.check_reads()?;
        Ok(self.script.lock().chain_nonce)
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, LedgerError> {
        self.check_reads()?;
        Ok(self.script.lock().fees)
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.check_reads()?;
        Ok(self
            .script
            .lock()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn current_round_id(&self) -> Result<u64, LedgerError> {
        self.check_reads()?;
        Ok(self.script.lock().round.as_ref().map_or(0, |r| r.round_id))
    }

    async fn round_snapshot(&self, round_id: u64) -> Result<RoundSnapshot, LedgerError> {
        self.check_reads()?;
        self.script
            .lock()
            .round
            .clone()
            .filter(|r| r.round_id == round_id)
            .ok_or_else(|| LedgerError::Rpc {
                code: 3,
                message: format!("unknown round {}", round_id),
            })
    }

    async fn score(&self, player: Address) -> Result<u64, LedgerError> {
        self.check_reads()?;
        Ok(self.script.lock().scores.get(&player).copied().unwrap_or(0))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, LedgerError> {
        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
            .map_err(|e| LedgerError::Decode(e.to_string()))?;
        let TxEnvelope::Eip1559(signed) = envelope else {
            return Err(LedgerError::Decode("expected an EIP-1559 transaction".to_string()));
        };
        let tx = signed.tx();

        let delay = self.script.lock().broadcast_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock();
        script.attempts.push(tx.nonce);

        if let Some(err) = script.broadcast_failures.pop_front() {
            return Err(err);
        }
        if tx.nonce < script.chain_nonce {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: format!("Nonce too low: next {}, got {}", script.chain_nonce, tx.nonce),
            });
        }
        script.chain_nonce = script.chain_nonce.max(tx.nonce + 1);

        let to = match tx.to {
            TxKind::Call(to) => Some(to),
            TxKind::Create => None,
        };
        if let Some(to) = to {
            if !tx.value.is_zero() {
                *script.balances.entry(to).or_default() += tx.value;
            }
        }

        let hash = *signed.hash();
        script.broadcasts.push(Broadcast {
            nonce: tx.nonce,
            to,
            value: tx.value,
            action: decode_action(&tx.input),
            hash,
        });
        Ok(hash)
    }
}
