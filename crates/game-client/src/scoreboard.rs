//! Scoreboard
//!
//! Scores of every player seen this session plus the local balance. Read
//! failures keep the last known values.

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use ledger_client::Ledger;
use parking_lot::RwLock;

pub struct Scoreboard {
    me: Address,
    scores: DashMap<Address, u64>,
    balance: RwLock<Option<U256>>,
}

impl Scoreboard {
    pub fn new(me: Address) -> Self {
        let scores = DashMap::new();
        scores.insert(me, 0);
        Self {
            me,
            scores,
            balance: RwLock::new(None),
        }
    }

    /// Start tracking a player
    pub fn observe(&self, player: Address) {
        if player != Address::ZERO {
            self.scores.entry(player).or_insert(0);
        }
    }

    /// Score carried by a claim event
    pub fn apply_claim(&self, player: Address, new_score: u64) {
        self.scores.insert(player, new_score);
    }

    pub fn my_score(&self) -> u64 {
        self.score_of(self.me)
    }

    pub fn score_of(&self, player: Address) -> u64 {
        self.scores.get(&player).map(|s| *s).unwrap_or(0)
    }

    /// Last known native balance of the local identity
    pub fn balance(&self) -> Option<U256> {
        *self.balance.read()
    }

    /// All known players, highest score first
    pub fn entries(&self) -> Vec<(Address, u64)> {
        let mut entries: Vec<(Address, u64)> = self
            .scores
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries
    }

    /// Re-read the local score only
    pub async fn refresh_mine(&self, ledger: &dyn Ledger) {
        match ledger.score(self.me).await {
            Ok(score) => {
                self.scores.insert(self.me, score);
            }
            Err(e) => tracing::warn!("Score read failed: {}", e),
        }
    }

    /// Re-read every known score and the local balance
    pub async fn refresh(&self, ledger: &dyn Ledger) {
        let players: Vec<Address> = self.scores.iter().map(|entry| *entry.key()).collect();
        for player in players {
            match ledger.score(player).await {
                Ok(score) => {
                    self.scores.insert(player, score);
                }
                Err(e) => tracing::warn!("Score read for {} failed: {}", player, e),
            }
        }

        match ledger.balance(self.me).await {
            Ok(balance) => *self.balance.write() = Some(balance),
            Err(e) => tracing::warn!("Balance read failed: {}", e),
        }
    }
}
