//! Ledger trait - reads and single-shot writes against the game contract

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use ballgame_types::ObjectKind;

/// Fee parameters reported by the node. Missing values are filled with
/// fallbacks by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

/// Authoritative state of one round as read from contract storage
#[derive(Clone, Debug, PartialEq)]
pub struct RoundSnapshot {
    pub round_id: u64,
    /// Ledger time in seconds
    pub start_time: u64,
    pub xs: Vec<u16>,
    pub ys: Vec<u16>,
    pub kinds: Vec<ObjectKind>,
    /// `None` for unclaimed objects
    pub claimed_by: Vec<Option<Address>>,
    pub claimed_count: u8,
    /// `isGameActive()` at read time
    pub active: bool,
}

/// Ledger read/broadcast errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Whether the node rejected a transaction because of its nonce
    /// ("nonce too low", "invalid nonce", ...)
    pub fn is_nonce_conflict(&self) -> bool {
        let message = match self {
            LedgerError::Rpc { message, .. } => message,
            LedgerError::Transport(message) => message,
            LedgerError::Decode(_) => return false,
        };
        message.to_lowercase().contains("nonce")
    }
}

/// The request/response channel to the chain.
///
/// All reads target the single well-known game contract; broadcasts are
/// exactly one round trip and do not wait for inclusion.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Timestamp (seconds) of the latest block
    async fn latest_block_timestamp(&self) -> Result<u64, LedgerError>;

    /// Next nonce for `address`, counting pending transactions
    async fn pending_nonce(&self, address: Address) -> Result<u64, LedgerError>;

    async fn fee_estimate(&self) -> Result<FeeEstimate, LedgerError>;

    async fn balance(&self, address: Address) -> Result<U256, LedgerError>;

    /// `currentGameId()`, 0 when no round was ever started
    async fn current_round_id(&self) -> Result<u64, LedgerError>;

    async fn round_snapshot(&self, round_id: u64) -> Result<RoundSnapshot, LedgerError>;

    async fn score(&self, player: Address) -> Result<u64, LedgerError>;

    /// `eth_sendRawTransaction`, returns the transaction hash
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, LedgerError>;
}
