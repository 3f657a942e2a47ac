//! Client Configuration

use crate::error::SessionError;
use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Gwei in wei
pub const GWEI: u128 = 1_000_000_000;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// JSON-RPC HTTP endpoint
    pub rpc_url: String,
    /// JSON-RPC websocket endpoint for the event stream
    pub ws_url: String,
    /// Game contract address
    pub contract: Address,
    pub chain_id: u64,
    /// Round duration in milliseconds
    pub round_duration_ms: u64,
    /// Regenerate when fewer than this many objects remain unclaimed
    pub regen_threshold: usize,
    /// Authoritative state poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Score/balance refresh interval in milliseconds
    pub scoreboard_interval_ms: u64,
    /// Regeneration animation window in milliseconds
    pub regen_window_ms: u64,
    /// Countdown / autonomous check tick in milliseconds
    pub countdown_tick_ms: u64,
    /// Confirmation log length
    pub log_capacity: usize,
    /// Clock calibration samples (odd, at least 3)
    pub calibration_samples: usize,
    /// Maximum pending actions before the oldest is evicted
    pub pending_capacity: usize,
    /// Pending actions older than this are evicted
    pub pending_ttl_ms: u64,
    /// Used when the node reports no base fee
    pub fallback_max_fee_per_gas: u128,
    /// Used when the node reports no priority fee
    pub fallback_max_priority_fee_per_gas: u128,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://testnet-rpc.monad.xyz".to_string(),
            ws_url: "wss://testnet-rpc.monad.xyz".to_string(),
            contract: address!("E17722A663E72f876baFe1F73dE6e6e02358Ba65"),
            chain_id: ledger_client::DEFAULT_CHAIN_ID,
            round_duration_ms: 40_000,
            regen_threshold: 10,
            poll_interval_ms: 3_000,
            scoreboard_interval_ms: 5_000,
            regen_window_ms: 2_000,
            countdown_tick_ms: 250,
            log_capacity: 20,
            calibration_samples: 3,
            pending_capacity: 64,
            pending_ttl_ms: 30_000,
            fallback_max_fee_per_gas: 50 * GWEI,
            fallback_max_priority_fee_per_gas: 2 * GWEI,
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, SessionError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| SessionError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.calibration_samples < 3 || self.calibration_samples % 2 == 0 {
            return Err(SessionError::Config(format!(
                "calibration_samples must be odd and at least 3, got {}",
                self.calibration_samples
            )));
        }
        if self.poll_interval_ms == 0 || self.countdown_tick_ms == 0 || self.scoreboard_interval_ms == 0 {
            return Err(SessionError::Config("intervals must be non-zero".to_string()));
        }
        if self.log_capacity == 0 || self.pending_capacity == 0 {
            return Err(SessionError::Config("capacities must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn scoreboard_interval(&self) -> Duration {
        Duration::from_millis(self.scoreboard_interval_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn regen_window(&self) -> Duration {
        Duration::from_millis(self.regen_window_ms)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_ttl_ms)
    }
}
