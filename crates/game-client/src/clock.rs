//! Clock Calibrator
//!
//! Estimates `ledger_time - local_time` so every client animates and counts
//! down against the same timeline. Only the calibrator writes the offset.

use ledger_client::{Ledger, LedgerError};
use parking_lot::RwLock;
use std::sync::Arc;

/// Local wall clock in milliseconds since the Unix epoch
pub trait WallClock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Holds the calibrated ledger clock offset
pub struct ClockCalibrator {
    wall: Arc<dyn WallClock>,
    samples: usize,
    offset_ms: RwLock<i64>,
}

impl ClockCalibrator {
    /// `samples` is rounded up to the next odd number, minimum 3
    pub fn new(wall: Arc<dyn WallClock>, samples: usize) -> Self {
        let samples = samples.max(3) | 1;
        Self {
            wall,
            samples,
            offset_ms: RwLock::new(0),
        }
    }

    /// Current offset (ledger minus local) in milliseconds
    pub fn offset_ms(&self) -> i64 {
        *self.offset_ms.read()
    }

    /// Ledger time estimate in milliseconds
    pub fn now_ms(&self) -> i64 {
        self.wall.now_ms() + self.offset_ms()
    }

    /// Local wall clock without offset
    pub fn local_ms(&self) -> i64 {
        self.wall.now_ms()
    }

    /// Take the configured number of round-trip samples against the latest
    /// block and store their median.
    ///
    /// On error the previous offset is left untouched.
    pub async fn calibrate(&self, ledger: &dyn Ledger) -> Result<i64, LedgerError> {
        let mut samples = Vec::with_capacity(self.samples);
        for _ in 0..self.samples {
            let before = self.wall.now_ms();
            let block_secs = ledger.latest_block_timestamp().await?;
            let after = self.wall.now_ms();

            let local_estimate = before + (after - before) / 2;
            samples.push(block_secs as i64 * 1000 - local_estimate);
        }

        samples.sort_unstable();
        let median = samples[samples.len() / 2];
        *self.offset_ms.write() = median;

        tracing::debug!("Clock calibrated: offset {}ms (samples {:?})", median, samples);
        Ok(median)
    }
}
