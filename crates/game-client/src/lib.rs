//! Game Client - transaction pipeline and confirmation engine
//!
//! The core of the BallGame client:
//! - Clock calibration against ledger time
//! - Cached nonce/fee parameters and one-round-trip raw submission
//! - Dual-channel confirmation (broadcast ack + ledger event)
//! - Live event subscription driving the round state machine
//! - Optimistic local claims reconciled by periodic polling
//!
//! Everything is tied together by an explicitly constructed
//! [`SessionContext`] owned by a [`GameSession`].

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod funding;
pub mod guards;
pub mod identity;
pub mod reconciler;
pub mod round;
pub mod scoreboard;
pub mod session;
pub mod submitter;
pub mod subscriber;
pub mod tracker;
pub mod trajectory;
pub mod tx_params;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{ClockCalibrator, SystemClock, WallClock};
pub use config::ClientConfig;
pub use context::{SessionContext, SessionUpdate};
pub use error::{FundError, IdentityError, SessionError, SubmitError};
pub use funding::fund;
pub use guards::InFlightGuards;
pub use identity::SigningIdentity;
pub use reconciler::{ClaimStart, OptimisticReconciler, PollResult};
pub use round::{ObjectSlot, RegenWindow, RoundPhase, RoundState};
pub use scoreboard::Scoreboard;
pub use session::{GameSession, SessionView};
pub use submitter::{PreparedTx, RawSubmitter, SubmitOutcome};
pub use subscriber::EventSubscriber;
pub use tracker::{ConfirmationTracker, EntryOrigin, EventObservation, LogEntry, PendingAction};
pub use tx_params::{CachedTxParams, TxParamCache};
