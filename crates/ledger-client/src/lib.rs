//! Ledger Client - BallGame contract access
//!
//! Everything that touches the chain lives here:
//! - ABI bindings for the BallGame contract
//! - The `Ledger` trait for reads and single-shot raw broadcasts, with a
//!   JSON-RPC over HTTP implementation
//! - The persistent websocket log subscription that decodes typed game events

pub mod contract;
pub mod events;
pub mod ledger;
pub mod rpc;
pub mod stream;

pub use events::{GameEvent, ObjectBatch, RawLog};
pub use ledger::{FeeEstimate, Ledger, LedgerError, RoundSnapshot};
pub use rpc::JsonRpcLedger;
pub use stream::{EventStream, StreamError, StreamMessage};

/// Default chain identifier (Monad testnet)
pub const DEFAULT_CHAIN_ID: u64 = 10143;
