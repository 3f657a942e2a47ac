//! Game client errors

use ballgame_types::ActionId;
use ledger_client::LedgerError;

/// Signing identity errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Key file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors refusing a submission before any network call
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Not ready: {0}")]
    NotReady(&'static str),
    #[error("Action {0} is already pending")]
    AlreadyPending(ActionId),
    #[error(transparent)]
    Signing(#[from] IdentityError),
}

/// Session-level errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("Object {0} cannot be claimed")]
    ObjectUnavailable(u8),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Funding errors
#[derive(Debug, thiserror::Error)]
pub enum FundError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("Recipient balance still zero after {0} checks")]
    NotCredited(u32),
}
