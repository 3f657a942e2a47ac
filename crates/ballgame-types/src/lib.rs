//! Shared types for the BallGame client
//!
//! This crate contains the domain vocabulary shared by the ledger client and
//! the game core: object kinds, the set of state-changing actions, and the
//! action identifiers used to correlate broadcasts with ledger events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of objects in every batch (matches the contract's fixed arrays)
pub const BALL_COUNT: usize = 50;

/// Positions are stored on-chain in tenths of a percent
pub const POSITION_SCALE: f64 = 10.0;

/// Gas limit for `claimBall`
pub const CLAIM_GAS_LIMIT: u64 = 150_000;

/// Gas limit for `startGame` and `endGame`
pub const ROUND_GAS_LIMIT: u64 = 300_000;

/// Gas limit for `regenerateBalls`
pub const REGENERATE_GAS_LIMIT: u64 = 1_000_000;

/// Kind of a claimable object, decides the score delta
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// +1
    Normal,
    /// +3
    Special,
    /// -5
    Bomb,
}

impl ObjectKind {
    /// Map the contract's `uint8` ball type. Unknown values are treated as normal.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ObjectKind::Special,
            2 => ObjectKind::Bomb,
            _ => ObjectKind::Normal,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ObjectKind::Normal => 0,
            ObjectKind::Special => 1,
            ObjectKind::Bomb => 2,
        }
    }

    /// Score change applied by the contract when this kind is claimed
    pub fn score_delta(self) -> i64 {
        match self {
            ObjectKind::Normal => 1,
            ObjectKind::Special => 3,
            ObjectKind::Bomb => -5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ObjectKind::Normal => "Normal",
            ObjectKind::Special => "Special",
            ObjectKind::Bomb => "Bomb",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:+})", self.label(), self.score_delta())
    }
}

/// A state-changing call against the game contract
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameAction {
    StartRound,
    EndRound,
    RegenerateBatch,
    Claim { index: u8 },
}

impl GameAction {
    /// Identifier used to correlate the broadcast with the ledger event
    pub fn action_id(&self) -> ActionId {
        match *self {
            GameAction::StartRound => ActionId::StartRound,
            GameAction::EndRound => ActionId::EndRound,
            GameAction::RegenerateBatch => ActionId::Regenerate,
            GameAction::Claim { index } => ActionId::Claim(index),
        }
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            GameAction::StartRound | GameAction::EndRound => ROUND_GAS_LIMIT,
            GameAction::RegenerateBatch => REGENERATE_GAS_LIMIT,
            GameAction::Claim { .. } => CLAIM_GAS_LIMIT,
        }
    }

    /// Contract function name, for status text only
    pub fn function_name(&self) -> &'static str {
        match self {
            GameAction::StartRound => "startGame",
            GameAction::EndRound => "endGame",
            GameAction::RegenerateBatch => "regenerateBalls",
            GameAction::Claim { .. } => "claimBall",
        }
    }
}

impl fmt::Display for GameAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameAction::Claim { index } => write!(f, "claimBall({})", index),
            other => write!(f, "{}()", other.function_name()),
        }
    }
}

/// Correlation key for one in-flight action.
///
/// Claims are keyed per object index; round-level actions are keyed against
/// the round as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionId {
    StartRound,
    EndRound,
    Regenerate,
    Claim(u8),
}

impl ActionId {
    pub fn is_claim(&self) -> bool {
        matches!(self, ActionId::Claim(_))
    }

    /// Object index for claim actions
    pub fn object_index(&self) -> Option<u8> {
        match self {
            ActionId::Claim(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionId::StartRound => write!(f, "start"),
            ActionId::EndRound => write!(f, "end"),
            ActionId::Regenerate => write!(f, "regenerate"),
            ActionId::Claim(index) => write!(f, "claim:{}", index),
        }
    }
}

/// Error parsing an [`ActionId`] from its display form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid action id: {0}")]
pub struct ParseActionIdError(pub String);

impl FromStr for ActionId {
    type Err = ParseActionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ActionId::StartRound),
            "end" => Ok(ActionId::EndRound),
            "regenerate" => Ok(ActionId::Regenerate),
            _ => s
                .strip_prefix("claim:")
                .and_then(|index| index.parse::<u8>().ok())
                .map(ActionId::Claim)
                .ok_or_else(|| ParseActionIdError(s.to_string())),
        }
    }
}
