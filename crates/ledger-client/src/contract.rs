//! BallGame contract ABI
//!
//! Call and event bindings generated with `sol!`, plus the mapping from a
//! typed [`GameAction`] to its calldata.

use alloy::primitives::{Bytes, B256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use ballgame_types::GameAction;

sol! {
    function currentGameId() view returns (uint256);
    function startGame();
    function endGame();
    function regenerateBalls();
    function claimBall(uint8 index);
    function getGamePositions(uint256 gameId) view returns (uint16[50] xs, uint16[50] ys);
    function getGameBallTypes(uint256 gameId) view returns (uint8[50]);
    function getGameClaims(uint256 gameId) view returns (address[50] claimedBy, uint8 claimedCount);
    function getGameStartTime(uint256 gameId) view returns (uint256);
    function isGameActive() view returns (bool);
    function getScore(address player) view returns (uint256);

    event GameStarted(uint256 indexed gameId, uint256 startTime, uint16[50] xs, uint16[50] ys, uint8[50] ballTypes);
    event BallClaimed(uint256 indexed gameId, uint8 index, address player, uint8 ballType, uint256 newScore);
    event GameEnded(uint256 indexed gameId, address endedBy);
    event BallsRegenerated(uint256 indexed gameId, uint256 startTime, uint16[50] xs, uint16[50] ys, uint8[50] ballTypes);
}

/// ABI-encode the calldata for a game action
pub fn encode_action(action: &GameAction) -> Bytes {
    let data = match *action {
        GameAction::StartRound => startGameCall {}.abi_encode(),
        GameAction::EndRound => endGameCall {}.abi_encode(),
        GameAction::RegenerateBatch => regenerateBallsCall {}.abi_encode(),
        GameAction::Claim { index } => claimBallCall { index }.abi_encode(),
    };
    Bytes::from(data)
}

/// Recover the game action from transaction calldata
pub fn decode_action(input: &[u8]) -> Option<GameAction> {
    let selector = input.get(..4)?;
    if selector == startGameCall::SELECTOR {
        Some(GameAction::StartRound)
    } else if selector == endGameCall::SELECTOR {
        Some(GameAction::EndRound)
    } else if selector == regenerateBallsCall::SELECTOR {
        Some(GameAction::RegenerateBatch)
    } else if selector == claimBallCall::SELECTOR {
        claimBallCall::abi_decode(input, true)
            .ok()
            .map(|call| GameAction::Claim { index: call.index })
    } else {
        None
    }
}

/// Topic0 values of every event the client subscribes to
pub fn event_topics() -> [B256; 4] {
    [
        GameStarted::SIGNATURE_HASH,
        BallClaimed::SIGNATURE_HASH,
        GameEnded::SIGNATURE_HASH,
        BallsRegenerated::SIGNATURE_HASH,
    ]
}
