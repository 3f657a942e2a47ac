//! JSON-RPC Ledger
//!
//! HTTP JSON-RPC implementation of [`Ledger`] against an EVM node.

use crate::contract::{
    currentGameIdCall, getGameBallTypesCall, getGameClaimsCall, getGamePositionsCall,
    getGameStartTimeCall, getScoreCall, isGameActiveCall,
};
use crate::events::to_u64;
use crate::ledger::{FeeEstimate, Ledger, LedgerError, RoundSnapshot};
use alloy::primitives::{Address, Bytes, B256, U128, U256, U64};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use ballgame_types::ObjectKind;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Request timeout for every call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

impl From<ClientError> for LedgerError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Call(obj) => {
                let message = match obj.data() {
                    Some(data) => format!("{} ({})", obj.message(), data.get()),
                    None => obj.message().to_string(),
                };
                LedgerError::Rpc {
                    code: obj.code(),
                    message,
                }
            }
            other => LedgerError::Transport(other.to_string()),
        }
    }
}

/// Subset of a block header needed for clock calibration and fee estimation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockHeader {
    timestamp: U64,
    #[serde(default)]
    base_fee_per_gas: Option<U128>,
}

/// Ledger backed by a JSON-RPC HTTP endpoint
pub struct JsonRpcLedger {
    client: HttpClient,
    contract: Address,
}

impl JsonRpcLedger {
    /// Create a client for `rpc_url` addressing the game contract
    pub fn new(rpc_url: &str, contract: Address) -> Result<Self, LedgerError> {
        let client = HttpClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(rpc_url)
            .map_err(LedgerError::from)?;
        Ok(Self { client, contract })
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// `eth_call` a view function on the game contract
    async fn call<C: SolCall + Send>(&self, call: C) -> Result<C::Return, LedgerError> {
        let request = json!({
            "to": self.contract,
            "data": Bytes::from(call.abi_encode()),
        });
        let raw: Bytes = self
            .client
            .request("eth_call", rpc_params![request, "latest"])
            .await?;
        C::abi_decode_returns(&raw, true)
            .map_err(|e| LedgerError::Decode(format!("{}: {}", C::SIGNATURE, e)))
    }

    async fn latest_block(&self) -> Result<BlockHeader, LedgerError> {
        let block: Option<BlockHeader> = self
            .client
            .request("eth_getBlockByNumber", rpc_params!["latest", false])
            .await?;
        block.ok_or_else(|| LedgerError::Decode("latest block not available".to_string()))
    }
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn latest_block_timestamp(&self) -> Result<u64, LedgerError> {
        Ok(self.latest_block().await?.timestamp.to::<u64>())
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, LedgerError> {
        let nonce: U64 = self
            .client
            .request("eth_getTransactionCount", rpc_params![address, "pending"])
            .await?;
        Ok(nonce.to::<u64>())
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, LedgerError> {
        let block = self.latest_block().await?;
        let priority: Option<U128> = match self
            .client
            .request("eth_maxPriorityFeePerGas", rpc_params![])
            .await
        {
            Ok(fee) => Some(fee),
            Err(e) => {
                tracing::debug!("eth_maxPriorityFeePerGas unavailable: {}", e);
                None
            }
        };

        let max_priority_fee_per_gas = priority.map(|p| p.to::<u128>());
        let max_fee_per_gas = block.base_fee_per_gas.map(|base| {
            base.to::<u128>()
                .saturating_mul(2)
                .saturating_add(max_priority_fee_per_gas.unwrap_or(0))
        });

        Ok(FeeEstimate {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        let balance: U256 = self
            .client
            .request("eth_getBalance", rpc_params![address, "latest"])
            .await?;
        Ok(balance)
    }

    async fn current_round_id(&self) -> Result<u64, LedgerError> {
        let ret = self.call(currentGameIdCall {}).await?;
        to_u64(ret._0, "currentGameId")
    }

    async fn round_snapshot(&self, round_id: u64) -> Result<RoundSnapshot, LedgerError> {
        let game_id = U256::from(round_id);
        let (positions, kinds, claims, start_time, active) = tokio::try_join!(
            self.call(getGamePositionsCall { gameId: game_id }),
            self.call(getGameBallTypesCall { gameId: game_id }),
            self.call(getGameClaimsCall { gameId: game_id }),
            self.call(getGameStartTimeCall { gameId: game_id }),
            self.call(isGameActiveCall {}),
        )?;

        let claimed_by = claims
            .claimedBy
            .iter()
            .map(|addr| (*addr != Address::ZERO).then_some(*addr))
            .collect();

        Ok(RoundSnapshot {
            round_id,
            start_time: to_u64(start_time._0, "startTime")?,
            xs: positions.xs.to_vec(),
            ys: positions.ys.to_vec(),
            kinds: kinds._0.iter().copied().map(ObjectKind::from_u8).collect(),
            claimed_by,
            claimed_count: claims.claimedCount,
            active: active._0,
        })
    }

    async fn score(&self, player: Address) -> Result<u64, LedgerError> {
        let ret = self.call(getScoreCall { player }).await?;
        to_u64(ret._0, "score")
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, LedgerError> {
        let hash: B256 = self
            .client
            .request("eth_sendRawTransaction", rpc_params![raw])
            .await?;
        Ok(hash)
    }
}
