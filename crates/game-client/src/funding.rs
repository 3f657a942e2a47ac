//! Funding helper
//!
//! Sends native currency from a funder key to a freshly created burner and
//! waits for the balance to show up.

use crate::error::FundError;
use crate::identity::SigningIdentity;
use alloy::consensus::TxEip1559;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use ledger_client::Ledger;
use std::time::Duration;

/// Gas for a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// 1 ether (1 MON on Monad)
pub const DEFAULT_FUND_AMOUNT: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

const BALANCE_CHECKS: u32 = 20;
const BALANCE_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Transfer `amount` from `funder` to `recipient` and return the recipient's
/// balance once it is non-zero.
pub async fn fund(
    ledger: &dyn Ledger,
    funder: &SigningIdentity,
    recipient: Address,
    amount: U256,
    chain_id: u64,
    fallback_fees: (u128, u128),
) -> Result<U256, FundError> {
    let (nonce, fees) = tokio::try_join!(ledger.pending_nonce(funder.address()), ledger.fee_estimate())?;

    let tx = TxEip1559 {
        chain_id,
        nonce,
        gas_limit: TRANSFER_GAS_LIMIT,
        max_fee_per_gas: fees.max_fee_per_gas.unwrap_or(fallback_fees.0),
        max_priority_fee_per_gas: fees.max_priority_fee_per_gas.unwrap_or(fallback_fees.1),
        to: TxKind::Call(recipient),
        value: amount,
        access_list: Default::default(),
        input: Bytes::new(),
    };
    let signed = funder.sign_eip1559(tx)?;
    let tx_hash = ledger.send_raw_transaction(signed.raw).await?;
    tracing::info!("Funding {} with {} wei: tx {}", recipient, amount, tx_hash);

    for _ in 0..BALANCE_CHECKS {
        match ledger.balance(recipient).await {
            Ok(balance) if !balance.is_zero() => {
                tracing::info!("{} funded, balance {}", recipient, balance);
                return Ok(balance);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Balance check failed: {}", e),
        }
        tokio::time::sleep(BALANCE_CHECK_INTERVAL).await;
    }

    Err(FundError::NotCredited(BALANCE_CHECKS))
}
