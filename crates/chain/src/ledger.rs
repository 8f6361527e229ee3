//! Ledger abstraction consumed by the scanner and the executor.
//!
//! Two traits split the ledger along the read/write line:
//!
//! - [`StateFetcher`]: point-in-time reads of exchange, market, price feed and
//!   margin account state. "Not found" is a value (`None`), not an error.
//! - [`TransactionSubmitter`]: signs and submits a liquidation, waits for
//!   confirmation, and tells a ledger rejection apart from a transport failure.

use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Exchange, LiquidationRequest, MarginAccount, Market, MarketId, PriceFeed, Signature};

/// Read side of the ledger.
#[async_trait]
pub trait StateFetcher: Send + Sync {
    /// Fetch the exchange snapshot.
    async fn get_exchange(&self, exchange: Address) -> Result<Option<Exchange>>;

    /// Fetch markets by id. Output is positionally aligned with `ids`.
    async fn get_markets(&self, exchange: Address, ids: &[MarketId]) -> Result<Vec<Option<Market>>>;

    /// Fetch price feeds. Output is positionally aligned with `feeds`.
    async fn get_price_feeds(&self, feeds: &[Address]) -> Result<Vec<Option<PriceFeed>>>;

    /// Fetch a single margin account held by the exchange.
    async fn get_margin_account(&self, exchange: Address, account: Address) -> Result<Option<MarginAccount>>;

    /// Enumerate every margin account of the exchange.
    ///
    /// Accounts closed between enumeration and fetch are left out.
    async fn get_all_margin_accounts(&self, exchange: Address) -> Result<Vec<MarginAccount>>;
}

/// Failure modes of a liquidation submission.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The ledger refused the instruction (account healthy, already liquidated, ...).
    #[error("liquidation rejected by ledger: {0}")]
    Rejected(String),

    /// The instruction may not have reached the ledger.
    #[error("liquidation submission failed: {0}")]
    Transport(#[source] anyhow::Error),
}

impl SubmitError {
    /// Whether the ledger itself rejected the instruction.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Write side of the ledger.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Address signing the liquidation transactions.
    fn liquidator(&self) -> Address;

    /// Sign, submit and confirm a liquidation.
    async fn submit_liquidation(&self, request: &LiquidationRequest) -> Result<Signature, SubmitError>;
}

/// Classify a transport-level error message as a ledger rejection.
///
/// Reverts surface either from gas estimation or from the receipt; both mean
/// the ledger evaluated the instruction and refused it.
pub fn is_revert_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("execution reverted") || lower.contains("transaction reverted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_classification() {
        assert!(is_revert_message("server returned an error response: error code 3: execution reverted: AccountHealthy"));
        assert!(is_revert_message("Transaction reverted: 0xabc"));
        assert!(!is_revert_message("connection refused"));
        assert!(!is_revert_message("request timed out"));
    }

    #[test]
    fn test_submit_error_kind() {
        assert!(SubmitError::Rejected("healthy".into()).is_rejection());
        assert!(!SubmitError::Transport(anyhow::anyhow!("timeout")).is_rejection());
    }
}
