//! Error taxonomy for scanning and execution.

use alloy::primitives::Address;
use liquidator_chain::MarketId;

use crate::risk::EvaluationError;

/// Failures while deciding on or acting for one account.
#[derive(Debug, thiserror::Error)]
pub enum LiquidationError {
    /// An open position references a market the exchange does not list.
    #[error("account {account} holds a position in market {market_id} which is not loaded")]
    MissingMarket { account: Address, market_id: MarketId },

    #[error("risk evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("ledger fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),

    #[error("liquidation submission failed: {0}")]
    Submission(#[source] anyhow::Error),
}

impl LiquidationError {
    /// Inconsistent ledger data. Retrying the same unit will not help.
    pub fn is_data_inconsistency(&self) -> bool {
        matches!(self, Self::MissingMarket { .. })
    }

    /// Failure that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Submission(_))
    }
}
