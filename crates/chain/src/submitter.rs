//! Liquidation submission against the exchange contract.

use alloy::primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::contracts::encode_liquidate;
use crate::ledger::{SubmitError, TransactionSubmitter};
use crate::signer::TransactionSender;
use crate::types::{LiquidationRequest, Signature};

/// Submits `liquidate` calls through a [`TransactionSender`].
pub struct LiquidationSubmitter {
    sender: Arc<TransactionSender>,
}

impl LiquidationSubmitter {
    pub fn new(sender: Arc<TransactionSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl TransactionSubmitter for LiquidationSubmitter {
    fn liquidator(&self) -> Address {
        self.sender.address
    }

    async fn submit_liquidation(&self, request: &LiquidationRequest) -> Result<Signature, SubmitError> {
        let calldata = encode_liquidate(request);

        info!(
            exchange = %request.exchange,
            account = %request.account,
            markets = request.markets.len(),
            calldata_len = calldata.len(),
            "Sending liquidation"
        );

        self.sender.send_transaction(request.exchange, calldata).await
    }
}
