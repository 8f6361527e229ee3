//! Transaction signer and sender for liquidations.
//! Uses Alloy wallet providers; nonce, gas and chain id come from the
//! provider's recommended fillers.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use anyhow::Result;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::ledger::{is_revert_message, SubmitError};

/// Transaction sender bound to one signing key.
pub struct TransactionSender {
    /// RPC URL for sending transactions
    rpc_url: String,
    /// Signer wallet
    wallet: EthereumWallet,
    /// Signer address
    pub address: Address,
}

impl TransactionSender {
    /// Create a new transaction sender from a hex private key (with or without 0x prefix).
    pub fn new(private_key: &str, rpc_url: &str) -> Result<Self> {
        let key_str = private_key.trim().trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        info!(address = %address, rpc = rpc_url, "Transaction sender initialized");

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            wallet,
            address,
        })
    }

    /// Send a transaction and wait for its receipt.
    ///
    /// Reverts (at estimation or in the receipt) map to `SubmitError::Rejected`;
    /// anything else is a transport failure.
    pub async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<B256, SubmitError> {
        let total_start = Instant::now();

        debug!(to = %to, calldata_len = calldata.len(), "Preparing transaction");

        let url: Url = self
            .rpc_url
            .parse()
            .map_err(|e| SubmitError::Transport(anyhow::anyhow!("Invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().wallet(self.wallet.clone()).on_http(url);

        let tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_input(calldata);

        let pending = provider.send_transaction(tx).await.map_err(classify)?;
        let tx_hash = *pending.tx_hash();

        info!(tx_hash = %tx_hash, submit_ms = total_start.elapsed().as_millis(), "Transaction submitted, waiting for confirmation");

        let receipt = pending.get_receipt().await.map_err(classify)?;

        if receipt.status() {
            info!(
                tx_hash = %tx_hash,
                block = receipt.block_number.unwrap_or(0),
                gas_used = receipt.gas_used,
                total_ms = total_start.elapsed().as_millis(),
                "Transaction confirmed"
            );
            Ok(tx_hash)
        } else {
            warn!(tx_hash = %tx_hash, total_ms = total_start.elapsed().as_millis(), "Transaction reverted");
            Err(SubmitError::Rejected(format!("Transaction reverted: {}", tx_hash)))
        }
    }

    /// Get the RPC URL.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }
}

fn classify<E: std::fmt::Display + Into<anyhow::Error>>(err: E) -> SubmitError {
    let message = err.to_string();
    if is_revert_message(&message) {
        SubmitError::Rejected(message)
    } else {
        SubmitError::Transport(err.into())
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("rpc_url", &self.rpc_url)
            .finish_non_exhaustive()
    }
}
