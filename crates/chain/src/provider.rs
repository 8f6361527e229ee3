//! Provider management for ledger reads.
//! Uses Alloy providers for type-safe RPC interactions.

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::contracts::{price_feed_from_round, IAggregator, IPerpExchange};
use crate::ledger::{is_revert_message, StateFetcher};
use crate::types::{Exchange, MarginAccount, Market, MarketId, PriceFeed};

/// Default bound on concurrent per-item RPC calls.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 16;

/// Provider manager for ledger state reads.
#[derive(Clone)]
pub struct ProviderManager {
    /// HTTP URL of the ledger endpoint
    rpc_url: String,
    /// Maximum in-flight calls for batch fetches
    max_concurrent: usize,
}

impl ProviderManager {
    /// Create a new provider manager and verify the endpoint answers.
    pub async fn new(rpc_url: &str, max_concurrent: usize) -> Result<Self> {
        info!(rpc = rpc_url, max_concurrent, "Initializing provider manager");

        let manager = Self {
            rpc_url: rpc_url.to_string(),
            max_concurrent: max_concurrent.max(1),
        };

        let block = manager.block_number().await.context("Ledger endpoint unreachable")?;
        info!(block = block, "Provider connection verified");

        Ok(manager)
    }

    /// Get the RPC URL.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get current block number.
    pub async fn block_number(&self) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        Ok(provider.get_block_number().await?)
    }

    /// Whether a contract is deployed at `address`.
    async fn has_code(&self, address: Address) -> Result<bool> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let code = provider.get_code_at(address).await?;
        Ok(!code.is_empty())
    }

    async fn fetch_market(&self, exchange: Address, id: MarketId) -> Result<Option<Market>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let contract = IPerpExchange::new(exchange, &provider);
        let info = contract
            .marketInfo(id)
            .call()
            .await
            .with_context(|| format!("marketInfo({}) failed", id))?
            .info;
        Ok(info.into_market())
    }

    async fn fetch_price_feed(&self, feed: Address) -> Result<Option<PriceFeed>> {
        if !self.has_code(feed).await? {
            return Ok(None);
        }

        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let aggregator = IAggregator::new(feed, &provider);

        let round_call = aggregator.latestRoundData();
        let decimals_call = aggregator.decimals();
        let (round, decimals) = tokio::join!(round_call.call(), decimals_call.call());

        let round = round.with_context(|| format!("latestRoundData failed for {}", feed))?;
        let decimals = decimals.with_context(|| format!("decimals failed for {}", feed))?._0;

        price_feed_from_round(feed, round, decimals).map(Some)
    }
}

#[async_trait]
impl StateFetcher for ProviderManager {
    async fn get_exchange(&self, exchange: Address) -> Result<Option<Exchange>> {
        if !self.has_code(exchange).await? {
            debug!(exchange = %exchange, "No exchange deployed at address");
            return Ok(None);
        }

        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let contract = IPerpExchange::new(exchange, &provider);
        let info = contract.exchangeInfo().call().await.context("exchangeInfo failed")?.info;

        Ok(Some(info.into_exchange(exchange)))
    }

    async fn get_markets(&self, exchange: Address, ids: &[MarketId]) -> Result<Vec<Option<Market>>> {
        // `buffered` keeps output aligned with input order
        stream::iter(ids.iter().copied())
            .map(|id| self.fetch_market(exchange, id))
            .buffered(self.max_concurrent)
            .try_collect()
            .await
    }

    async fn get_price_feeds(&self, feeds: &[Address]) -> Result<Vec<Option<PriceFeed>>> {
        stream::iter(feeds.iter().copied())
            .map(|feed| self.fetch_price_feed(feed))
            .buffered(self.max_concurrent)
            .try_collect()
            .await
    }

    async fn get_margin_account(&self, exchange: Address, account: Address) -> Result<Option<MarginAccount>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let contract = IPerpExchange::new(exchange, &provider);
        let info = contract
            .marginAccountInfo(account)
            .call()
            .await
            .with_context(|| format!("marginAccountInfo({}) failed", account))?
            .info;

        Ok(info.into_account(account))
    }

    async fn get_all_margin_accounts(&self, exchange: Address) -> Result<Vec<MarginAccount>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let contract = IPerpExchange::new(exchange, &provider);

        let count = contract.marginAccountCount().call().await.context("marginAccountCount failed")?.count;
        let count: u64 = count.saturating_to();

        debug!(exchange = %exchange, count, "Enumerating margin accounts");

        // Accounts closing mid-enumeration shrink the index range; those reads revert
        let addresses: Vec<Option<Address>> = stream::iter(0..count)
            .map(|index| {
                let contract = &contract;
                async move {
                    revert_as_none(
                        contract.marginAccountAt(U256::from(index)).call().await.map(|r| r.account),
                        || format!("marginAccountAt({}) failed", index),
                    )
                }
            })
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;

        let accounts: Vec<Option<MarginAccount>> = stream::iter(addresses.into_iter().flatten())
            .map(|address| {
                let contract = &contract;
                async move {
                    revert_as_none(
                        contract.marginAccountInfo(address).call().await,
                        || format!("marginAccountInfo({}) failed", address),
                    )
                    .map(|info| info.and_then(|r| r.info.into_account(address)))
                }
            })
            .buffer_unordered(self.max_concurrent)
            .try_collect()
            .await?;

        let total = count as usize;
        let accounts: Vec<MarginAccount> = accounts.into_iter().flatten().collect();
        if accounts.len() < total {
            debug!(closed = total - accounts.len(), "Skipped accounts closed during enumeration");
        }

        Ok(accounts)
    }
}

/// Treat a reverted read as "no such entry"; any other failure propagates.
fn revert_as_none<T, E>(result: std::result::Result<T, E>, context: impl FnOnce() -> String) -> Result<Option<T>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_revert_message(&e.to_string()) => Ok(None),
        Err(e) => Err(anyhow::Error::new(e).context(context())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverted_index_read_is_skipped() {
        let reverted: std::result::Result<u64, std::io::Error> =
            Err(std::io::Error::other("server returned an error response: execution reverted: index out of bounds"));
        assert_eq!(revert_as_none(reverted, || "marginAccountAt(9) failed".into()).unwrap(), None);

        let ok: std::result::Result<u64, std::io::Error> = Ok(3);
        assert_eq!(revert_as_none(ok, || unreachable!()).unwrap(), Some(3));
    }

    #[test]
    fn test_transport_failure_still_fails() {
        let failed: std::result::Result<u64, std::io::Error> = Err(std::io::Error::other("connection refused"));
        let err = revert_as_none(failed, || "marginAccountAt(9) failed".into()).unwrap_err();
        assert!(err.to_string().contains("marginAccountAt(9)"));
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_provider_creation() {
        let provider = ProviderManager::new("http://127.0.0.1:8545", DEFAULT_FETCH_CONCURRENCY).await;
        assert!(provider.is_ok());
    }
}
