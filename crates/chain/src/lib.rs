//! Liquidator chain interaction layer.
//!
//! This crate provides:
//! - Ledger snapshot types (exchange, markets, price feeds, margin accounts)
//! - The `StateFetcher` / `TransactionSubmitter` ledger traits
//! - Contract bindings for the perpetuals exchange and Chainlink-style feeds
//! - An Alloy-backed state fetcher and liquidation submitter

mod contracts;
mod ledger;
mod provider;
mod signer;
mod submitter;
mod types;

pub use contracts::{encode_liquidate, IAggregator, IPerpExchange};
pub use ledger::{is_revert_message, StateFetcher, SubmitError, TransactionSubmitter};
pub use provider::{ProviderManager, DEFAULT_FETCH_CONCURRENCY};
pub use signer::TransactionSender;
pub use submitter::LiquidationSubmitter;
pub use types::{
    Exchange, LiquidationRequest, MarginAccount, Market, MarketId, Position, PriceFeed, Signature,
    EMPTY_MARKET_ID, QUOTE_DECIMALS, SIZE_DECIMALS,
};
