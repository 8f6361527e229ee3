//! Account health evaluation.
//!
//! The evaluator is a pure function of one consistent snapshot: the account,
//! the exchange, its markets and their price feeds, and the evaluation clock.
//! It never fetches and never caches.

use alloy::primitives::Address;
use liquidator_chain::{Exchange, MarginAccount, Market, MarketId, PriceFeed};
use std::collections::HashMap;

/// Result of evaluating one account at one moment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthVerdict {
    pub can_liquidate: bool,
    /// Collateral plus unrealized PnL (quote units)
    pub equity: f64,
    /// Maintenance margin owed on open notional (quote units)
    pub maintenance_requirement: f64,
    /// `equity / maintenance_requirement`, infinite without exposure
    pub health_factor: f64,
    pub in_liquidation: bool,
}

/// Why an account could not be evaluated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("market {0} not provided")]
    UnknownMarket(MarketId),

    #[error("price feed {feed} for market {market_id} not provided")]
    MissingPriceFeed { market_id: MarketId, feed: Address },

    #[error("price feed {feed} is stale: {age_secs}s old, max {max_age_secs}s")]
    StalePrice {
        feed: Address,
        age_secs: u64,
        max_age_secs: u64,
    },

    #[error("price feed {feed} reported non-positive answer {answer}")]
    InvalidPrice { feed: Address, answer: i128 },
}

/// Decides whether an account may be liquidated.
pub trait RiskEvaluator: Send + Sync {
    fn evaluate(
        &self,
        account: &MarginAccount,
        exchange: &Exchange,
        markets: &HashMap<MarketId, Market>,
        price_feeds: &HashMap<Address, PriceFeed>,
        now: i64,
    ) -> Result<HealthVerdict, EvaluationError>;
}

/// Maintenance-margin check: liquidatable once equity drops below the
/// maintenance requirement of the open positions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceMarginEvaluator;

const BPS_DENOMINATOR: f64 = 10_000.0;

impl RiskEvaluator for MaintenanceMarginEvaluator {
    fn evaluate(
        &self,
        account: &MarginAccount,
        _exchange: &Exchange,
        markets: &HashMap<MarketId, Market>,
        price_feeds: &HashMap<Address, PriceFeed>,
        now: i64,
    ) -> Result<HealthVerdict, EvaluationError> {
        let mut equity = account.collateral_f64();
        let mut maintenance = 0.0;

        for position in account.open_positions() {
            let market = markets
                .get(&position.market_id)
                .ok_or(EvaluationError::UnknownMarket(position.market_id))?;
            let feed = price_feeds
                .get(&market.price_feed)
                .ok_or(EvaluationError::MissingPriceFeed {
                    market_id: market.id,
                    feed: market.price_feed,
                })?;

            let age_secs = feed.age_secs(now);
            if age_secs > market.max_price_age_secs {
                return Err(EvaluationError::StalePrice {
                    feed: feed.address,
                    age_secs,
                    max_age_secs: market.max_price_age_secs,
                });
            }
            if feed.answer <= 0 {
                return Err(EvaluationError::InvalidPrice {
                    feed: feed.address,
                    answer: feed.answer,
                });
            }

            let price = feed.price();
            let size = position.size_f64();
            equity += size * (price - position.entry_price_f64());
            maintenance +=
                size.abs() * price * f64::from(market.maintenance_margin_bps) / BPS_DENOMINATOR;
        }

        let health_factor = if maintenance > 0.0 {
            equity / maintenance
        } else {
            f64::INFINITY
        };

        Ok(HealthVerdict {
            can_liquidate: account.in_liquidation || (maintenance > 0.0 && equity < maintenance),
            equity,
            maintenance_requirement: maintenance,
            health_factor,
            in_liquidation: account.in_liquidation,
        })
    }
}
