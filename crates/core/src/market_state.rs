//! Market and price-feed snapshot shared by the scanner and the executor.
//!
//! Both sides must judge an account against the same kind of data, so the
//! loading rules (skip empty slots, drop not-found entries) live here once.

use alloy::primitives::Address;
use liquidator_chain::{Exchange, MarginAccount, Market, MarketId, PriceFeed, StateFetcher, EMPTY_MARKET_ID};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::LiquidationError;
use crate::risk::{HealthVerdict, RiskEvaluator};

/// One consistent read of an exchange's markets and their prices.
#[derive(Debug, Clone)]
pub struct MarketState {
    pub exchange: Exchange,
    pub markets: HashMap<MarketId, Market>,
    pub price_feeds: HashMap<Address, PriceFeed>,
}

/// Market ids the exchange actually uses: empty slots removed, first-seen order.
pub fn active_market_ids(exchange: &Exchange) -> Vec<MarketId> {
    let mut seen = HashSet::new();
    exchange
        .market_ids
        .iter()
        .copied()
        .filter(|id| *id != EMPTY_MARKET_ID && seen.insert(*id))
        .collect()
}

/// Fetch markets and then the price feeds they reference.
pub async fn load_markets(
    fetcher: &dyn StateFetcher,
    exchange: Exchange,
) -> Result<MarketState, LiquidationError> {
    let ids = active_market_ids(&exchange);
    let fetched = fetcher
        .get_markets(exchange.address, &ids)
        .await
        .map_err(LiquidationError::Fetch)?;

    let mut markets = HashMap::with_capacity(ids.len());
    for (id, market) in ids.iter().zip(fetched) {
        match market {
            Some(market) => {
                markets.insert(*id, market);
            }
            None => debug!(exchange = %exchange.address, market_id = id, "Market not found, skipping"),
        }
    }

    let mut feed_addresses: Vec<Address> = markets.values().map(|m| m.price_feed).collect();
    feed_addresses.sort();
    feed_addresses.dedup();

    let fetched = fetcher
        .get_price_feeds(&feed_addresses)
        .await
        .map_err(LiquidationError::Fetch)?;

    let mut price_feeds = HashMap::with_capacity(feed_addresses.len());
    for (address, feed) in feed_addresses.iter().zip(fetched) {
        match feed {
            Some(feed) => {
                price_feeds.insert(*address, feed);
            }
            None => debug!(feed = %address, "Price feed not found, skipping"),
        }
    }

    Ok(MarketState {
        exchange,
        markets,
        price_feeds,
    })
}

/// Fetch the exchange and its market state. `None` when the exchange is gone.
pub async fn load_market_state(
    fetcher: &dyn StateFetcher,
    exchange: Address,
) -> Result<Option<MarketState>, LiquidationError> {
    let Some(snapshot) = fetcher
        .get_exchange(exchange)
        .await
        .map_err(LiquidationError::Fetch)?
    else {
        return Ok(None);
    };
    load_markets(fetcher, snapshot).await.map(Some)
}

fn ensure_markets_loaded(
    account: &MarginAccount,
    markets: &HashMap<MarketId, Market>,
) -> Result<(), LiquidationError> {
    match account
        .open_positions()
        .find(|p| !markets.contains_key(&p.market_id))
    {
        Some(position) => Err(LiquidationError::MissingMarket {
            account: account.address,
            market_id: position.market_id,
        }),
        None => Ok(()),
    }
}

/// Evaluate an account, failing first if it trades a market we do not have.
pub fn evaluate_account(
    evaluator: &dyn RiskEvaluator,
    account: &MarginAccount,
    state: &MarketState,
    now: i64,
) -> Result<HealthVerdict, LiquidationError> {
    ensure_markets_loaded(account, &state.markets)?;
    Ok(evaluator.evaluate(account, &state.exchange, &state.markets, &state.price_feeds, now)?)
}

/// Market and price-feed addresses of every open position, in position order.
pub fn liquidation_refs(
    account: &MarginAccount,
    markets: &HashMap<MarketId, Market>,
) -> Result<(Vec<Address>, Vec<Address>), LiquidationError> {
    ensure_markets_loaded(account, markets)?;
    Ok(account
        .open_positions()
        .filter_map(|p| markets.get(&p.market_id))
        .map(|m| (m.address, m.price_feed))
        .unzip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::MaintenanceMarginEvaluator;
    use crate::testing::{account, now, MockLedger, EXCHANGE};

    #[test]
    fn test_active_market_ids_skip_empty_slots() {
        let exchange = Exchange {
            address: EXCHANGE,
            market_ids: vec![0, 7, 0, 12],
        };
        assert_eq!(active_market_ids(&exchange), vec![7, 12]);
    }

    #[test]
    fn test_active_market_ids_dedup_keeps_order() {
        let exchange = Exchange {
            address: EXCHANGE,
            market_ids: vec![12, 7, 12, 0],
        };
        assert_eq!(active_market_ids(&exchange), vec![12, 7]);
    }

    #[tokio::test]
    async fn test_load_fetches_only_active_markets() {
        let ledger = MockLedger::with_markets(&[0, 7, 0, 12]);
        let state = load_market_state(&ledger, EXCHANGE).await.unwrap().unwrap();

        assert_eq!(ledger.market_requests(), vec![vec![7, 12]]);
        assert_eq!(state.markets.len(), 2);
        assert_eq!(state.price_feeds.len(), 2);
    }

    #[tokio::test]
    async fn test_not_found_market_skipped() {
        let ledger = MockLedger::with_markets(&[7, 12]);
        ledger.remove_market(12);

        let state = load_market_state(&ledger, EXCHANGE).await.unwrap().unwrap();
        assert!(state.markets.contains_key(&7));
        assert!(!state.markets.contains_key(&12));
    }

    #[tokio::test]
    async fn test_missing_exchange_is_none() {
        let ledger = MockLedger::with_markets(&[7]);
        let other = Address::repeat_byte(0x99);
        assert!(load_market_state(&ledger, other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_position_in_unlisted_market_is_inconsistent() {
        let ledger = MockLedger::with_markets(&[7]);
        let state = load_market_state(&ledger, EXCHANGE).await.unwrap().unwrap();

        // Position in market 12, which the exchange does not list
        let acct = account(0x11, 100, &[(12, 10, 100)]);
        let err = evaluate_account(&MaintenanceMarginEvaluator, &acct, &state, now()).unwrap_err();
        assert!(matches!(err, LiquidationError::MissingMarket { market_id: 12, .. }));
        assert!(liquidation_refs(&acct, &state.markets).is_err());
    }

    #[tokio::test]
    async fn test_refs_follow_position_order() {
        let ledger = MockLedger::with_markets(&[7, 12]);
        let state = load_market_state(&ledger, EXCHANGE).await.unwrap().unwrap();

        let acct = account(0x11, 100, &[(12, 1, 100), (7, 0, 100), (7, -1, 100)]);
        let (markets, feeds) = liquidation_refs(&acct, &state.markets).unwrap();
        assert_eq!(markets, vec![state.markets[&12].address, state.markets[&7].address]);
        assert_eq!(feeds, vec![state.markets[&12].price_feed, state.markets[&7].price_feed]);
    }
}
