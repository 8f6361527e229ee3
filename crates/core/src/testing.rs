//! In-memory ledger for unit tests.
//!
//! Implements both ledger traits over one shared state, and applies the same
//! maintenance-margin check the exchange contract would before accepting a
//! liquidation, so races and false positives play out like on chain.

use alloy::primitives::{Address, B256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use liquidator_chain::{
    Exchange, LiquidationRequest, MarginAccount, Market, MarketId, Position, PriceFeed, Signature,
    StateFetcher, SubmitError, TransactionSubmitter, EMPTY_MARKET_ID,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::time::Duration;

use crate::risk::{MaintenanceMarginEvaluator, RiskEvaluator};

pub const EXCHANGE: Address = Address::repeat_byte(0xEE);
pub const OWNER: Address = Address::repeat_byte(0x0A);
pub const LIQUIDATOR: Address = Address::repeat_byte(0x1D);
pub const LIQUIDATOR_ACCOUNT: Address = Address::repeat_byte(0x1A);

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn market_address(id: MarketId) -> Address {
    Address::repeat_byte(id as u8)
}

pub fn feed_address(id: MarketId) -> Address {
    Address::repeat_byte(0x80 | id as u8)
}

/// Account `0xbb..bb` on `EXCHANGE` with whole-unit collateral and positions
/// given as `(market, size, entry price)`.
pub fn account(byte: u8, collateral: u128, positions: &[(MarketId, i128, u128)]) -> MarginAccount {
    MarginAccount {
        address: Address::repeat_byte(byte),
        exchange: EXCHANGE,
        owner: OWNER,
        collateral: collateral * 1_000_000,
        in_liquidation: false,
        positions: positions
            .iter()
            .map(|(market_id, size, entry)| Position {
                market_id: *market_id,
                size: size * 1_000_000_000,
                entry_price: entry * 1_000_000,
            })
            .collect::<SmallVec<_>>(),
    }
}

/// 10 long at 100 backed by 1000: healthy at price 100.
pub fn healthy(byte: u8) -> MarginAccount {
    account(byte, 1_000, &[(7, 10, 100)])
}

/// 10 long at 150 backed by 100: deep underwater at price 100.
pub fn underwater(byte: u8) -> MarginAccount {
    account(byte, 100, &[(7, 10, 150)])
}

#[derive(Default)]
struct LedgerState {
    exchange: Option<Exchange>,
    markets: HashMap<MarketId, Market>,
    feeds: HashMap<Address, PriceFeed>,
    /// Enumeration order; the same address may appear twice
    accounts: Vec<MarginAccount>,
    market_requests: Vec<Vec<MarketId>>,
    submissions: Vec<LiquidationRequest>,
    failing_account_fetches: u32,
    failing_submissions: u32,
    submit_delay: Duration,
    enumeration_delay: Duration,
}

pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    /// Exchange `EXCHANGE` with the given slots; every non-empty slot gets a
    /// market priced at 100 with a fresh feed.
    pub fn with_markets(slots: &[MarketId]) -> Self {
        let mut state = LedgerState {
            exchange: Some(Exchange {
                address: EXCHANGE,
                market_ids: slots.to_vec(),
            }),
            ..Default::default()
        };
        for id in slots.iter().copied().filter(|id| *id != EMPTY_MARKET_ID) {
            state.markets.insert(
                id,
                Market {
                    id,
                    address: market_address(id),
                    price_feed: feed_address(id),
                    initial_margin_bps: 1_000,
                    maintenance_margin_bps: 500,
                    max_price_age_secs: 3_600,
                },
            );
            state.feeds.insert(
                feed_address(id),
                PriceFeed {
                    address: feed_address(id),
                    answer: 100 * 100_000_000,
                    decimals: 8,
                    updated_at: now() as u64,
                },
            );
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn insert_account(&self, account: MarginAccount) {
        self.state.lock().accounts.push(account);
    }

    pub fn remove_account(&self, address: Address) {
        self.state.lock().accounts.retain(|a| a.address != address);
    }

    pub fn set_in_liquidation(&self, address: Address) {
        for account in self.state.lock().accounts.iter_mut().filter(|a| a.address == address) {
            account.in_liquidation = true;
        }
    }

    pub fn remove_market(&self, id: MarketId) {
        self.state.lock().markets.remove(&id);
    }

    pub fn remove_exchange(&self) {
        self.state.lock().exchange = None;
    }

    pub fn set_price(&self, id: MarketId, price: i128) {
        if let Some(feed) = self.state.lock().feeds.get_mut(&feed_address(id)) {
            feed.answer = price * 100_000_000;
        }
    }

    pub fn set_feed_age(&self, id: MarketId, age_secs: u64) {
        if let Some(feed) = self.state.lock().feeds.get_mut(&feed_address(id)) {
            feed.updated_at = now() as u64 - age_secs;
        }
    }

    pub fn fail_account_fetches(&self, count: u32) {
        self.state.lock().failing_account_fetches = count;
    }

    pub fn fail_submissions(&self, count: u32) {
        self.state.lock().failing_submissions = count;
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        self.state.lock().submit_delay = delay;
    }

    pub fn set_enumeration_delay(&self, delay: Duration) {
        self.state.lock().enumeration_delay = delay;
    }

    pub fn market_requests(&self) -> Vec<Vec<MarketId>> {
        self.state.lock().market_requests.clone()
    }

    pub fn submissions(&self) -> Vec<LiquidationRequest> {
        self.state.lock().submissions.clone()
    }
}

#[async_trait]
impl StateFetcher for MockLedger {
    async fn get_exchange(&self, exchange: Address) -> Result<Option<Exchange>> {
        Ok(self
            .state
            .lock()
            .exchange
            .clone()
            .filter(|e| e.address == exchange))
    }

    async fn get_markets(&self, _exchange: Address, ids: &[MarketId]) -> Result<Vec<Option<Market>>> {
        let mut state = self.state.lock();
        state.market_requests.push(ids.to_vec());
        Ok(ids.iter().map(|id| state.markets.get(id).cloned()).collect())
    }

    async fn get_price_feeds(&self, feeds: &[Address]) -> Result<Vec<Option<PriceFeed>>> {
        let state = self.state.lock();
        Ok(feeds.iter().map(|f| state.feeds.get(f).cloned()).collect())
    }

    async fn get_margin_account(&self, _exchange: Address, account: Address) -> Result<Option<MarginAccount>> {
        let mut state = self.state.lock();
        if state.failing_account_fetches > 0 {
            state.failing_account_fetches -= 1;
            return Err(anyhow!("connection reset"));
        }
        Ok(state.accounts.iter().find(|a| a.address == account).cloned())
    }

    async fn get_all_margin_accounts(&self, _exchange: Address) -> Result<Vec<MarginAccount>> {
        let delay = self.state.lock().enumeration_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state.lock().accounts.clone())
    }
}

#[async_trait]
impl TransactionSubmitter for MockLedger {
    fn liquidator(&self) -> Address {
        LIQUIDATOR
    }

    async fn submit_liquidation(&self, request: &LiquidationRequest) -> Result<Signature, SubmitError> {
        let delay = self.state.lock().submit_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.failing_submissions > 0 {
            state.failing_submissions -= 1;
            return Err(SubmitError::Transport(anyhow!("request timed out")));
        }

        let Some(account) = state.accounts.iter().find(|a| a.address == request.account) else {
            return Err(SubmitError::Rejected("execution reverted: unknown account".into()));
        };
        let Some(exchange) = state.exchange.as_ref() else {
            return Err(SubmitError::Rejected("execution reverted: unknown exchange".into()));
        };
        let verdict = MaintenanceMarginEvaluator
            .evaluate(account, exchange, &state.markets, &state.feeds, now())
            .map_err(|e| SubmitError::Rejected(format!("execution reverted: {}", e)))?;
        if !verdict.can_liquidate {
            return Err(SubmitError::Rejected("execution reverted: account is healthy".into()));
        }

        for account in state.accounts.iter_mut().filter(|a| a.address == request.account) {
            account.positions.clear();
            account.collateral = 0;
            account.in_liquidation = false;
        }
        state.submissions.push(request.clone());
        Ok(B256::with_last_byte(state.submissions.len() as u8))
    }
}
