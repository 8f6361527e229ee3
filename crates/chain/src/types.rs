//! Ledger snapshot types.
//!
//! Every value here is a point-in-time read of on-chain state. Nothing is
//! cached between scan cycles; callers refetch whenever they need to decide.

use alloy::primitives::{Address, B256};
use smallvec::SmallVec;

/// Market identifier within an exchange. `0` marks an empty slot.
pub type MarketId = u32;

/// Sentinel id the exchange uses for unused market slots.
pub const EMPTY_MARKET_ID: MarketId = 0;

/// Decimals of collateral balances and entry prices.
pub const QUOTE_DECIMALS: u32 = 6;

/// Decimals of position sizes.
pub const SIZE_DECIMALS: u32 = 9;

/// Exchange configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Exchange contract address
    pub address: Address,
    /// Ordered market slots, may contain `EMPTY_MARKET_ID`
    pub market_ids: Vec<MarketId>,
}

/// Per-instrument market snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    pub id: MarketId,
    /// Market account address (referenced by liquidation instructions)
    pub address: Address,
    /// Price feed for the market's underlying
    pub price_feed: Address,
    /// Initial margin (basis points of notional)
    pub initial_margin_bps: u32,
    /// Maintenance margin (basis points of notional)
    pub maintenance_margin_bps: u32,
    /// Oldest acceptable price update (seconds)
    pub max_price_age_secs: u64,
}

/// Latest oracle reading for one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceFeed {
    pub address: Address,
    /// Raw answer scaled by `decimals`
    pub answer: i128,
    pub decimals: u8,
    /// Unix timestamp of the last update
    pub updated_at: u64,
}

impl PriceFeed {
    /// Price as a float.
    pub fn price(&self) -> f64 {
        self.answer as f64 / 10f64.powi(self.decimals as i32)
    }

    /// Seconds elapsed since the last update, relative to `now`.
    pub fn age_secs(&self, now: i64) -> u64 {
        (now.max(0) as u64).saturating_sub(self.updated_at)
    }
}

/// Open position in a single market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub market_id: MarketId,
    /// Signed size, `SIZE_DECIMALS` (negative = short)
    pub size: i128,
    /// Average entry price, `QUOTE_DECIMALS`
    pub entry_price: u128,
}

impl Position {
    /// Size in base units as a float.
    pub fn size_f64(&self) -> f64 {
        self.size as f64 / 10f64.powi(SIZE_DECIMALS as i32)
    }

    /// Entry price as a float.
    pub fn entry_price_f64(&self) -> f64 {
        self.entry_price as f64 / 10f64.powi(QUOTE_DECIMALS as i32)
    }

    /// Whether the position still carries exposure.
    pub fn is_open(&self) -> bool {
        self.size != 0
    }
}

/// A trader's margin account, the unit of liquidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarginAccount {
    pub address: Address,
    pub exchange: Address,
    pub owner: Address,
    /// Collateral balance, `QUOTE_DECIMALS`
    pub collateral: u128,
    /// Set by the exchange once a liquidation has started
    pub in_liquidation: bool,
    pub positions: SmallVec<[Position; 4]>,
}

impl MarginAccount {
    /// Collateral as a float.
    pub fn collateral_f64(&self) -> f64 {
        self.collateral as f64 / 10f64.powi(QUOTE_DECIMALS as i32)
    }

    /// Positions with non-zero size.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_open())
    }
}

/// Everything the ledger needs to liquidate one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationRequest {
    pub account: Address,
    pub exchange: Address,
    pub owner: Address,
    /// Signer submitting the liquidation
    pub liquidator: Address,
    /// Margin account receiving the liquidated positions
    pub liquidator_account: Address,
    /// Market of every open position, in position order
    pub markets: Vec<Address>,
    /// Price feed of every open position, in position order
    pub price_feeds: Vec<Address>,
}

/// Confirmation identifier (transaction hash).
pub type Signature = B256;
