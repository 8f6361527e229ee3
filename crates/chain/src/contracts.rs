//! Contract bindings for the perpetuals exchange and its price feeds.
//!
//! This module provides the `sol!` interfaces, conversions into the ledger
//! snapshot types, and the liquidation call encoder.

use alloy::primitives::{Address, Bytes};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::Result;
use smallvec::SmallVec;

use crate::types::{Exchange, LiquidationRequest, MarginAccount, Market, Position, PriceFeed};

sol! {
    /// Exchange-wide configuration
    #[derive(Debug)]
    struct ExchangeInfo {
        uint32[] marketIds;
    }

    /// Market parameters
    #[derive(Debug)]
    struct MarketInfo {
        bool exists;
        uint32 id;
        address market;
        address priceFeed;
        uint32 initialMarginBps;
        uint32 maintenanceMarginBps;
        uint64 maxPriceAgeSecs;
    }

    /// Single open position
    #[derive(Debug)]
    struct PositionInfo {
        uint32 marketId;
        int128 size;
        uint128 entryPrice;
    }

    /// Margin account state
    #[derive(Debug)]
    struct MarginAccountInfo {
        bool exists;
        address exchange;
        address owner;
        uint128 collateral;
        bool inLiquidation;
        PositionInfo[] positions;
    }

    /// Perpetuals exchange interface (subset used for liquidations)
    #[sol(rpc)]
    interface IPerpExchange {
        function exchangeInfo() external view returns (ExchangeInfo memory info);
        function marketInfo(uint32 id) external view returns (MarketInfo memory info);
        function marginAccountInfo(address account) external view returns (MarginAccountInfo memory info);
        function marginAccountCount() external view returns (uint256 count);
        function marginAccountAt(uint256 index) external view returns (address account);

        function liquidate(
            address account,
            address owner,
            address liquidatorAccount,
            address[] calldata markets,
            address[] calldata priceFeeds
        ) external;
    }

    /// Chainlink-compatible price feed
    #[sol(rpc)]
    interface IAggregator {
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );
        function decimals() external view returns (uint8);
    }
}

impl ExchangeInfo {
    pub fn into_exchange(self, address: Address) -> Exchange {
        Exchange { address, market_ids: self.marketIds }
    }
}

impl MarketInfo {
    /// Convert into a snapshot, `None` when the slot is unused.
    pub fn into_market(self) -> Option<Market> {
        if !self.exists {
            return None;
        }
        Some(Market {
            id: self.id,
            address: self.market,
            price_feed: self.priceFeed,
            initial_margin_bps: self.initialMarginBps,
            maintenance_margin_bps: self.maintenanceMarginBps,
            max_price_age_secs: self.maxPriceAgeSecs,
        })
    }
}

impl MarginAccountInfo {
    /// Convert into a snapshot, `None` when the account was closed.
    pub fn into_account(self, address: Address) -> Option<MarginAccount> {
        if !self.exists {
            return None;
        }
        let positions: SmallVec<[Position; 4]> = self
            .positions
            .into_iter()
            .map(|p| Position {
                market_id: p.marketId,
                size: p.size,
                entry_price: p.entryPrice,
            })
            .collect();

        Some(MarginAccount {
            address,
            exchange: self.exchange,
            owner: self.owner,
            collateral: self.collateral,
            in_liquidation: self.inLiquidation,
            positions,
        })
    }
}

/// Build a price feed snapshot from a round answer.
pub fn price_feed_from_round(
    address: Address,
    round: IAggregator::latestRoundDataReturn,
    decimals: u8,
) -> Result<PriceFeed> {
    let answer = i128::try_from(round.answer)
        .map_err(|_| anyhow::anyhow!("Price answer out of range for feed {}", address))?;

    Ok(PriceFeed {
        address,
        answer,
        decimals,
        updated_at: round.updatedAt.saturating_to::<u64>(),
    })
}

/// Encode the exchange's `liquidate` call.
pub fn encode_liquidate(request: &LiquidationRequest) -> Bytes {
    let call = IPerpExchange::liquidateCall {
        account: request.account,
        owner: request.owner,
        liquidatorAccount: request.liquidator_account,
        markets: request.markets.clone(),
        priceFeeds: request.price_feeds.clone(),
    };
    Bytes::from(call.abi_encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_account_is_none() {
        let info = MarginAccountInfo {
            exists: false,
            exchange: Address::ZERO,
            owner: Address::ZERO,
            collateral: 0,
            inLiquidation: false,
            positions: Vec::new(),
        };
        assert!(info.into_account(Address::repeat_byte(1)).is_none());
    }

    #[test]
    fn test_account_conversion() {
        let info = MarginAccountInfo {
            exists: true,
            exchange: Address::repeat_byte(0xEE),
            owner: Address::repeat_byte(0x0A),
            collateral: 5_000_000,
            inLiquidation: true,
            positions: vec![PositionInfo { marketId: 7, size: -1_000_000_000, entryPrice: 2_000_000 }],
        };
        let account = info.into_account(Address::repeat_byte(1)).unwrap();
        assert_eq!(account.address, Address::repeat_byte(1));
        assert_eq!(account.owner, Address::repeat_byte(0x0A));
        assert!(account.in_liquidation);
        assert_eq!(account.positions.len(), 1);
        assert_eq!(account.positions[0].market_id, 7);
    }

    #[test]
    fn test_unused_market_slot() {
        let info = MarketInfo {
            exists: false,
            id: 0,
            market: Address::ZERO,
            priceFeed: Address::ZERO,
            initialMarginBps: 0,
            maintenanceMarginBps: 0,
            maxPriceAgeSecs: 0,
        };
        assert!(info.into_market().is_none());
    }

    #[test]
    fn test_encode_liquidate_selector() {
        let request = LiquidationRequest {
            account: Address::repeat_byte(1),
            exchange: Address::repeat_byte(2),
            owner: Address::repeat_byte(3),
            liquidator: Address::repeat_byte(4),
            liquidator_account: Address::repeat_byte(5),
            markets: vec![Address::repeat_byte(6)],
            price_feeds: vec![Address::repeat_byte(7)],
        };
        let calldata = encode_liquidate(&request);
        assert_eq!(&calldata[..4], IPerpExchange::liquidateCall::SELECTOR.as_slice());

        let decoded = IPerpExchange::liquidateCall::abi_decode(&calldata, true).unwrap();
        assert_eq!(decoded.account, request.account);
        assert_eq!(decoded.markets, request.markets);
        assert_eq!(decoded.priceFeeds, request.price_feeds);
    }
}
