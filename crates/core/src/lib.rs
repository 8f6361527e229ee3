//! Liquidator core logic.
//!
//! This crate provides the scan → flag → re-verify → execute pipeline:
//! - Risk evaluation (maintenance margin check behind a trait)
//! - Shared market-state assembly for scanner and executor
//! - The candidate detector loop
//! - The re-verifying liquidation executor
//! - Runtime configuration and per-role environment validation

pub mod config;
mod detector;
mod error;
mod executor;
mod market_state;
mod risk;

#[cfg(test)]
mod testing;

pub use config::{config, init_config, BotConfig, ExecuteEnv, Role, ScanEnv};
pub use detector::{Detector, DetectorConfig, ScanReport};
pub use error::LiquidationError;
pub use executor::{ExecutionOutcome, Executor, ExecutorConfig, ExecutorStats};
pub use market_state::{
    active_market_ids, evaluate_account, liquidation_refs, load_market_state, load_markets,
    MarketState,
};
pub use risk::{EvaluationError, HealthVerdict, MaintenanceMarginEvaluator, RiskEvaluator};
