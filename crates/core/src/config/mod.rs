//! Configuration for the scanner and executor processes.
//!
//! This module provides:
//! - Tunable runtime configuration (profiles, intervals, bus layout)
//! - Per-role process environment with up-front validation

mod bot;
mod runtime;

// Re-export bot config (main runtime config)
pub use bot::{config, init_config, BotConfig, BusSettings, ExecutorSettings, ScannerSettings};

// Re-export process environment
pub use runtime::{env, ExecuteEnv, Role, ScanEnv};
