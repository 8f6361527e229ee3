//! Configuration management with profile support.
//!
//! Provides centralized tuning for the scanner, the executor and the bus,
//! with named profiles (default, testing, production) or a TOML file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure containing all tunable parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Candidate detection loop
    #[serde(default)]
    pub scanner: ScannerSettings,

    /// Liquidation execution loop
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Candidate bus layout and consumption
    #[serde(default)]
    pub bus: BusSettings,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Scanner timing and read fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSettings {
    /// Time between full scans (seconds)
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,

    /// Concurrent ledger reads while enumerating accounts
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

fn default_scan_interval() -> u64 {
    300
}
fn default_fetch_concurrency() -> usize {
    16
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_scan_interval(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

impl ScannerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Executor pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Pause after handing a fact back for redelivery (milliseconds)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Deliveries of one fact that may fail before it is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_backoff() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ExecutorSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Bus layout and consumer behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Partitions of the candidate topic
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Consumer group shared by all executors
    #[serde(default = "default_group")]
    pub group: String,

    /// New groups start at the earliest retained fact
    #[serde(default = "default_from_beginning")]
    pub from_beginning: bool,

    /// Idle poll interval of the file consumer (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_partitions() -> u32 {
    4
}
fn default_group() -> String {
    "liquidators".to_string()
}
fn default_from_beginning() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    250
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            group: default_group(),
            from_beginning: default_from_beginning(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl BusSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            scanner: ScannerSettings::default(),
            executor: ExecutorSettings::default(),
            bus: BusSettings::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Fast cycles for local chains and integration runs.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            scanner: ScannerSettings {
                interval_secs: 10,
                fetch_concurrency: 4,
            },
            executor: ExecutorSettings {
                retry_backoff_ms: 200,
                max_attempts: 3,
            },
            bus: BusSettings {
                partitions: 1,
                poll_interval_ms: 50,
                ..Default::default()
            },
        }
    }

    /// Conservative settings for mainnet.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            scanner: ScannerSettings {
                interval_secs: 300,
                fetch_concurrency: 32,
            },
            executor: ExecutorSettings {
                retry_backoff_ms: 2_000,
                max_attempts: 10,
            },
            bus: BusSettings {
                partitions: 8,
                ..Default::default()
            },
        }
    }

    /// Resolve a profile name or a path to a TOML file.
    pub fn from_profile(profile: &str) -> anyhow::Result<Self> {
        match profile.to_lowercase().as_str() {
            "default" | "" => Ok(Self::default()),
            "testing" | "test" => Ok(Self::testing()),
            "production" | "prod" => Ok(Self::production()),
            _ if profile.ends_with(".toml") => Self::from_file(profile)
                .map_err(|e| anyhow::anyhow!("Failed to load config file {}: {}", profile, e)),
            other => Err(anyhow::anyhow!("Unknown BOT_PROFILE: {}", other)),
        }
    }

    /// Profile from the BOT_PROFILE environment variable, failing on a bad value.
    pub fn try_from_env() -> anyhow::Result<Self> {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    /// Profile from BOT_PROFILE, or the default profile if it cannot be resolved.
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default configuration");
            Self::default()
        })
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            interval_secs = self.scanner.interval_secs,
            fetch_concurrency = self.scanner.fetch_concurrency,
            "Scanner settings"
        );
        tracing::info!(
            retry_backoff_ms = self.executor.retry_backoff_ms,
            max_attempts = self.executor.max_attempts,
            "Executor settings"
        );
        tracing::info!(
            partitions = self.bus.partitions,
            group = %self.bus.group,
            from_beginning = self.bus.from_beginning,
            poll_interval_ms = self.bus.poll_interval_ms,
            "Bus settings"
        );
    }
}

/// Global configuration holder using lazy initialization.
use std::sync::OnceLock;

static GLOBAL_CONFIG: OnceLock<BotConfig> = OnceLock::new();

/// Initialize global configuration.
pub fn init_config(config: BotConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

/// Get the global configuration, initializing from environment if needed.
pub fn config() -> &'static BotConfig {
    GLOBAL_CONFIG.get_or_init(BotConfig::from_env)
}
