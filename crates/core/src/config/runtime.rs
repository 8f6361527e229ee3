//! Process environment per role.
//!
//! Required variables are checked up front so a misconfigured process exits
//! before touching the ledger or the bus.

use alloy::primitives::Address;
use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable names.
pub mod env {
    pub const RPC_URL: &str = "RPC_URL";
    pub const EXCHANGE_ADDRESS: &str = "EXCHANGE_ADDRESS";
    pub const BUS_DIR: &str = "BUS_DIR";
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const LIQUIDATOR_MARGIN_ACCOUNT: &str = "LIQUIDATOR_MARGIN_ACCOUNT";
    pub const SCAN_INTERVAL_SECS: &str = "SCAN_INTERVAL_SECS";
    pub const BUS_PARTITIONS: &str = "BUS_PARTITIONS";
    pub const BUS_REPLAY: &str = "BUS_REPLAY";
}

/// Which half of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Scan,
    Execute,
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "scan" | "scanner" | "detect" => Ok(Self::Scan),
            "execute" | "executor" | "liquidate" => Ok(Self::Execute),
            other => Err(anyhow!("Unknown role '{}', expected 'scan' or 'execute'", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan => write!(f, "scan"),
            Self::Execute => write!(f, "execute"),
        }
    }
}

/// Environment of a scanner process.
#[derive(Debug, Clone)]
pub struct ScanEnv {
    pub rpc_url: String,
    pub exchange: Address,
    pub bus_dir: PathBuf,
    /// Overrides the profile's scan interval
    pub interval: Option<Duration>,
}

/// Environment of an executor process.
#[derive(Clone)]
pub struct ExecuteEnv {
    pub rpc_url: String,
    pub bus_dir: PathBuf,
    pub private_key: String,
    pub liquidator_account: Address,
    /// Assigned partitions; `None` means all
    pub partitions: Option<Vec<u32>>,
    pub replay: bool,
}

impl fmt::Debug for ExecuteEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteEnv")
            .field("rpc_url", &self.rpc_url)
            .field("bus_dir", &self.bus_dir)
            .field("private_key", &"<redacted>")
            .field("liquidator_account", &self.liquidator_account)
            .field("partitions", &self.partitions)
            .field("replay", &self.replay)
            .finish()
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| anyhow!("Missing env var: {}", name))
    }

    fn address(&self, name: &str) -> Result<Address> {
        self.required(name)?
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid address for {}: {}", name, e))
    }
}

impl ScanEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup };
        let rpc_url = vars.required(env::RPC_URL)?;
        let exchange = vars.address(env::EXCHANGE_ADDRESS)?;
        let bus_dir = PathBuf::from(vars.required(env::BUS_DIR)?);

        let interval = vars
            .optional(env::SCAN_INTERVAL_SECS)
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| anyhow!("Invalid {}: {}", env::SCAN_INTERVAL_SECS, e))
            })
            .transpose()?;

        Ok(Self {
            rpc_url,
            exchange,
            bus_dir,
            interval,
        })
    }
}

impl ExecuteEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup };
        let rpc_url = vars.required(env::RPC_URL)?;
        let bus_dir = PathBuf::from(vars.required(env::BUS_DIR)?);
        let private_key = vars.required(env::PRIVATE_KEY)?;
        let liquidator_account = vars.address(env::LIQUIDATOR_MARGIN_ACCOUNT)?;

        let partitions = vars
            .optional(env::BUS_PARTITIONS)
            .map(|v| parse_partitions(&v))
            .transpose()?;

        let replay = match vars.optional(env::BUS_REPLAY) {
            Some(v) => parse_flag(&v).ok_or_else(|| anyhow!("Invalid {}: {}", env::BUS_REPLAY, v))?,
            None => false,
        };

        Ok(Self {
            rpc_url,
            bus_dir,
            private_key,
            liquidator_account,
            partitions,
            replay,
        })
    }
}

/// Parse `"0,2, 3"` into partition ids.
fn parse_partitions(value: &str) -> Result<Vec<u32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|e| anyhow!("Invalid {} entry '{}': {}", env::BUS_PARTITIONS, s, e))
        })
        .collect()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
