//! Candidate fact schema.
//!
//! A candidate fact says "as of some past moment this account looked
//! liquidatable". It carries no health data: consumers must re-evaluate.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Topic carrying candidate facts.
pub const ACCOUNT_LIQUIDATION_CANDIDATES: &str = "account-liquidation-candidates";

/// Current payload schema version.
pub const FACT_SCHEMA_VERSION: u16 = 1;

/// Advisory liquidation candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandidateFact {
    pub account: Address,
    pub exchange: Address,
    pub owner: Address,
}

/// Payload decoding failures.
#[derive(Debug, thiserror::Error)]
pub enum FactError {
    #[error("malformed candidate payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to encode candidate payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("unsupported candidate schema version {0}")]
    UnsupportedVersion(u16),
}

/// Wire representation. Field-named so the payload is self-describing.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FactPayload {
    version: u16,
    account_address: Address,
    exchange_address: Address,
    owner_address: Address,
}

impl CandidateFact {
    pub fn new(account: Address, exchange: Address, owner: Address) -> Self {
        Self { account, exchange, owner }
    }

    /// Serialize to the versioned JSON payload.
    pub fn encode(&self) -> Result<Vec<u8>, FactError> {
        let payload = FactPayload {
            version: FACT_SCHEMA_VERSION,
            account_address: self.account,
            exchange_address: self.exchange,
            owner_address: self.owner,
        };
        serde_json::to_vec(&payload).map_err(FactError::Encode)
    }

    /// Parse a payload, rejecting unknown versions and missing fields.
    pub fn decode(bytes: &[u8]) -> Result<Self, FactError> {
        let payload: FactPayload = serde_json::from_slice(bytes)?;
        if payload.version != FACT_SCHEMA_VERSION {
            return Err(FactError::UnsupportedVersion(payload.version));
        }
        Ok(Self {
            account: payload.account_address,
            exchange: payload.exchange_address,
            owner: payload.owner_address,
        })
    }
}
