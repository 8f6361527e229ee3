//! Publish/subscribe contract between the scanner and the executors.
//!
//! Delivery is at-least-once: a delivery stays pending until acknowledged, and
//! anything not acknowledged (nacked, or lost with its consumer) comes back.

use async_trait::async_trait;

use crate::fact::{CandidateFact, FactError};

/// Bus transport failures.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt offset state: {0}")]
    Offset(String),

    #[error(transparent)]
    Encode(#[from] FactError),

    #[error("unknown partition {0}")]
    UnknownPartition(u32),

    #[error("bus closed")]
    Closed,
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub partition: u32,
    /// Position of this message within its partition
    pub offset: u64,
    /// Position right after this message (committed on ack)
    pub next_offset: u64,
    /// Raw payload; consumers decode and validate it
    pub payload: Vec<u8>,
}

/// Producer side.
#[async_trait]
pub trait CandidatePublisher: Send + Sync {
    /// Durably publish a batch. `Ok` means every fact is durable. On error
    /// part of the batch may already be published, so a retry can duplicate
    /// facts; consumers already tolerate redelivery.
    async fn publish_batch(&self, facts: &[CandidateFact]) -> Result<(), BusError>;

    /// Publish a single fact.
    async fn publish(&self, fact: &CandidateFact) -> Result<(), BusError> {
        self.publish_batch(std::slice::from_ref(fact)).await
    }
}

/// Consumer side, one instance per consumer-group member.
#[async_trait]
pub trait CandidateConsumer: Send {
    /// Wait for the next delivery. Cancel safe: dropping the future before it
    /// resolves loses nothing.
    async fn next(&mut self) -> Result<Delivery, BusError>;

    /// Commit a processed delivery.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError>;

    /// Give a delivery back so it is delivered again.
    async fn nack(&mut self, delivery: &Delivery) -> Result<(), BusError>;
}
