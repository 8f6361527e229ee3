//! Candidate bus between the scanner and the executors.
//!
//! This crate provides:
//! - The versioned `CandidateFact` payload schema
//! - The `CandidatePublisher` / `CandidateConsumer` at-least-once contract
//! - A durable file-log bus with consumer groups and committed offsets
//! - An in-memory bus with the same contract

mod fact;
mod file;
mod memory;
mod traits;

pub use fact::{CandidateFact, FactError, ACCOUNT_LIQUIDATION_CANDIDATES, FACT_SCHEMA_VERSION};
pub use file::{
    partition_for, ConsumerOptions, FileBus, FileBusConfig, FileConsumer, DEFAULT_GROUP,
    DEFAULT_PARTITIONS,
};
pub use memory::{MemoryBus, MemoryConsumer};
pub use traits::{BusError, CandidateConsumer, CandidatePublisher, Delivery};
