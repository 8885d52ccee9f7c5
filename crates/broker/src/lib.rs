//! Message broker plumbing for the checkout saga.
//!
//! This crate provides:
//! - [`ConsumerSession`]: a rebalance-safe, at-least-once consumer-group
//!   session with pause/resume and graceful shutdown
//! - [`Producer`]: fire-and-log publishing and topic creation
//! - [`DeliveryHandler`]: the per-message processing contract
//! - [`InMemoryBroker`]: an in-process backend for tests and local runs
//! - a Kafka backend (feature `kafka`)

pub mod client;
pub mod error;
pub mod handler;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod producer;
pub mod record;
pub mod session;
mod signal;

pub use client::{ConsumerGroup, GroupSession, MessageSink, PartitionClaim};
pub use error::{BrokerError, Result};
pub use handler::{DeliveryHandler, HandlerError};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumerGroup, KafkaSettings, KafkaSink};
pub use memory::{InMemoryBroker, InMemoryConsumerGroup};
pub use producer::Producer;
pub use record::{Delivery, Record, TopicSpec};
pub use session::{ConsumerSession, SessionController, SessionOptions};
