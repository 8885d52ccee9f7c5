//! Broker error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Joining (or re-joining) the consumer group failed.
    #[error("Failed to join consumer group '{group}': {reason}")]
    Join { group: String, reason: String },

    /// The topic does not exist.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The partition does not exist for the topic.
    #[error("Unknown partition {partition} for topic '{topic}'")]
    UnknownPartition { topic: String, partition: i32 },

    /// The topic already exists; returned by topic creation.
    #[error("Topic already exists: {0}")]
    TopicExists(String),

    /// The admin response carried a per-topic error.
    #[error("Failed to create topic '{topic}': {reason}")]
    TopicCreation { topic: String, reason: String },

    /// The broker did not acknowledge a write.
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Marked offsets could not be committed.
    #[error("Offset commit failed: {0}")]
    Commit(String),

    /// The consumer group has been closed.
    #[error("Consumer group is closed")]
    Closed,

    /// Delivery loops did not finish within the drain timeout.
    #[error("Delivery loops did not drain within {0:?}")]
    DrainTimeout(Duration),

    /// A background task panicked.
    #[error("Background task failed: {0}")]
    Task(String),

    /// A signal handler could not be installed.
    #[error("Signal handler error: {0}")]
    Signal(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error reported by librdkafka.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
