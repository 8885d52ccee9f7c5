//! Fire-and-log publishing.

use serde::Serialize;
use tracing::{error, info};

use crate::client::MessageSink;
use crate::error::{BrokerError, Result};
use crate::record::TopicSpec;

/// Publishes payloads to topics.
///
/// A publish waits for the broker acknowledgement, but its outcome is only
/// logged: the caller is never told about a delivery failure and nothing is
/// retried. Callers that must not lose a message need their own outbox.
pub struct Producer<S> {
    sink: S,
}

impl<S: MessageSink> Producer<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Sends a payload and logs the outcome.
    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) {
        match self.sink.send(topic, payload).await {
            Ok(delivery) => {
                metrics::counter!("producer_messages_sent_total", "topic" => topic.to_string())
                    .increment(1);
                info!(
                    topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "message sent"
                );
            }
            Err(e) => {
                metrics::counter!("producer_send_failures_total", "topic" => topic.to_string())
                    .increment(1);
                error!(topic, error = %e, "failed to send message");
            }
        }
    }

    /// Serializes a value as JSON and publishes it.
    ///
    /// Only the serialization can fail; delivery failures are logged.
    pub async fn publish_json<T: Serialize + Sync>(&self, topic: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, payload).await;
        Ok(())
    }

    /// Creates a topic with one partition and replication factor one.
    pub async fn create_topic(&self, name: &str) -> Result<()> {
        self.create_topic_with(name, TopicSpec::default()).await
    }

    /// Creates a topic. A partition count of zero is treated as one.
    #[tracing::instrument(skip(self))]
    pub async fn create_topic_with(&self, name: &str, spec: TopicSpec) -> Result<()> {
        self.sink.create_topic(name, spec.normalized()).await
    }

    /// Creates a topic unless it already exists.
    pub async fn ensure_topic(&self, name: &str, spec: TopicSpec) -> Result<()> {
        match self.create_topic_with(name, spec).await {
            Ok(()) => {
                info!(topic = name, "topic created");
                Ok(())
            }
            Err(BrokerError::TopicExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
