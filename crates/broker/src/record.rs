//! Records and topic metadata.

use chrono::{DateTime, Utc};

/// A message read from one partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    /// Returns the payload as UTF-8 text, replacing invalid sequences.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Where a published message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Topic creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicSpec {
    pub partitions: i32,
    pub replication: i32,
}

impl TopicSpec {
    pub fn new(partitions: i32) -> Self {
        Self {
            partitions,
            ..Self::default()
        }
    }

    /// Zero (or negative) partition counts become one.
    pub fn normalized(self) -> Self {
        Self {
            partitions: self.partitions.max(1),
            replication: self.replication.max(1),
        }
    }
}

impl Default for TopicSpec {
    fn default() -> Self {
        Self {
            partitions: 1,
            replication: 1,
        }
    }
}
