//! Broker client abstractions.
//!
//! A [`ConsumerGroup`] hands out one [`GroupSession`] per group generation.
//! Each session owns a set of [`PartitionClaim`]s; a claim yields the records
//! of one partition in offset order until the partition is revoked.
//! Offsets are marked on the session and made durable by
//! [`GroupSession::commit`], which runs when the generation ends.

use async_trait::async_trait;

use crate::error::Result;
use crate::record::{Delivery, Record, TopicSpec};

/// A consumer group membership.
#[async_trait]
pub trait ConsumerGroup: Send + Sync + 'static {
    type Session: GroupSession;

    /// The group id.
    fn group_id(&self) -> &str;

    /// Joins the group for the given topics and waits for an assignment.
    ///
    /// Returns a session for the new generation; the session ends when
    /// [`GroupSession::revoked`] resolves.
    async fn join(&self, topics: &[String]) -> Result<Self::Session>;

    /// Stops fetching on every assigned partition without leaving the group.
    fn pause_all(&self);

    /// Resumes fetching on every assigned partition.
    fn resume_all(&self);

    /// Leaves the group and releases client resources.
    async fn close(&self) -> Result<()>;
}

/// One generation of group membership.
#[async_trait]
pub trait GroupSession: Send + Sync + 'static {
    type Claim: PartitionClaim;

    /// The generation this session belongs to.
    fn generation(&self) -> i32;

    /// Takes the partition claims assigned in this generation.
    ///
    /// Subsequent calls return an empty vector.
    fn take_claims(&mut self) -> Vec<Self::Claim>;

    /// Marks a record as processed. Marked offsets are committed by
    /// [`GroupSession::commit`].
    fn mark(&self, record: &Record);

    /// Resolves once the assignment of this generation has been revoked.
    async fn revoked(&self);

    /// Commits every marked offset.
    async fn commit(&self) -> Result<()>;
}

/// The records of one assigned partition.
#[async_trait]
pub trait PartitionClaim: Send + 'static {
    fn topic(&self) -> &str;

    fn partition(&self) -> i32;

    /// Waits for the next record.
    ///
    /// Returns `None` once the claim is revoked or the group closes.
    /// Dropping the returned future before it completes loses no record.
    async fn next_record(&mut self) -> Option<Record>;
}

/// The write side of a broker.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    /// Sends a payload and waits for the broker acknowledgement.
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery>;

    /// Creates a topic.
    async fn create_topic(&self, name: &str, spec: TopicSpec) -> Result<()>;
}
