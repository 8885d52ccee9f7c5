//! In-memory broker for tests and local development.
//!
//! Topics are vectors of partition logs, consumer groups keep committed
//! offsets and a generation counter, and partitions are spread over group
//! members round-robin. Rebalances, join failures, slow acknowledgements and
//! failed publishes can be injected from tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use crate::client::{ConsumerGroup, GroupSession, MessageSink, PartitionClaim};
use crate::error::{BrokerError, Result};
use crate::record::{Delivery, Record, TopicSpec};

type PartitionKey = (String, i32);

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<Record>>>,
    groups: HashMap<String, GroupState>,
    next_partition: HashMap<String, usize>,
    next_member: u64,
    fail_next_joins: usize,
    fail_next_publishes: usize,
    publish_delay: Option<Duration>,
}

struct GroupState {
    members: Vec<u64>,
    committed: HashMap<PartitionKey, i64>,
    generation: watch::Sender<i32>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            committed: HashMap::new(),
            generation: watch::channel(0).0,
        }
    }

    fn bump_generation(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    appended: watch::Sender<u64>,
}

/// An in-process, partitioned message log with consumer groups.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                appended: watch::channel(0).0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a new member of the given consumer group.
    pub fn consumer_group(&self, group_id: impl Into<String>) -> InMemoryConsumerGroup {
        let member_id = {
            let mut state = self.state();
            state.next_member += 1;
            state.next_member
        };
        InMemoryConsumerGroup {
            broker: self.clone(),
            group_id: group_id.into(),
            member_id,
            paused: watch::channel(false).0,
            closed: AtomicBool::new(false),
        }
    }

    /// Appends a payload to a specific partition, bypassing injected faults.
    pub fn append(&self, topic: &str, partition: i32, payload: impl Into<Vec<u8>>) -> Result<Delivery> {
        let delivery = {
            let mut state = self.state();
            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new()]);
            append_to(log, topic, partition, payload.into())?
        };
        self.shared.appended.send_modify(|v| *v += 1);
        Ok(delivery)
    }

    /// Forces a new generation for the group; every current session is revoked.
    pub fn trigger_rebalance(&self, group_id: &str) {
        let mut state = self.state();
        state
            .groups
            .entry(group_id.to_string())
            .or_insert_with(GroupState::new)
            .bump_generation();
    }

    /// Makes the next `n` joins fail.
    pub fn fail_next_joins(&self, n: usize) {
        self.state().fail_next_joins = n;
    }

    /// Makes the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.state().fail_next_publishes = n;
    }

    /// Delays every publish acknowledgement.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        self.state().publish_delay = delay;
    }

    /// Returns the committed offset (next offset to consume) for a partition.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .groups
            .get(group_id)
            .and_then(|g| g.committed.get(&(topic.to_string(), partition)).copied())
    }

    /// Returns the current generation of a group.
    pub fn generation(&self, group_id: &str) -> i32 {
        self.state()
            .groups
            .get(group_id)
            .map(|g| *g.generation.borrow())
            .unwrap_or(0)
    }

    /// Returns every record of a topic, ordered by partition and offset.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.state()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the payloads of a topic decoded as JSON.
    pub fn json_records<T: serde::de::DeserializeOwned>(&self, topic: &str) -> Result<Vec<T>> {
        self.records(topic)
            .iter()
            .map(|r| serde_json::from_slice(&r.payload).map_err(BrokerError::from))
            .collect()
    }

    fn record_at(&self, topic: &str, partition: i32, offset: i64) -> Option<Record> {
        let state = self.state();
        state
            .topics
            .get(topic)?
            .get(usize::try_from(partition).ok()?)?
            .get(usize::try_from(offset).ok()?)
            .cloned()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn append_to(log: &mut [Vec<Record>], topic: &str, partition: i32, payload: Vec<u8>) -> Result<Delivery> {
    let records = usize::try_from(partition)
        .ok()
        .and_then(|p| log.get_mut(p))
        .ok_or_else(|| BrokerError::UnknownPartition {
            topic: topic.to_string(),
            partition,
        })?;
    let offset = records.len() as i64;
    records.push(Record {
        topic: topic.to_string(),
        partition,
        offset,
        payload,
        timestamp: Utc::now(),
    });
    Ok(Delivery { partition, offset })
}

#[async_trait]
impl MessageSink for InMemoryBroker {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery> {
        let delay = {
            let mut state = self.state();
            if state.fail_next_publishes > 0 {
                state.fail_next_publishes -= 1;
                return Err(BrokerError::Publish {
                    topic: topic.to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }
            state.publish_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let delivery = {
            let mut guard = self.state();
            let state = &mut *guard;
            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new()]);
            let cursor = state.next_partition.entry(topic.to_string()).or_default();
            let partition = (*cursor % log.len()) as i32;
            *cursor += 1;
            append_to(log, topic, partition, payload)?
        };
        self.shared.appended.send_modify(|v| *v += 1);
        Ok(delivery)
    }

    async fn create_topic(&self, name: &str, spec: TopicSpec) -> Result<()> {
        let spec = spec.normalized();
        let mut state = self.state();
        if state.topics.contains_key(name) {
            return Err(BrokerError::TopicExists(name.to_string()));
        }
        state
            .topics
            .insert(name.to_string(), vec![Vec::new(); spec.partitions as usize]);
        Ok(())
    }
}

/// One member of an in-memory consumer group.
pub struct InMemoryConsumerGroup {
    broker: InMemoryBroker,
    group_id: String,
    member_id: u64,
    paused: watch::Sender<bool>,
    closed: AtomicBool,
}

impl InMemoryConsumerGroup {
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl ConsumerGroup for InMemoryConsumerGroup {
    type Session = InMemorySession;

    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn join(&self, topics: &[String]) -> Result<InMemorySession> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        let mut guard = self.broker.state();
        let state = &mut *guard;
        if state.fail_next_joins > 0 {
            state.fail_next_joins -= 1;
            return Err(BrokerError::Join {
                group: self.group_id.clone(),
                reason: "injected join failure".to_string(),
            });
        }

        let mut partitions = Vec::new();
        for topic in topics {
            let log = state
                .topics
                .entry(topic.clone())
                .or_insert_with(|| vec![Vec::new()]);
            partitions.extend((0..log.len() as i32).map(|p| (topic.clone(), p)));
        }

        let group = state
            .groups
            .entry(self.group_id.clone())
            .or_insert_with(GroupState::new);
        if !group.members.contains(&self.member_id) {
            group.members.push(self.member_id);
            group.bump_generation();
        }
        let members = group.members.len();
        let index = group
            .members
            .iter()
            .position(|m| *m == self.member_id)
            .unwrap_or(0);
        let generation = *group.generation.borrow();

        let claims = partitions
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % members == index)
            .map(|(_, (topic, partition))| InMemoryClaim {
                broker: self.broker.clone(),
                next_offset: group
                    .committed
                    .get(&(topic.clone(), partition))
                    .copied()
                    .unwrap_or(0),
                topic,
                partition,
                generation,
                generation_rx: group.generation.subscribe(),
                paused_rx: self.paused.subscribe(),
                appended_rx: self.broker.shared.appended.subscribe(),
            })
            .collect();

        Ok(InMemorySession {
            broker: self.broker.clone(),
            group_id: self.group_id.clone(),
            generation,
            generation_rx: group.generation.subscribe(),
            claims,
            marks: Mutex::new(HashMap::new()),
        })
    }

    fn pause_all(&self) {
        self.paused.send_replace(true);
    }

    fn resume_all(&self) {
        self.paused.send_replace(false);
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.broker.state();
        if let Some(group) = state.groups.get_mut(&self.group_id) {
            let before = group.members.len();
            group.members.retain(|m| *m != self.member_id);
            if group.members.len() != before {
                group.bump_generation();
            }
        }
        Ok(())
    }
}

/// One generation of an in-memory group membership.
pub struct InMemorySession {
    broker: InMemoryBroker,
    group_id: String,
    generation: i32,
    generation_rx: watch::Receiver<i32>,
    claims: Vec<InMemoryClaim>,
    marks: Mutex<HashMap<PartitionKey, i64>>,
}

#[async_trait]
impl GroupSession for InMemorySession {
    type Claim = InMemoryClaim;

    fn generation(&self) -> i32 {
        self.generation
    }

    fn take_claims(&mut self) -> Vec<InMemoryClaim> {
        std::mem::take(&mut self.claims)
    }

    fn mark(&self, record: &Record) {
        let mut marks = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        let next = marks
            .entry((record.topic.clone(), record.partition))
            .or_insert(0);
        *next = (*next).max(record.offset + 1);
    }

    async fn revoked(&self) {
        let generation = self.generation;
        let mut rx = self.generation_rx.clone();
        let _ = rx.wait_for(|g| *g != generation).await;
    }

    async fn commit(&self) -> Result<()> {
        let marks: Vec<(PartitionKey, i64)> = self
            .marks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        let mut state = self.broker.state();
        let group = state
            .groups
            .get_mut(&self.group_id)
            .ok_or_else(|| BrokerError::Commit(format!("unknown group '{}'", self.group_id)))?;
        for (key, offset) in marks {
            let committed = group.committed.entry(key).or_insert(0);
            *committed = (*committed).max(offset);
        }
        Ok(())
    }
}

/// The records of one partition for one generation.
pub struct InMemoryClaim {
    broker: InMemoryBroker,
    topic: String,
    partition: i32,
    next_offset: i64,
    generation: i32,
    generation_rx: watch::Receiver<i32>,
    paused_rx: watch::Receiver<bool>,
    appended_rx: watch::Receiver<u64>,
}

#[async_trait]
impl PartitionClaim for InMemoryClaim {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_record(&mut self) -> Option<Record> {
        loop {
            let current = *self.generation_rx.borrow();
            if current != self.generation {
                return None;
            }

            let paused = *self.paused_rx.borrow();
            if paused {
                tokio::select! {
                    biased;
                    changed = self.generation_rx.changed() => if changed.is_err() { return None },
                    changed = self.paused_rx.changed() => if changed.is_err() { return None },
                }
                continue;
            }

            self.appended_rx.borrow_and_update();
            if let Some(record) = self
                .broker
                .record_at(&self.topic, self.partition, self.next_offset)
            {
                self.next_offset += 1;
                return Some(record);
            }

            tokio::select! {
                biased;
                changed = self.generation_rx.changed() => if changed.is_err() { return None },
                changed = self.paused_rx.changed() => if changed.is_err() { return None },
                changed = self.appended_rx.changed() => if changed.is_err() { return None },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_round_robins_over_partitions() {
        let broker = InMemoryBroker::new();
        broker.create_topic("t", TopicSpec::new(2)).await.unwrap();

        let a = broker.send("t", b"a".to_vec()).await.unwrap();
        let b = broker.send("t", b"b".to_vec()).await.unwrap();
        let c = broker.send("t", b"c".to_vec()).await.unwrap();

        assert_eq!((a.partition, a.offset), (0, 0));
        assert_eq!((b.partition, b.offset), (1, 0));
        assert_eq!((c.partition, c.offset), (0, 1));
        assert_eq!(broker.records("t").len(), 3);
    }

    #[tokio::test]
    async fn test_create_existing_topic_fails() {
        let broker = InMemoryBroker::new();
        broker.create_topic("t", TopicSpec::default()).await.unwrap();
        let err = broker.create_topic("t", TopicSpec::default()).await.unwrap_err();
        assert!(matches!(err, BrokerError::TopicExists(_)));
    }

    #[tokio::test]
    async fn test_injected_publish_failure() {
        let broker = InMemoryBroker::new();
        broker.fail_next_publishes(1);
        assert!(broker.send("t", b"x".to_vec()).await.is_err());
        assert!(broker.send("t", b"x".to_vec()).await.is_ok());
        assert_eq!(broker.records("t").len(), 1);
    }

    #[tokio::test]
    async fn test_append_to_unknown_partition() {
        let broker = InMemoryBroker::new();
        let err = broker.append("t", 3, b"x".to_vec()).unwrap_err();
        assert!(matches!(err, BrokerError::UnknownPartition { partition: 3, .. }));
    }

    #[tokio::test]
    async fn test_claim_reads_from_committed_offset() {
        let broker = InMemoryBroker::new();
        for payload in ["a", "b", "c"] {
            broker.append("t", 0, payload).unwrap();
        }
        let group = broker.consumer_group("g");
        let topics = vec!["t".to_string()];

        let mut session = group.join(&topics).await.unwrap();
        let mut claims = session.take_claims();
        assert_eq!(claims.len(), 1);
        let first = claims[0].next_record().await.unwrap();
        assert_eq!(first.payload, b"a");
        session.mark(&first);
        session.commit().await.unwrap();
        assert_eq!(broker.committed_offset("g", "t", 0), Some(1));

        broker.trigger_rebalance("g");
        assert!(claims[0].next_record().await.is_none());
        session.revoked().await;

        let mut session = group.join(&topics).await.unwrap();
        let mut claims = session.take_claims();
        let next = claims[0].next_record().await.unwrap();
        assert_eq!(next.payload, b"b");
    }

    #[tokio::test]
    async fn test_commit_never_moves_backwards() {
        let broker = InMemoryBroker::new();
        broker.append("t", 0, "a").unwrap();
        broker.append("t", 0, "b").unwrap();
        let group = broker.consumer_group("g");
        let session = group.join(&["t".to_string()]).await.unwrap();

        let records = broker.records("t");
        session.mark(&records[1]);
        session.mark(&records[0]);
        session.commit().await.unwrap();
        assert_eq!(broker.committed_offset("g", "t", 0), Some(2));
    }

    #[tokio::test]
    async fn test_partitions_spread_over_members() {
        let broker = InMemoryBroker::new();
        broker.create_topic("t", TopicSpec::new(4)).await.unwrap();
        let topics = vec!["t".to_string()];
        let a = broker.consumer_group("g");
        let b = broker.consumer_group("g");

        a.join(&topics).await.unwrap();
        b.join(&topics).await.unwrap();
        let mut a_session = a.join(&topics).await.unwrap();
        let mut b_session = b.join(&topics).await.unwrap();

        assert_eq!(a_session.generation(), b_session.generation());
        assert_eq!(a_session.take_claims().len(), 2);
        assert_eq!(b_session.take_claims().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_group_cannot_join() {
        let broker = InMemoryBroker::new();
        let group = broker.consumer_group("g");
        group.close().await.unwrap();
        group.close().await.unwrap();
        assert!(matches!(
            group.join(&["t".to_string()]).await,
            Err(BrokerError::Closed)
        ));
    }
}
