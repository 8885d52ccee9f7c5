//! Kafka backend built on librdkafka.
//!
//! One [`StreamConsumer`] per group member. A dispatcher task polls the
//! consumer (which also serves rebalance callbacks) and routes each message
//! to the claim that owns its partition in the current generation.
//!
//! Every join hands the dispatcher a fresh set of routes together with the
//! committed position of each assigned partition, and the dispatcher seeks
//! there before it routes anything else. Records fetched while no route
//! exists are dropped and fetched again after that seek.
//!
//! Each claim buffers a bounded number of records. When the buffer is full
//! the partition is paused and rewound to the record that did not fit; the
//! claim resumes it once the buffer has drained.
//!
//! Offsets are stored on mark and committed synchronously when a
//! generation ends; librdkafka also auto-commits stored offsets
//! periodically and before revocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{ClientContext, DefaultClientContext};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{ConsumerGroup, GroupSession, MessageSink, PartitionClaim};
use crate::error::{BrokerError, Result};
use crate::record::{Delivery, Record, TopicSpec};

type PartitionKey = (String, i32);
type GroupConsumer = StreamConsumer<GroupContext>;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Connection settings for the Kafka backend.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    /// How long a join waits for a partition assignment.
    pub join_timeout: Duration,
    /// Timeout for acknowledgements, commits, seeks and admin requests.
    pub request_timeout: Duration,
    /// `auto.offset.reset` for partitions without a committed offset.
    pub offset_reset: String,
    /// Records buffered per claim before its partition is paused.
    pub claim_buffer: usize,
}

impl KafkaSettings {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            join_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            offset_reset: "earliest".to_string(),
            claim_buffer: 64,
        }
    }

    pub fn with_claim_buffer(mut self, records: usize) -> Self {
        self.claim_buffer = records.max(1);
        self
    }
}

#[derive(Debug, Clone)]
struct Assignment {
    generation: i32,
    partitions: Vec<PartitionKey>,
}

/// Tracks rebalances reported by librdkafka.
pub struct GroupContext {
    generation: watch::Sender<i32>,
    assignment: watch::Sender<Option<Assignment>>,
}

impl GroupContext {
    fn new() -> Self {
        Self {
            generation: watch::channel(0).0,
            assignment: watch::channel(None).0,
        }
    }

    fn next_generation(&self) -> i32 {
        self.generation.send_modify(|g| *g += 1);
        *self.generation.borrow()
    }
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            info!(partitions = tpl.count(), "partitions revoked");
            self.assignment.send_replace(None);
            self.next_generation();
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions = tpl
                    .elements()
                    .iter()
                    .map(|e| (e.topic().to_string(), e.partition()))
                    .collect::<Vec<_>>();
                let generation = self.next_generation();
                info!(generation, partitions = partitions.len(), "partitions assigned");
                self.assignment.send_replace(Some(Assignment {
                    generation,
                    partitions,
                }));
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => warn!(error = %e, "rebalance error"),
        }
    }
}

/// Where the dispatcher sends the records of one partition.
struct Route {
    records: mpsc::Sender<Record>,
    /// Set while the partition is paused because `records` was full.
    throttle: Arc<watch::Sender<bool>>,
}

/// Routes for a new generation and the positions to seek to first.
struct Install {
    routes: HashMap<PartitionKey, Route>,
    positions: TopicPartitionList,
    done: oneshot::Sender<KafkaResult<()>>,
}

struct Dispatcher {
    handle: JoinHandle<()>,
    installs: mpsc::UnboundedSender<Install>,
}

/// A Kafka consumer group member.
pub struct KafkaConsumerGroup {
    consumer: Arc<GroupConsumer>,
    group_id: String,
    settings: KafkaSettings,
    dispatcher: Mutex<Option<Dispatcher>>,
    paused: watch::Sender<bool>,
    closed: AtomicBool,
}

impl KafkaConsumerGroup {
    pub fn connect(settings: KafkaSettings, group_id: impl Into<String>) -> Result<Self> {
        let group_id = group_id.into();
        let consumer: GroupConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &settings.offset_reset)
            .create_with_context(GroupContext::new())?;

        Ok(Self {
            consumer: Arc::new(consumer),
            group_id,
            settings,
            dispatcher: Mutex::new(None),
            paused: watch::channel(false).0,
            closed: AtomicBool::new(false),
        })
    }

    fn installs(&self, topics: &[String]) -> Result<mpsc::UnboundedSender<Install>> {
        let mut dispatcher = locked(&self.dispatcher);
        if let Some(running) = dispatcher.as_ref() {
            return Ok(running.installs.clone());
        }
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&names)?;
        let (installs, rx) = mpsc::unbounded_channel();
        *dispatcher = Some(Dispatcher {
            handle: tokio::spawn(dispatch(
                self.consumer.clone(),
                rx,
                self.settings.request_timeout,
            )),
            installs: installs.clone(),
        });
        Ok(installs)
    }

    fn set_paused(&self, pause: bool) {
        self.paused.send_replace(pause);
        let result = self.consumer.assignment().and_then(|tpl| {
            if pause {
                self.consumer.pause(&tpl)
            } else {
                self.consumer.resume(&tpl)
            }
        });
        if let Err(e) = result {
            warn!(error = %e, pause, "failed to change fetch state");
        }
    }

    /// The committed offset of every partition, or the reset position for
    /// partitions that have none.
    fn committed_positions(&self, partitions: &[PartitionKey]) -> Result<TopicPartitionList> {
        let mut assigned = TopicPartitionList::new();
        for (topic, partition) in partitions {
            assigned.add_partition(topic, *partition);
        }
        let committed = self
            .consumer
            .committed_offsets(assigned, self.settings.request_timeout)?;

        let mut positions = TopicPartitionList::new();
        for element in committed.elements() {
            let offset = match element.offset() {
                Offset::Offset(o) => Offset::Offset(o),
                _ if self.settings.offset_reset == "latest" => Offset::End,
                _ => Offset::Beginning,
            };
            positions.add_partition_offset(element.topic(), element.partition(), offset)?;
        }
        Ok(positions)
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> Record {
    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now),
    }
}

async fn dispatch(
    consumer: Arc<GroupConsumer>,
    mut installs: mpsc::UnboundedReceiver<Install>,
    timeout: Duration,
) {
    let mut routes: HashMap<PartitionKey, Route> = HashMap::new();
    loop {
        tokio::select! {
            biased;
            install = installs.recv() => {
                let Some(install) = install else { break };
                routes = install.routes;
                let sought = if install.positions.count() == 0 {
                    Ok(())
                } else {
                    consumer.seek_partitions(install.positions, timeout).map(|_| ())
                };
                let _ = install.done.send(sought);
            }
            message = consumer.recv() => match message {
                Ok(message) => route_record(&consumer, &routes, to_record(&message), timeout),
                Err(e) => warn!(error = %e, "kafka receive error"),
            },
        }
    }
    debug!("dispatcher stopped");
}

fn route_record(
    consumer: &GroupConsumer,
    routes: &HashMap<PartitionKey, Route>,
    record: Record,
    timeout: Duration,
) {
    let Some(route) = routes.get(&(record.topic.clone(), record.partition)) else {
        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "no active claim for partition, left for the next generation"
        );
        return;
    };

    let record = if *route.throttle.borrow() {
        record
    } else {
        match route.records.try_send(record) {
            Ok(()) => return,
            Err(TrySendError::Full(record)) => record,
            Err(TrySendError::Closed(record)) => {
                debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "claim closed, left for the next generation"
                );
                return;
            }
        }
    };

    hold_back(consumer, &record, timeout);
    // Set after the pause so the claim's resume cannot run before it.
    route.throttle.send_replace(true);
}

/// Pauses the partition of `record` and rewinds it so the record is fetched
/// again after the partition resumes.
fn hold_back(consumer: &GroupConsumer, record: &Record, timeout: Duration) {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(&record.topic, record.partition);
    if let Err(e) = consumer.pause(&tpl) {
        warn!(
            topic = %record.topic,
            partition = record.partition,
            error = %e,
            "failed to pause partition"
        );
    }
    if let Err(e) = consumer.seek(
        &record.topic,
        record.partition,
        Offset::Offset(record.offset),
        timeout,
    ) {
        warn!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            error = %e,
            "failed to rewind partition"
        );
    }
    debug!(
        topic = %record.topic,
        partition = record.partition,
        offset = record.offset,
        "claim buffer full, partition held back"
    );
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    type Session = KafkaSession;

    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn join(&self, topics: &[String]) -> Result<KafkaSession> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let installs = self.installs(topics)?;

        let mut assignment_rx = self.consumer.context().assignment.subscribe();
        let assignment = tokio::time::timeout(
            self.settings.join_timeout,
            assignment_rx.wait_for(Option::is_some),
        )
        .await
        .map_err(|_| BrokerError::Join {
            group: self.group_id.clone(),
            reason: "timed out waiting for partition assignment".to_string(),
        })?
        .map_err(|_| BrokerError::Closed)?
        .clone();
        let Some(assignment) = assignment else {
            return Err(BrokerError::Closed);
        };

        let positions = self.committed_positions(&assignment.partitions)?;
        let generation_rx = self.consumer.context().generation.subscribe();
        let mut routes = HashMap::new();
        let claims = assignment
            .partitions
            .iter()
            .map(|(topic, partition)| {
                let (tx, rx) = mpsc::channel(self.settings.claim_buffer.max(1));
                let throttle = Arc::new(watch::channel(false).0);
                routes.insert(
                    (topic.clone(), *partition),
                    Route {
                        records: tx,
                        throttle: throttle.clone(),
                    },
                );
                KafkaClaim {
                    consumer: self.consumer.clone(),
                    topic: topic.clone(),
                    partition: *partition,
                    generation: assignment.generation,
                    generation_rx: generation_rx.clone(),
                    paused_rx: self.paused.subscribe(),
                    throttle_rx: throttle.subscribe(),
                    throttle,
                    records: rx,
                }
            })
            .collect();

        let (done_tx, done_rx) = oneshot::channel();
        installs
            .send(Install {
                routes,
                positions,
                done: done_tx,
            })
            .map_err(|_| BrokerError::Closed)?;
        done_rx.await.map_err(|_| BrokerError::Closed)??;

        // Clears pauses left by a previous generation unless the group is paused.
        let paused = *self.paused.borrow();
        self.set_paused(paused);

        Ok(KafkaSession {
            consumer: self.consumer.clone(),
            generation: assignment.generation,
            generation_rx,
            claims,
        })
    }

    fn pause_all(&self) {
        self.set_paused(true);
    }

    fn resume_all(&self) {
        self.set_paused(false);
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.consumer.unsubscribe();
        if let Some(dispatcher) = locked(&self.dispatcher).take() {
            dispatcher.handle.abort();
        }
        self.consumer.context().next_generation();
        info!(group = %self.group_id, "consumer group closed");
        Ok(())
    }
}

/// One generation of a Kafka group membership.
pub struct KafkaSession {
    consumer: Arc<GroupConsumer>,
    generation: i32,
    generation_rx: watch::Receiver<i32>,
    claims: Vec<KafkaClaim>,
}

#[async_trait]
impl GroupSession for KafkaSession {
    type Claim = KafkaClaim;

    fn generation(&self) -> i32 {
        self.generation
    }

    fn take_claims(&mut self) -> Vec<KafkaClaim> {
        std::mem::take(&mut self.claims)
    }

    fn mark(&self, record: &Record) {
        if let Err(e) = self
            .consumer
            .store_offset(&record.topic, record.partition, record.offset + 1)
        {
            debug!(
                topic = %record.topic,
                partition = record.partition,
                error = %e,
                "could not store offset, partition no longer assigned"
            );
        }
    }

    async fn revoked(&self) {
        let generation = self.generation;
        let mut rx = self.generation_rx.clone();
        let _ = rx.wait_for(|g| *g != generation).await;
    }

    async fn commit(&self) -> Result<()> {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => Ok(()),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(BrokerError::Commit(e.to_string())),
        }
    }
}

/// The records routed to one partition for one generation.
pub struct KafkaClaim {
    consumer: Arc<GroupConsumer>,
    topic: String,
    partition: i32,
    generation: i32,
    generation_rx: watch::Receiver<i32>,
    paused_rx: watch::Receiver<bool>,
    throttle: Arc<watch::Sender<bool>>,
    throttle_rx: watch::Receiver<bool>,
    records: mpsc::Receiver<Record>,
}

impl KafkaClaim {
    /// Resumes a partition held back by the dispatcher. A paused group
    /// keeps it paused until `resume_all`.
    fn release(&self) {
        self.throttle.send_replace(false);
        if *self.paused_rx.borrow() {
            return;
        }
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&self.topic, self.partition);
        if let Err(e) = self.consumer.resume(&tpl) {
            debug!(
                topic = %self.topic,
                partition = self.partition,
                error = %e,
                "could not resume partition"
            );
        }
    }
}

#[async_trait]
impl PartitionClaim for KafkaClaim {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_record(&mut self) -> Option<Record> {
        let generation = self.generation;
        loop {
            if *self.generation_rx.borrow() != generation {
                return None;
            }
            if *self.paused_rx.borrow_and_update() {
                tokio::select! {
                    biased;
                    _ = self.generation_rx.wait_for(|g| *g != generation) => return None,
                    changed = self.paused_rx.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                        continue;
                    }
                }
            }

            let throttled = *self.throttle_rx.borrow_and_update();
            if throttled && self.records.is_empty() {
                self.release();
            }

            tokio::select! {
                biased;
                _ = self.generation_rx.wait_for(|g| *g != generation) => return None,
                changed = self.paused_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = self.throttle_rx.changed() => {}
                record = self.records.recv() => return record,
            }
        }
    }
}

/// The write side of a Kafka cluster.
pub struct KafkaSink {
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    timeout: Duration,
}

impl KafkaSink {
    pub fn connect(settings: &KafkaSettings) -> Result<Self> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", settings.request_timeout.as_millis().to_string());
        Ok(Self {
            producer: config.create()?,
            admin: config.create()?,
            timeout: settings.request_timeout,
        })
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery> {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload.as_slice());
        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => Ok(Delivery { partition, offset }),
            Err((e, _)) => Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn create_topic(&self, name: &str, spec: TopicSpec) -> Result<()> {
        let spec = spec.normalized();
        let topic = NewTopic::new(name, spec.partitions, TopicReplication::Fixed(spec.replication));
        let options = AdminOptions::new().operation_timeout(Some(self.timeout));
        let results = self.admin.create_topics([&topic], &options).await?;
        for result in results {
            match result {
                Ok(_) => {}
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(BrokerError::TopicExists(topic));
                }
                Err((topic, code)) => {
                    return Err(BrokerError::TopicCreation {
                        topic,
                        reason: code.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
