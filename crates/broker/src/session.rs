//! Consumer session management.
//!
//! [`ConsumerSession::consume`] keeps a consumer group joined for the
//! lifetime of the call. Every group generation runs one delivery loop per
//! assigned partition; a loop hands records to the [`DeliveryHandler`] one at
//! a time and marks the offset only after the handler succeeds. When a
//! generation ends (rebalance, handler failure or shutdown) the loops are
//! drained, marked offsets are committed and the group is joined again.
//!
//! ```text
//! consume ──► join ──► generation N ──► drain + commit ──► join ──► ...
//!               │          │ one loop per partition
//!               │          └─ handler error or panic cancels the whole
//!               │             generation, the next join waits a backoff
//!               └─ first failure is returned, later ones are retried
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::client::{ConsumerGroup, GroupSession, PartitionClaim};
use crate::error::{BrokerError, Result};
use crate::handler::DeliveryHandler;
use crate::signal::{SessionSignal, SessionSignals};

/// Options for a [`ConsumerSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Listen for SIGUSR1 (toggle pause).
    pub handle_signals: bool,
    /// Also listen for SIGINT/SIGTERM (shutdown). Ignored unless
    /// `handle_signals` is set.
    pub handle_termination: bool,
    /// Delay before re-joining after a failed join or a failed delivery.
    pub rejoin_backoff: Duration,
    /// Upper bound on draining in-flight deliveries at shutdown.
    /// `None` waits indefinitely.
    pub drain_timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn without_signals(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Keeps the SIGUSR1 toggle but leaves SIGINT/SIGTERM to the caller,
    /// which then stops the session through [`SessionController::shutdown`].
    pub fn without_termination_signals(mut self) -> Self {
        self.handle_termination = false;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_rejoin_backoff(mut self, backoff: Duration) -> Self {
        self.rejoin_backoff = backoff;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            handle_signals: true,
            handle_termination: true,
            rejoin_backoff: Duration::from_secs(1),
            drain_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlCommand {
    Pause,
    Resume,
    Toggle,
    Shutdown,
}

/// A cloneable handle for controlling a running [`ConsumerSession`].
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<ControlCommand>,
    paused: Arc<AtomicBool>,
    generations: watch::Receiver<u64>,
}

impl SessionController {
    /// Pauses fetching on every assigned partition.
    pub fn pause(&self) {
        self.send(ControlCommand::Pause);
    }

    /// Resumes fetching.
    pub fn resume(&self) {
        self.send(ControlCommand::Resume);
    }

    /// Pauses when running, resumes when paused.
    pub fn toggle(&self) {
        self.send(ControlCommand::Toggle);
    }

    /// Requests graceful shutdown; `consume` returns once in-flight
    /// deliveries have drained.
    pub fn shutdown(&self) {
        self.send(ControlCommand::Shutdown);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Number of group generations joined so far.
    pub fn generations(&self) -> u64 {
        *self.generations.borrow()
    }

    /// Waits until the first generation has been joined.
    pub async fn wait_ready(&self) -> Result<()> {
        self.wait_for_generation(1).await
    }

    /// Waits until at least `n` generations have been joined.
    pub async fn wait_for_generation(&self, n: u64) -> Result<()> {
        let mut rx = self.generations.clone();
        rx.wait_for(|g| *g >= n).await.map_err(|_| BrokerError::Closed)?;
        Ok(())
    }

    fn send(&self, command: ControlCommand) {
        if self.commands.send(command).is_err() {
            debug!(?command, "consumer session is gone, ignoring command");
        }
    }
}

/// Keeps a consumer group joined and feeds its records to a handler.
pub struct ConsumerSession<G, H> {
    group: Arc<G>,
    handler: Arc<H>,
    options: SessionOptions,
    commands_tx: mpsc::UnboundedSender<ControlCommand>,
    commands_rx: mpsc::UnboundedReceiver<ControlCommand>,
    paused: Arc<AtomicBool>,
    generations: Arc<watch::Sender<u64>>,
}

impl<G: ConsumerGroup, H: DeliveryHandler> ConsumerSession<G, H> {
    pub fn new(group: G, handler: H, options: SessionOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            group: Arc::new(group),
            handler: Arc::new(handler),
            options,
            commands_tx,
            commands_rx,
            paused: Arc::new(AtomicBool::new(false)),
            generations: Arc::new(watch::channel(0).0),
        }
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    pub fn controller(&self) -> SessionController {
        SessionController {
            commands: self.commands_tx.clone(),
            paused: self.paused.clone(),
            generations: self.generations.subscribe(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Consumes the topics until shutdown is requested through the
    /// controller or a termination signal.
    ///
    /// A failure of the very first join is returned; later join failures
    /// are logged and retried. In-flight deliveries are drained before
    /// returning; if that exceeds the drain timeout the remaining loops are
    /// aborted and [`BrokerError::DrainTimeout`] is returned.
    #[tracing::instrument(skip(self), fields(group = %self.group.group_id()))]
    pub async fn consume(&mut self, topics: &[&str]) -> Result<()> {
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (joined_tx, joined_rx) = oneshot::channel();

        let mut group_loop: JoinHandle<()> = tokio::spawn(run_group(
            self.group.clone(),
            self.handler.clone(),
            topics,
            stop_rx,
            self.generations.clone(),
            joined_tx,
            self.options.rejoin_backoff,
        ));

        match joined_rx.await {
            Ok(Ok(())) => info!("consumer up and running"),
            Ok(Err(e)) => {
                let _ = group_loop.await;
                return Err(e);
            }
            Err(_) => {
                return group_loop
                    .await
                    .map_err(|e| BrokerError::Task(e.to_string()));
            }
        }

        let mut signals = match SessionSignals::install(
            self.options.handle_signals,
            self.options.handle_signals && self.options.handle_termination,
        ) {
            Ok(signals) => signals,
            Err(e) => {
                let _ = stop_tx.send(true);
                let _ = group_loop.await;
                return Err(e.into());
            }
        };

        let mut loop_finished = false;
        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(ControlCommand::Pause) => self.set_paused(true),
                    Some(ControlCommand::Resume) => self.set_paused(false),
                    Some(ControlCommand::Toggle) => self.toggle_paused(),
                    Some(ControlCommand::Shutdown) | None => {
                        info!("terminating: shutdown requested");
                        break;
                    }
                },
                signal = signals.recv() => match signal {
                    SessionSignal::Terminate => {
                        info!("terminating: via signal");
                        break;
                    }
                    SessionSignal::TogglePause => self.toggle_paused(),
                },
                result = &mut group_loop => {
                    if let Err(e) = result {
                        error!(error = %e, "consumer group loop failed");
                        return Err(BrokerError::Task(e.to_string()));
                    }
                    loop_finished = true;
                    break;
                }
            }
        }

        let _ = stop_tx.send(true);
        if loop_finished {
            return Ok(());
        }

        let drained = match self.options.drain_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, &mut group_loop).await {
                Ok(result) => result,
                Err(_) => {
                    group_loop.abort();
                    warn!(?timeout, "delivery loops did not drain in time, aborting");
                    return Err(BrokerError::DrainTimeout(timeout));
                }
            },
            None => (&mut group_loop).await,
        };
        drained.map_err(|e| BrokerError::Task(e.to_string()))?;
        info!("consumer stopped");
        Ok(())
    }

    /// Leaves the group. Safe to call after `consume` has returned.
    pub async fn close(&self) -> Result<()> {
        self.group.close().await
    }

    fn toggle_paused(&self) {
        let paused = self.paused.load(Ordering::SeqCst);
        self.set_paused(!paused);
    }

    // Only the consume loop writes the flag.
    fn set_paused(&self, pause: bool) {
        if self.paused.load(Ordering::SeqCst) == pause {
            return;
        }
        if pause {
            self.group.pause_all();
            info!("pausing consumption");
        } else {
            self.group.resume_all();
            info!("resuming consumption");
        }
        self.paused.store(pause, Ordering::SeqCst);
    }
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn run_group<G: ConsumerGroup, H: DeliveryHandler>(
    group: Arc<G>,
    handler: Arc<H>,
    topics: Vec<String>,
    mut stop: watch::Receiver<bool>,
    generations: Arc<watch::Sender<u64>>,
    joined: oneshot::Sender<Result<()>>,
    backoff: Duration,
) {
    let mut joined = Some(joined);
    loop {
        let result = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            result = group.join(&topics) => result,
        };

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                metrics::counter!("consumer_join_failures_total").increment(1);
                if let Some(tx) = joined.take() {
                    error!(error = %e, "failed to join consumer group");
                    let _ = tx.send(Err(e));
                    return;
                }
                warn!(error = %e, ?backoff, "failed to rejoin consumer group, retrying");
                tokio::select! {
                    _ = stopped(&mut stop) => break,
                    _ = tokio::time::sleep(backoff) => continue,
                }
            }
        };

        generations.send_modify(|g| *g += 1);
        if let Some(tx) = joined.take() {
            let _ = tx.send(Ok(()));
        }

        let handler_failed = run_generation(session, &handler, &stop).await;

        if *stop.borrow() {
            break;
        }
        if handler_failed {
            debug!(?backoff, "waiting before redelivery");
            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
    debug!("consumer group loop stopped");
}

/// Runs one generation to its end and reports whether a delivery failed.
async fn run_generation<S: GroupSession, H: DeliveryHandler>(
    mut session: S,
    handler: &Arc<H>,
    stop: &watch::Receiver<bool>,
) -> bool {
    let generation = session.generation();
    let claims = session.take_claims();
    info!(generation, partitions = claims.len(), "session started");

    let session = Arc::new(session);
    let cancel = Arc::new(watch::channel(false).0);
    let mut loops = JoinSet::new();
    for claim in claims {
        loops.spawn(claim_loop(
            claim,
            session.clone(),
            handler.clone(),
            stop.clone(),
            cancel.clone(),
        ));
    }

    let mut stop_rx = stop.clone();
    let mut cancel_rx = cancel.subscribe();
    tokio::select! {
        _ = session.revoked() => {
            metrics::counter!("consumer_rebalances_total").increment(1);
            info!(generation, "partitions revoked, rebalancing");
        }
        _ = stopped(&mut stop_rx) => {}
        _ = stopped(&mut cancel_rx) => {}
    }
    cancel.send_replace(true);

    let mut handler_failed = false;
    while let Some(result) = loops.join_next().await {
        match result {
            Ok(failed) => handler_failed |= failed,
            Err(e) => {
                metrics::counter!("consumer_handler_failures_total").increment(1);
                error!(
                    generation,
                    error = %e,
                    "delivery loop panicked, ending session for redelivery"
                );
                handler_failed = true;
            }
        }
    }

    if let Err(e) = session.commit().await {
        warn!(generation, error = %e, "failed to commit marked offsets");
    }
    info!(generation, "session ended");
    handler_failed
}

/// Cancels the generation when a delivery loop exits, including by panic.
struct CancelOnExit(Arc<watch::Sender<bool>>);

impl Drop for CancelOnExit {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

async fn claim_loop<C: PartitionClaim, S: GroupSession, H: DeliveryHandler>(
    mut claim: C,
    session: Arc<S>,
    handler: Arc<H>,
    mut stop: watch::Receiver<bool>,
    cancel: Arc<watch::Sender<bool>>,
) -> bool {
    let topic = claim.topic().to_string();
    let partition = claim.partition();
    let mut cancelled = cancel.subscribe();
    let _cancel = CancelOnExit(cancel);
    let mut failed = false;
    debug!(%topic, partition, "delivery loop started");

    loop {
        let record = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            _ = stopped(&mut cancelled) => break,
            record = claim.next_record() => match record {
                Some(record) => record,
                None => break,
            },
        };

        info!(
            %topic,
            partition,
            offset = record.offset,
            timestamp = %record.timestamp,
            "message claimed"
        );

        let started = Instant::now();
        let outcome = handler.process(&record).await;
        metrics::histogram!("consumer_message_duration_seconds", "topic" => topic.clone())
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                session.mark(&record);
                metrics::counter!("consumer_messages_processed_total", "topic" => topic.clone())
                    .increment(1);
            }
            Err(e) => {
                metrics::counter!("consumer_handler_failures_total", "topic" => topic.clone())
                    .increment(1);
                error!(
                    %topic,
                    partition,
                    offset = record.offset,
                    error = %e,
                    "handler failed, ending session for redelivery"
                );
                failed = true;
                break;
            }
        }
    }

    debug!(%topic, partition, "delivery loop stopped");
    failed
}
