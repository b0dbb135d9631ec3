// Concurrent acquisition and aggregation
//
// One acquisition task per tag owns that tag's TagState and publishes an
// immutable TagSnapshot through its own watch channel after every fusion
// step. One aggregation task reads every channel once per period and hands
// the resulting AggregateTick to the sink. The supervisor loop in
// `run_until` restarts dropped tags with backoff and only ever writes a
// tag's channel after that tag's task has ended.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::aggregate::{TickAssembler, TickOutcome};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::filters::MadgwickConfig;
use crate::reconnect::RestartState;
use crate::sink::TickSink;
use crate::source::{NotificationSource, TagEvent};
use crate::status::{current_timestamp, PipelineStatus};
use crate::tag::{TagSnapshot, TagState, TagStatus};
use crate::types::TagId;

type SnapshotTx = Arc<watch::Sender<TagSnapshot>>;

/// Outcome of a completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSummary {
    /// Unix seconds at which the pipeline started.
    pub started_at: f64,
    pub ticks_emitted: u64,
    pub ticks_withheld: u64,
    pub ticks_dropped: u64,
    pub status: PipelineStatus,
}

pub struct PipelineScheduler {
    config: PipelineConfig,
    source: Arc<dyn NotificationSource>,
    sink: Box<dyn TickSink>,
    status_tx: Arc<watch::Sender<PipelineStatus>>,
}

impl PipelineScheduler {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn NotificationSource>,
        sink: Box<dyn TickSink>,
    ) -> Self {
        let (status_tx, _) = watch::channel(PipelineStatus::new());
        Self {
            config,
            source,
            sink,
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Live status, refreshed every aggregation tick.
    pub fn status(&self) -> watch::Receiver<PipelineStatus> {
        self.status_tx.subscribe()
    }

    /// Run until `shutdown` resolves, the sink fails, or every tag has
    /// failed for good.
    pub async fn run_until<F>(self, shutdown: F) -> Result<PipelineSummary, PipelineError>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;
        let PipelineScheduler {
            config,
            source,
            sink,
            status_tx,
        } = self;

        let started_at = current_timestamp();
        let origin = Instant::now();
        let period = config.tick_period();

        let channels: Vec<SnapshotTx> = config
            .tags
            .iter()
            .map(|_| Arc::new(watch::channel(TagSnapshot::connecting(0, 0)).0))
            .collect();
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            "Starting pipeline: {} tag(s), period {:.3}s, beta {}",
            config.tags.len(),
            config.sample_period,
            config.beta
        );

        let aggregator = Aggregator {
            assembler: TickAssembler::new(config.tags.clone()),
            receivers: channels.iter().map(|tx| tx.subscribe()).collect(),
            sink,
            status_tx,
            started_at,
            origin,
            period,
            stop: stop_rx.clone(),
        };
        let mut aggregator: JoinHandle<Result<PipelineStatus, PipelineError>> =
            tokio::spawn(aggregator.run());
        let mut aggregator_finished = false;

        let mut supervisor = Supervisor::new(&config, source, channels, stop_rx);
        let started = (0..config.tags.len()).try_for_each(|index| supervisor.start(index));

        tokio::pin!(shutdown);
        let outcome: Result<(), PipelineError> = loop {
            if let Err(err) = &started {
                error!("Pipeline cannot start: {}", err);
                break started;
            }
            if supervisor.all_failed() {
                error!("All {} tag(s) failed", config.tags.len());
                break Err(PipelineError::AllTagsFailed);
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                joined = &mut aggregator => {
                    aggregator_finished = true;
                    break Err(match joined {
                        Ok(Err(err)) => err,
                        Ok(Ok(_)) => PipelineError::Task("aggregator stopped unexpectedly".into()),
                        Err(err) => PipelineError::Task(err.to_string()),
                    });
                }
                Some(joined) = supervisor.tasks.join_next() => {
                    match joined {
                        Ok((index, Err(err))) if err.is_tag_failure() => {
                            supervisor.handle_failure(index, err)
                        }
                        Ok((_, Err(err))) => break Err(err),
                        Ok((_, Ok(()))) => {}
                        Err(err) => break Err(PipelineError::Task(err.to_string())),
                    }
                }
                Some(joined) = supervisor.retries.join_next() => {
                    if let Ok(index) = joined {
                        if let Err(err) = supervisor.retry(index) {
                            break Err(err);
                        }
                    }
                }
            }
        };

        stop_tx.send_replace(true);
        supervisor.retries.abort_all();
        while supervisor.tasks.join_next().await.is_some() {}

        if let Err(err) = outcome {
            if !aggregator_finished {
                aggregator.abort();
            }
            return Err(err);
        }

        let status = aggregator
            .await
            .map_err(|err| PipelineError::Task(err.to_string()))??;
        info!(
            "Pipeline stopped: {} tick(s) emitted, {} withheld, {} dropped",
            status.ticks_emitted, status.ticks_withheld, status.ticks_dropped
        );

        Ok(PipelineSummary {
            started_at,
            ticks_emitted: status.ticks_emitted,
            ticks_withheld: status.ticks_withheld,
            ticks_dropped: status.ticks_dropped,
            status,
        })
    }
}

// ─── Supervisor ──────────────────────────────────────────────────────────────

struct Supervisor {
    tags: Vec<TagId>,
    madgwick: MadgwickConfig,
    period: Duration,
    silence: Duration,
    source: Arc<dyn NotificationSource>,
    channels: Vec<SnapshotTx>,
    restarts: Vec<RestartState>,
    failed: Vec<bool>,
    tasks: JoinSet<(usize, Result<(), PipelineError>)>,
    retries: JoinSet<usize>,
    stop: watch::Receiver<bool>,
}

impl Supervisor {
    fn new(
        config: &PipelineConfig,
        source: Arc<dyn NotificationSource>,
        channels: Vec<SnapshotTx>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let restarts = config
            .tags
            .iter()
            .map(|tag| RestartState::new(tag, config.max_reconnect_attempts, config.base_cooldown()))
            .collect();
        Self {
            tags: config.tags.clone(),
            madgwick: config.madgwick(),
            period: config.tick_period(),
            silence: config.silence_duration(),
            source,
            channels,
            restarts,
            failed: vec![false; config.tags.len()],
            tasks: JoinSet::new(),
            retries: JoinSet::new(),
            stop,
        }
    }

    fn all_failed(&self) -> bool {
        self.failed.iter().all(|f| *f)
    }

    fn retry(&mut self, index: usize) -> Result<(), PipelineError> {
        self.restarts[index].record_reconnect();
        info!(
            "Reconnecting tag {} ({})",
            self.tags[index],
            self.restarts[index].status()
        );
        self.start(index)
    }

    /// Open a session for the tag and spawn its acquisition task. Errors
    /// that are not tag-local end the run.
    fn start(&mut self, index: usize) -> Result<(), PipelineError> {
        let tag = self.tags[index].clone();
        match self.source.subscribe(&tag) {
            Ok(events) => {
                let epoch = self.channels[index].borrow().epoch + 1;
                let reconnects = self.restarts[index].reconnects;
                self.channels[index].send_replace(TagSnapshot::connecting(epoch, reconnects));
                info!("Tag {} connected (epoch {})", tag, epoch);

                let task = Acquisition {
                    index,
                    state: TagState::new(tag, &self.madgwick, epoch, reconnects),
                    events,
                    snapshot: Arc::clone(&self.channels[index]),
                    period: self.period,
                    silence: self.silence,
                    stop: self.stop.clone(),
                };
                self.tasks.spawn(task.run());
            }
            Err(err) if err.is_tag_failure() => self.handle_failure(index, err),
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Called once the tag's task has ended (or never started).
    fn handle_failure(&mut self, index: usize, err: PipelineError) {
        warn!("{}", err);
        let channel = &self.channels[index];
        let restart = &mut self.restarts[index];

        if channel.borrow().status == TagStatus::Ready {
            restart.record_success();
        }

        match restart.record_failed_attempt() {
            Some(wait) => {
                channel.send_modify(|s| {
                    s.status = TagStatus::Disconnected;
                    s.epoch += 1;
                });
                self.retries.spawn(async move {
                    sleep(wait).await;
                    index
                });
            }
            None => {
                error!("Tag {} failed: reconnect attempts exhausted", self.tags[index]);
                channel.send_modify(|s| {
                    s.status = TagStatus::Failed;
                    s.epoch += 1;
                });
                self.failed[index] = true;
            }
        }
    }
}

// ─── Acquisition ─────────────────────────────────────────────────────────────

struct Acquisition {
    index: usize,
    state: TagState,
    events: mpsc::Receiver<TagEvent>,
    snapshot: SnapshotTx,
    period: Duration,
    silence: Duration,
    stop: watch::Receiver<bool>,
}

impl Acquisition {
    async fn run(mut self) -> (usize, Result<(), PipelineError>) {
        let result = self.acquire().await;
        (self.index, result)
    }

    async fn acquire(&mut self) -> Result<(), PipelineError> {
        let start = Instant::now();
        let mut ticker = interval_at(start + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_heard = start;

        self.snapshot.send_replace(self.state.snapshot());

        loop {
            if *self.stop.borrow() {
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = self.stop.changed() => return Ok(()),
                event = self.events.recv() => match event {
                    Some(TagEvent::Notification(notification)) => {
                        last_heard = Instant::now();
                        if let Err(err) = self.state.apply(&notification) {
                            warn!("Tag {} rejected payload: {}", self.state.id(), err);
                        }
                    }
                    Some(TagEvent::Disconnected { reason }) => {
                        return Err(PipelineError::TagDisconnected {
                            tag: self.state.id().to_string(),
                            reason,
                        });
                    }
                    None => {
                        return Err(PipelineError::TagDisconnected {
                            tag: self.state.id().to_string(),
                            reason: "notification channel closed".to_string(),
                        });
                    }
                },
                _ = ticker.tick() => {
                    let silent = last_heard.elapsed();
                    if silent > self.silence {
                        return Err(PipelineError::TagSilent {
                            tag: self.state.id().to_string(),
                            silent_secs: silent.as_secs_f64(),
                        });
                    }
                    if self.state.fuse() {
                        info!(
                            "Tag {} warm-up complete after {} notification(s)",
                            self.state.id(),
                            self.state.snapshot().notifications
                        );
                    }
                    self.snapshot.send_replace(self.state.snapshot());
                }
            }
        }
    }
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

struct Aggregator {
    assembler: TickAssembler,
    receivers: Vec<watch::Receiver<TagSnapshot>>,
    sink: Box<dyn TickSink>,
    status_tx: Arc<watch::Sender<PipelineStatus>>,
    started_at: f64,
    origin: Instant,
    period: Duration,
    stop: watch::Receiver<bool>,
}

impl Aggregator {
    async fn run(mut self) -> Result<PipelineStatus, PipelineError> {
        // Half a period behind acquisition so each read sees the step that
        // just completed
        let mut ticker = interval_at(self.origin + self.period + self.period / 2, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => break,
                _ = ticker.tick() => self.tick()?,
            }
        }
        self.sink.flush()?;

        let snapshots = self.read_snapshots();
        let uptime = self.origin.elapsed().as_secs_f64();
        let status = PipelineStatus::capture(
            self.started_at + uptime,
            uptime,
            &self.assembler,
            &snapshots,
        );
        self.status_tx.send_replace(status.clone());
        Ok(status)
    }

    fn read_snapshots(&self) -> Vec<TagSnapshot> {
        self.receivers.iter().map(|rx| rx.borrow().clone()).collect()
    }

    fn tick(&mut self) -> Result<(), PipelineError> {
        let snapshots = self.read_snapshots();
        let epochs_after: Vec<u64> = self.receivers.iter().map(|rx| rx.borrow().epoch).collect();

        let uptime = self.origin.elapsed().as_secs_f64();
        let timestamp = self.started_at + uptime;

        match self.assembler.assemble(timestamp, &snapshots, &epochs_after) {
            TickOutcome::Emit(tick) => self.sink.publish(&tick)?,
            TickOutcome::Withheld => {}
            TickOutcome::Dropped => debug!("Tick at +{:.3}s dropped", uptime),
        }

        self.status_tx.send_replace(PipelineStatus::capture(
            timestamp,
            uptime,
            &self.assembler,
            &snapshots,
        ));
        Ok(())
    }
}
