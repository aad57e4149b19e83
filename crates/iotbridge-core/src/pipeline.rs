//! Buffered, batched write pipeline.
//!
//! ```text
//! submit() ──► intake (bounded mpsc) ──flush tick──► pending batches (bounded, drop-oldest)
//!                                                          │
//!                                               drain task │ one write in flight
//!                                                          ▼
//!                                                      PointSink
//! ```
//!
//! - `submit` waits only when the intake buffer is full, never on store I/O.
//! - Every flush interval the whole intake is moved into one batch, in
//!   arrival order, and appended to the pending queue. A full pending queue
//!   evicts its oldest batch; those points are lost and counted.
//! - A single drain task writes pending batches in FIFO order. A failed or
//!   timed-out write drops the batch; it is not re-queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::point::Point;
use crate::sink::{PointSink, SinkError};

/// Default intake buffer capacity, in points.
pub const DEFAULT_INTAKE_CAPACITY: usize = 10_240;
/// Default pending queue capacity, in batches.
pub const DEFAULT_PENDING_CAPACITY: usize = 1_024;
/// Default flush period.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);
/// Default bound on a single store write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Shortest flush period the pipeline will run with.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// An ordered group of points flushed together.
pub type Batch = Vec<Point>;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub intake_capacity: usize,
    pub pending_capacity: usize,
    pub flush_interval: Duration,
    /// `None` lets a write run for as long as the sink takes.
    pub write_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
        }
    }
}

impl PipelineConfig {
    pub fn with_intake_capacity(mut self, capacity: usize) -> Self {
        self.intake_capacity = capacity;
        self
    }

    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = capacity;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub submitted_points: u64,
    /// Times `submit` had to wait for intake space.
    pub intake_full_waits: u64,
    pub flushed_batches: u64,
    pub written_batches: u64,
    pub written_points: u64,
    pub failed_batches: u64,
    pub failed_points: u64,
    pub evicted_batches: u64,
    pub evicted_points: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted_points: AtomicU64,
    intake_full_waits: AtomicU64,
    flushed_batches: AtomicU64,
    written_batches: AtomicU64,
    written_points: AtomicU64,
    failed_batches: AtomicU64,
    failed_points: AtomicU64,
    evicted_batches: AtomicU64,
    evicted_points: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            submitted_points: self.submitted_points.load(Ordering::Relaxed),
            intake_full_waits: self.intake_full_waits.load(Ordering::Relaxed),
            flushed_batches: self.flushed_batches.load(Ordering::Relaxed),
            written_batches: self.written_batches.load(Ordering::Relaxed),
            written_points: self.written_points.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            failed_points: self.failed_points.load(Ordering::Relaxed),
            evicted_batches: self.evicted_batches.load(Ordering::Relaxed),
            evicted_points: self.evicted_points.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    config: PipelineConfig,
    sink: Arc<dyn PointSink>,
    intake_rx: Mutex<mpsc::Receiver<Point>>,
    pending: Mutex<VecDeque<Batch>>,
    /// Held for the whole of a drain pass: one writer at a time.
    drain_lock: tokio::sync::Mutex<()>,
    drain_signal: Notify,
    counters: Counters,
}

/// Batching write pipeline in front of a [`PointSink`].
///
/// Cloning is cheap; clones share the same buffers.
#[derive(Clone)]
pub struct BatchPipeline {
    intake_tx: mpsc::Sender<Point>,
    shared: Arc<Shared>,
}

impl BatchPipeline {
    pub fn new(config: PipelineConfig, sink: Arc<dyn PointSink>) -> Self {
        let mut config = config;
        config.intake_capacity = config.intake_capacity.max(1);
        config.pending_capacity = config.pending_capacity.max(1);
        config.flush_interval = config.flush_interval.max(MIN_FLUSH_INTERVAL);

        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity);
        Self {
            intake_tx,
            shared: Arc::new(Shared {
                config,
                sink,
                intake_rx: Mutex::new(intake_rx),
                pending: Mutex::new(VecDeque::new()),
                drain_lock: tokio::sync::Mutex::new(()),
                drain_signal: Notify::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn sink(&self) -> &Arc<dyn PointSink> {
        &self.shared.sink
    }

    /// Append a point to the intake buffer.
    ///
    /// Waits only while the intake buffer is full.
    pub async fn submit(&self, point: Point) {
        let counters = &self.shared.counters;
        match self.intake_tx.try_send(point) {
            Ok(()) => {}
            Err(TrySendError::Full(point)) => {
                Counters::add(&counters.intake_full_waits, 1);
                warn!(
                    capacity = self.shared.config.intake_capacity,
                    "Intake buffer full, waiting for the next flush"
                );
                // The receiver lives in `shared`, which outlives this sender.
                if self.intake_tx.send(point).await.is_err() {
                    error!("Intake buffer closed, point dropped");
                    return;
                }
            }
            Err(TrySendError::Closed(_)) => {
                error!("Intake buffer closed, point dropped");
                return;
            }
        }
        Counters::add(&counters.submitted_points, 1);
    }

    /// Move the current intake contents into one pending batch.
    ///
    /// Returns the number of points flushed. Evicts the oldest pending batch
    /// when the pending queue is full.
    pub fn flush(&self) -> usize {
        let batch = self.take_intake();
        if batch.is_empty() {
            return 0;
        }
        let len = batch.len();
        let counters = &self.shared.counters;

        let evicted = {
            let mut pending = self.shared.pending.lock();
            let evicted = if pending.len() >= self.shared.config.pending_capacity {
                pending.pop_front()
            } else {
                None
            };
            pending.push_back(batch);
            evicted
        };

        if let Some(evicted) = evicted {
            Counters::add(&counters.evicted_batches, 1);
            Counters::add(&counters.evicted_points, evicted.len());
            warn!(
                evicted_points = evicted.len(),
                capacity = self.shared.config.pending_capacity,
                "Pending batch queue full, dropped oldest batch"
            );
        }

        Counters::add(&counters.flushed_batches, 1);
        debug!(points = len, "Flushed intake into pending batch");
        self.shared.drain_signal.notify_one();
        len
    }

    /// Write every pending batch to the sink, oldest first.
    ///
    /// Returns the number of batches taken off the queue, whether or not
    /// their write succeeded.
    pub async fn drain(&self) -> usize {
        let _guard = self.shared.drain_lock.lock().await;
        let mut drained = 0;
        while let Some(batch) = self.pop_pending() {
            self.write_batch(batch).await;
            drained += 1;
        }
        drained
    }

    /// Spawn the flush and drain tasks.
    ///
    /// The tasks stop only through [`PipelineHandle::shutdown`]. Dropping the
    /// handle detaches them and they run for the rest of the process.
    pub fn start(&self) -> PipelineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let flusher = {
            let pipeline = self.clone();
            let mut shutdown = ShutdownWatch::new(shutdown_rx.clone());
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pipeline.shared.config.flush_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            pipeline.flush();
                        }
                        stop = shutdown.changed(), if shutdown.attached() => {
                            if stop {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let drainer = {
            let pipeline = self.clone();
            let mut shutdown = ShutdownWatch::new(shutdown_rx);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = pipeline.shared.drain_signal.notified() => {
                            pipeline.drain().await;
                        }
                        stop = shutdown.changed(), if shutdown.attached() => {
                            if stop {
                                break;
                            }
                        }
                    }
                }
            })
        };

        info!(
            sink = self.shared.sink.name(),
            flush_interval_ms = self.shared.config.flush_interval.as_millis() as u64,
            intake_capacity = self.shared.config.intake_capacity,
            pending_capacity = self.shared.config.pending_capacity,
            "Batch pipeline started"
        );

        PipelineHandle {
            pipeline: self.clone(),
            shutdown_tx,
            tasks: vec![flusher, drainer],
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    /// Points waiting in the intake buffer.
    pub fn intake_len(&self) -> usize {
        self.shared.config.intake_capacity - self.intake_tx.capacity()
    }

    /// Batches waiting to be written.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    fn take_intake(&self) -> Batch {
        let limit = self.shared.config.intake_capacity;
        let mut rx = self.shared.intake_rx.lock();
        let mut batch = Vec::new();
        // Bounded so a producer refilling the intake cannot pin the flush.
        while batch.len() < limit {
            match rx.try_recv() {
                Ok(point) => batch.push(point),
                Err(_) => break,
            }
        }
        batch
    }

    fn pop_pending(&self) -> Option<Batch> {
        self.shared.pending.lock().pop_front()
    }

    async fn write_batch(&self, batch: Batch) {
        let sink = &self.shared.sink;
        let counters = &self.shared.counters;
        let len = batch.len();

        let result = match self.shared.config.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, sink.write(&batch)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(limit.as_millis() as u64)),
            },
            None => sink.write(&batch).await,
        };

        match result {
            Ok(()) => {
                Counters::add(&counters.written_batches, 1);
                Counters::add(&counters.written_points, len);
                debug!(sink = sink.name(), points = len, "Batch written");
            }
            Err(e) => {
                Counters::add(&counters.failed_batches, 1);
                Counters::add(&counters.failed_points, len);
                error!(
                    sink = sink.name(),
                    points = len,
                    "Failed to write batch, dropping it: {}",
                    e
                );
            }
        }
    }
}

/// Shutdown receiver that tells a stop request apart from a dropped handle.
struct ShutdownWatch {
    rx: watch::Receiver<bool>,
    attached: bool,
}

impl ShutdownWatch {
    fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx, attached: true }
    }

    fn attached(&self) -> bool {
        self.attached
    }

    /// Resolves `true` on a stop request. A dropped sender detaches the
    /// watch and resolves `false`; callers stop polling it after that.
    async fn changed(&mut self) -> bool {
        match self.rx.changed().await {
            Ok(()) => *self.rx.borrow(),
            Err(_) => {
                debug!("Pipeline handle dropped, tasks keep running");
                self.attached = false;
                false
            }
        }
    }
}

/// Handle to the running flush and drain tasks.
///
/// Call [`shutdown`](Self::shutdown) to stop the tasks and write out what
/// is buffered.
#[must_use = "dropping the handle detaches the pipeline tasks; call `shutdown` to stop them"]
pub struct PipelineHandle {
    pipeline: BatchPipeline,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn pipeline(&self) -> &BatchPipeline {
        &self.pipeline
    }

    /// Stop the background tasks, then flush and drain what is left.
    pub async fn shutdown(self) -> PipelineStats {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Pipeline task failed: {}", e);
            }
        }
        self.pipeline.flush();
        self.pipeline.drain().await;

        let stats = self.pipeline.stats();
        info!(
            written_points = stats.written_points,
            failed_points = stats.failed_points,
            evicted_points = stats.evicted_points,
            "Batch pipeline stopped"
        );
        stats
    }
}
