//! Store adapter interface.
//!
//! A sink accepts one ordered batch of points per call. Any failure is
//! reported as a [`SinkError`]; the pipeline treats it as "batch lost".

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::point::Point;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Error type for store writes.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Store unreachable or connection dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// Store answered but refused the write
    #[error("Write rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Write did not finish in time
    #[error("Write timeout after {0}ms")]
    Timeout(u64),

    /// Batch could not be encoded for the store
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other error
    #[error("Sink error: {0}")]
    Other(#[from] anyhow::Error),
}

/// A downstream store that accepts batches of points.
#[async_trait]
pub trait PointSink: Send + Sync {
    /// Sink name, used in logs.
    fn name(&self) -> &str;

    /// One-time bootstrap (create database, check connectivity).
    async fn ensure_schema(&self) -> SinkResult<()> {
        Ok(())
    }

    /// Write one batch, preserving its order.
    async fn write(&self, batch: &[Point]) -> SinkResult<()>;
}

/// Sink that keeps every written batch in memory.
///
/// Can be switched into a failing mode or given an artificial write delay.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Point>>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every write by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Batches written so far, in write order.
    pub fn batches(&self) -> Vec<Vec<Point>> {
        self.batches.lock().clone()
    }

    /// All written points, flattened in write order.
    pub fn points(&self) -> Vec<Point> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Highest number of writes that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Counts a running write; released on drop so cancelled writes are counted out.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let running = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(running, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PointSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, batch: &[Point]) -> SinkResult<()> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Connection("memory sink set to fail".to_string()));
        }
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }
}
