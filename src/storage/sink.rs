//! Bounded async batch writer shared by the log and metrics pipelines.
//!
//! # Responsibilities
//! - Accept records without ever blocking the request path
//! - Batch records per worker, flushing on size or interval
//! - Drop on overflow and count what was dropped
//! - Drain outstanding records on close, bounded by a grace period
//!
//! # Design Decisions
//! - One transaction per batch; a failed batch is discarded, not retried
//! - Workers share one receiver behind an async mutex; ordering across
//!   workers is not promised, readers sort by timestamp

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storage::StorageError;

/// Grace period for workers to finish their in-flight batches on close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination for flushed batches.
#[async_trait]
pub trait BatchWriter<T>: Send + Sync {
    async fn write_batch(&self, batch: Vec<T>) -> Result<(), StorageError>;
}

/// Sink construction parameters.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Bounded queue capacity.
    pub buffer_size: usize,

    /// Records per flush.
    pub batch_size: usize,

    /// Maximum time between flushes.
    pub flush_interval: Duration,

    /// Worker task count.
    pub workers: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            batch_size: 10,
            flush_interval: Duration::from_secs(1),
            workers: 2,
        }
    }
}

/// Snapshot of sink counters, served by the /metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SinkStats {
    pub submitted: u64,
    pub dropped: u64,
    pub failed_batches: u64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub last_flush: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    failed_batches: AtomicU64,
    last_flush: Mutex<Option<DateTime<Utc>>>,
}

/// Bounded-buffer async sink with a worker pool.
pub struct Sink<T> {
    tx: mpsc::Sender<T>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    buffer_size: usize,
}

impl<T: Send + 'static> Sink<T> {
    /// Create a sink and start its workers.
    pub fn new(config: SinkConfig, writer: Arc<dyn BatchWriter<T>>) -> Self {
        let buffer_size = config.buffer_size.max(1);
        let batch_size = config.batch_size.max(1);
        let workers = config.workers.max(1);

        let (tx, rx) = mpsc::channel(buffer_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();

        let handles = (0..workers)
            .map(|_| {
                tokio::spawn(worker_loop(
                    rx.clone(),
                    writer.clone(),
                    counters.clone(),
                    cancel.clone(),
                    batch_size,
                    config.flush_interval,
                ))
            })
            .collect();

        Self {
            tx,
            counters,
            cancel,
            workers: Mutex::new(handles),
            buffer_size,
        }
    }

    /// Queue a record without blocking.
    ///
    /// When the queue is full (or the sink is closing) the record is dropped
    /// and counted; the request path never waits on storage.
    pub fn submit(&self, record: T) {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Snapshot the sink's counters.
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed_batches: self.counters.failed_batches.load(Ordering::Relaxed),
            queue_depth: self.buffer_size - self.tx.capacity(),
            queue_capacity: self.buffer_size,
            last_flush: *self.counters.last_flush.lock().unwrap(),
        }
    }

    /// Stop the workers, draining queued records first.
    ///
    /// Waits up to 30 seconds for the final flushes. Records submitted after
    /// close begins may be silently dropped.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, join_all).await.is_err() {
            tracing::warn!("timed out waiting for sink workers to finish");
        }
    }
}

async fn worker_loop<T: Send + 'static>(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
    writer: Arc<dyn BatchWriter<T>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch: Vec<T> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick of a fresh interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Drain whatever is still queued, then flush and exit.
                loop {
                    let item = rx.lock().await.try_recv();
                    match item {
                        Ok(record) => {
                            batch.push(record);
                            if batch.len() >= batch_size {
                                flush(&writer, &counters, &mut batch).await;
                            }
                        }
                        Err(_) => break,
                    }
                }
                flush(&writer, &counters, &mut batch).await;
                return;
            }
            item = async { rx.lock().await.recv().await } => {
                match item {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= batch_size {
                            flush(&writer, &counters, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&writer, &counters, &mut batch).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&writer, &counters, &mut batch).await;
            }
        }
    }
}

async fn flush<T>(writer: &Arc<dyn BatchWriter<T>>, counters: &Counters, batch: &mut Vec<T>) {
    if batch.is_empty() {
        return;
    }
    let records = std::mem::take(batch);
    let count = records.len();
    if let Err(err) = writer.write_batch(records).await {
        counters.failed_batches.fetch_add(1, Ordering::Relaxed);
        tracing::error!(error = %err, count, "failed to write sink batch");
    }
    *counters.last_flush.lock().unwrap() = Some(Utc::now());
}
