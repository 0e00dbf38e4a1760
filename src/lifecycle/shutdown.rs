//! Ordered teardown for the gateway.
//!
//! Persistence must outlive the request path: handlers drain first so no
//! new records are produced, then the sinks close so their final batches
//! flush, and only then does the storage pool both sinks write through go
//! away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::storage::{GuardrailMetric, RequestLog, Sink, Storage};

/// Drain budget for in-flight handlers after the shutdown signal.
const HANDLER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates the gateway's ordered teardown.
///
/// The HTTP server subscribes through [`drain_signal`]; the persistence
/// components are registered at wiring time and closed in dependency order
/// by [`run`]: handlers, then sinks, then storage.
///
/// [`drain_signal`]: Shutdown::drain_signal
/// [`run`]: Shutdown::run
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    log_sink: Option<Arc<Sink<RequestLog>>>,
    metrics_sink: Option<Arc<Sink<GuardrailMetric>>>,
    storage: Option<Arc<dyn Storage>>,
}

impl Shutdown {
    /// Register the components to tear down, in the order [`run`] closes
    /// them.
    ///
    /// [`run`]: Shutdown::run
    pub fn new(
        log_sink: Option<Arc<Sink<RequestLog>>>,
        metrics_sink: Option<Arc<Sink<GuardrailMetric>>>,
        storage: Option<Arc<dyn Storage>>,
    ) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            log_sink,
            metrics_sink,
            storage,
        }
    }

    /// Signal the HTTP server watches to stop accepting and drain.
    pub fn drain_signal(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Execute the teardown sequence.
    ///
    /// Stops the server and waits out the handler drain budget, closes the
    /// sinks (their final flushes happen on this path, each bounded by the
    /// sink's own grace period), then closes storage once both writers are
    /// gone. Requests still in flight past the budget are abandoned.
    pub async fn run(self, server: JoinHandle<std::io::Result<()>>) {
        let _ = self.tx.send(());
        if tokio::time::timeout(HANDLER_DRAIN_TIMEOUT, server)
            .await
            .is_err()
        {
            tracing::warn!("timed out waiting for in-flight handlers");
        }

        if let Some(sink) = self.metrics_sink {
            sink.close().await;
        }
        if let Some(sink) = self.log_sink {
            sink.close().await;
        }
        if let Some(storage) = self.storage {
            storage.close().await;
        }
        tracing::info!("shutdown complete");
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LogBatchWriter, MemoryStorage, MetricBatchWriter, SinkConfig};

    #[tokio::test]
    async fn run_drains_sinks_before_storage_closes() {
        let storage = Arc::new(MemoryStorage::new());
        let storage_dyn: Arc<dyn Storage> = storage.clone();
        let log_sink = Arc::new(Sink::new(
            SinkConfig {
                batch_size: 100,
                flush_interval: Duration::from_secs(60),
                ..SinkConfig::default()
            },
            Arc::new(LogBatchWriter(storage_dyn.clone())),
        ));
        let metrics_sink = Arc::new(Sink::new(
            SinkConfig::default(),
            Arc::new(MetricBatchWriter(storage_dyn.clone())),
        ));

        log_sink.submit(RequestLog::new("/v1/chat/completions", "POST"));

        let shutdown = Shutdown::new(
            Some(log_sink.clone()),
            Some(metrics_sink),
            Some(storage_dyn),
        );
        let server = tokio::spawn(async { std::io::Result::Ok(()) });
        shutdown.run(server).await;

        // The queued record reached storage via the close-path flush.
        assert_eq!(storage.request_logs().len(), 1);
        // The sinks are closed: later submissions are dropped, not queued.
        log_sink.submit(RequestLog::new("/v1/chat/completions", "POST"));
        assert_eq!(log_sink.stats().dropped, 1);
    }

    #[tokio::test]
    async fn drain_signal_fires_on_run() {
        let shutdown = Shutdown::new(None, None, None);
        let mut signal = shutdown.drain_signal();
        let server = tokio::spawn(async { std::io::Result::Ok(()) });
        shutdown.run(server).await;
        assert!(signal.try_recv().is_ok());
    }
}
