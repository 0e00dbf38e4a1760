//! In-memory storage backend, used by tests and storage-less runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::storage::models::{GuardrailMetric, RequestLog};
use crate::storage::{Storage, StorageError};

/// Storage backend holding records in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    logs: Mutex<Vec<RequestLog>>,
    metrics: Mutex<Vec<GuardrailMetric>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent inserts fail, to exercise failed-batch handling.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn request_logs(&self) -> Vec<RequestLog> {
        self.logs.lock().unwrap().clone()
    }

    pub fn guardrail_metrics(&self) -> Vec<GuardrailMetric> {
        self.metrics.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert_request_logs(&self, logs: Vec<RequestLog>) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory storage failing".into()));
        }
        self.logs.lock().unwrap().extend(logs);
        Ok(())
    }

    async fn insert_guardrail_metrics(
        &self,
        metrics: Vec<GuardrailMetric>,
    ) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory storage failing".into()));
        }
        self.metrics.lock().unwrap().extend(metrics);
        Ok(())
    }

    async fn close(&self) {}
}
