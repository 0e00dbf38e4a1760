//! Pluggable content-safety checks.
//!
//! # Responsibilities
//! - Define the guardrail capability set: name, priority, check
//! - Materialize guardrails from configuration via the registry
//! - Evaluate guardrails in priority groups with cancellation

pub mod builtin;
pub mod executor;
pub mod moderation;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;

pub use executor::{ExecutionResult, Executor, ExecutorConfig, GuardrailOutcome};
pub use registry::Registry;

/// Error type for guardrail construction and execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GuardrailError {
    #[error("check cancelled")]
    Cancelled,

    #[error("check deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Check(String),

    #[error("invalid guardrail config: {0}")]
    Config(String),

    #[error("unknown guardrail type: {0}")]
    UnknownType(String),
}

/// Outcome of a single guardrail check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub score: Option<f64>,
    pub reason: String,
    pub metadata: serde_json::Value,
    /// Rewritten content handed to the next priority group.
    pub modified_content: Option<String>,
}

impl CheckResult {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            score: None,
            reason: reason.into(),
            metadata: serde_json::Value::Null,
            modified_content: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            score: None,
            reason: reason.into(),
            metadata: serde_json::Value::Null,
            modified_content: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_modified_content(mut self, content: impl Into<String>) -> Self {
        self.modified_content = Some(content.into());
        self
    }
}

/// A pluggable content check.
///
/// Implementations must be prompt about cancellation: the executor drops the
/// check future when a sibling fails or the deadline passes, so any await
/// point doubles as a cancellation point. A check that depends on an
/// external service should fail open (return a passing result carrying the
/// error in metadata) rather than turn a degraded dependency into an outage.
#[async_trait]
pub trait Guardrail: Send + Sync {
    /// Unique instance name, recorded on every metric row.
    fn name(&self) -> &str;

    /// Execution priority; lower values run first, equal values run
    /// concurrently.
    fn priority(&self) -> i32;

    /// Evaluate the content.
    async fn check(&self, content: &str) -> Result<CheckResult, GuardrailError>;
}

/// Default deadline for one full evaluation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
