//! Priority-grouped parallel guardrail evaluator.
//!
//! # Responsibilities
//! - Run priority groups sequentially in ascending priority order
//! - Run the guardrails inside a group concurrently
//! - Cancel siblings on the first failure in a group
//! - Submit one metric per invocation, pass or fail, even when cancelled
//! - Carry content rewrites from a passing group into the next group
//!
//! # Design Decisions
//! - Cancellation is future-drop: a check stops at its next await point
//! - A cancelled check still yields a metric with its partial duration
//! - A deadline with no named failure yields a generic failure reason

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::guardrails::{CheckResult, Guardrail, GuardrailError, DEFAULT_TIMEOUT};
use crate::storage::models::{GuardrailLayer, GuardrailMetric};
use crate::storage::Sink;

/// Executor construction parameters.
pub struct ExecutorConfig {
    pub input_guardrails: Vec<Arc<dyn Guardrail>>,
    pub output_guardrails: Vec<Arc<dyn Guardrail>>,
    pub metrics: Option<Arc<Sink<GuardrailMetric>>>,
    pub timeout: Duration,
}

/// Result of evaluating one layer for one request.
#[derive(Debug)]
pub struct ExecutionResult {
    pub passed: bool,
    pub failed_guardrail: Option<String>,
    pub failure_reason: Option<String>,
    pub results: Vec<GuardrailOutcome>,
    /// Content after rewrites, present only when some guardrail modified it.
    pub final_content: Option<String>,
}

impl ExecutionResult {
    fn passed_with(results: Vec<GuardrailOutcome>, final_content: Option<String>) -> Self {
        Self {
            passed: true,
            failed_guardrail: None,
            failure_reason: None,
            results,
            final_content,
        }
    }
}

/// Per-guardrail outcome within an [`ExecutionResult`].
#[derive(Debug)]
pub struct GuardrailOutcome {
    pub name: String,
    pub priority: i32,
    pub result: Result<CheckResult, GuardrailError>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
struct Failure {
    name: String,
    priority: i32,
    reason: String,
}

/// Original and override bodies attached to failing output metrics.
#[derive(Debug)]
struct ResponsePair {
    original: String,
    override_body: String,
}

/// Evaluates guardrails for both layers.
pub struct Executor {
    input_guardrails: Vec<Arc<dyn Guardrail>>,
    output_guardrails: Vec<Arc<dyn Guardrail>>,
    metrics: Option<Arc<Sink<GuardrailMetric>>>,
    timeout: Duration,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        let timeout = if config.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            config.timeout
        };
        Self {
            input_guardrails: config.input_guardrails,
            output_guardrails: config.output_guardrails,
            metrics: config.metrics,
            timeout,
        }
    }

    pub fn has_input_guardrails(&self) -> bool {
        !self.input_guardrails.is_empty()
    }

    pub fn has_output_guardrails(&self) -> bool {
        !self.output_guardrails.is_empty()
    }

    /// Run the input-layer guardrails over a request body.
    pub async fn execute_input(
        &self,
        request_id: Uuid,
        content: &str,
    ) -> Result<ExecutionResult, GuardrailError> {
        self.execute(
            GuardrailLayer::Input,
            request_id,
            content,
            &self.input_guardrails,
            None,
        )
        .await
    }

    /// Run the output-layer guardrails over an upstream response body.
    pub async fn execute_output(
        &self,
        request_id: Uuid,
        content: &str,
    ) -> Result<ExecutionResult, GuardrailError> {
        self.execute(
            GuardrailLayer::Output,
            request_id,
            content,
            &self.output_guardrails,
            None,
        )
        .await
    }

    /// Re-run the output guardrails with substitution bodies attached, so
    /// failing metrics record both the original and the override response.
    pub async fn execute_output_with_responses(
        &self,
        request_id: Uuid,
        content: &str,
        original_response: &[u8],
        override_response: &[u8],
    ) -> Result<ExecutionResult, GuardrailError> {
        let pair = Arc::new(ResponsePair {
            original: String::from_utf8_lossy(original_response).into_owned(),
            override_body: String::from_utf8_lossy(override_response).into_owned(),
        });
        self.execute(
            GuardrailLayer::Output,
            request_id,
            content,
            &self.output_guardrails,
            Some(pair),
        )
        .await
    }

    async fn execute(
        &self,
        layer: GuardrailLayer,
        request_id: Uuid,
        content: &str,
        guardrails: &[Arc<dyn Guardrail>],
        responses: Option<Arc<ResponsePair>>,
    ) -> Result<ExecutionResult, GuardrailError> {
        if guardrails.is_empty() {
            return Ok(ExecutionResult::passed_with(Vec::new(), None));
        }

        let deadline = Instant::now() + self.timeout;

        let mut groups: BTreeMap<i32, Vec<Arc<dyn Guardrail>>> = BTreeMap::new();
        for guardrail in guardrails {
            groups
                .entry(guardrail.priority())
                .or_default()
                .push(guardrail.clone());
        }

        let mut all_results = Vec::new();
        let mut current_content = content.to_string();
        let mut content_modified = false;

        for group in groups.values() {
            let group_eval = self
                .run_group(
                    layer,
                    request_id,
                    &current_content,
                    group,
                    deadline,
                    responses.clone(),
                )
                .await;

            all_results.extend(group_eval.outcomes);

            if let Some(failure) = group_eval.failure {
                return Ok(ExecutionResult {
                    passed: false,
                    failed_guardrail: Some(failure.name),
                    failure_reason: Some(failure.reason),
                    results: all_results,
                    final_content: None,
                });
            }
            if group_eval.deadline_hit {
                return Ok(ExecutionResult {
                    passed: false,
                    failed_guardrail: None,
                    failure_reason: Some("guardrail execution deadline exceeded".to_string()),
                    results: all_results,
                    final_content: None,
                });
            }
            if let Some(modified) = group_eval.modified_content {
                current_content = modified;
                content_modified = true;
            }
        }

        Ok(ExecutionResult::passed_with(
            all_results,
            content_modified.then_some(current_content),
        ))
    }

    async fn run_group(
        &self,
        layer: GuardrailLayer,
        request_id: Uuid,
        content: &str,
        group: &[Arc<dyn Guardrail>],
        deadline: Instant,
        responses: Option<Arc<ResponsePair>>,
    ) -> GroupEval {
        let cancel = CancellationToken::new();
        let failure: Arc<Mutex<Option<Failure>>> = Arc::new(Mutex::new(None));

        let handles: Vec<_> = group
            .iter()
            .map(|guardrail| {
                tokio::spawn(run_one(
                    guardrail.clone(),
                    layer,
                    request_id,
                    content.to_string(),
                    cancel.clone(),
                    deadline,
                    failure.clone(),
                    self.metrics.clone(),
                    responses.clone(),
                ))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut deadline_hit = false;
        for (handle, guardrail) in handles.into_iter().zip(group.iter()) {
            match handle.await {
                Ok(outcome) => {
                    if matches!(outcome.result, Err(GuardrailError::DeadlineExceeded)) {
                        deadline_hit = true;
                    }
                    outcomes.push(outcome);
                }
                Err(join_err) => {
                    // The check task itself died; treat it as a failure so
                    // the group short-circuits like any other failed check.
                    let reason = format!("guardrail task failed: {}", join_err);
                    record_failure(&failure, guardrail.name(), guardrail.priority(), &reason);
                    cancel.cancel();
                    outcomes.push(GuardrailOutcome {
                        name: guardrail.name().to_string(),
                        priority: guardrail.priority(),
                        result: Err(GuardrailError::Check(reason)),
                        duration: Duration::ZERO,
                    });
                }
            }
        }

        let modified_content = outcomes.iter().find_map(|outcome| {
            outcome
                .result
                .as_ref()
                .ok()
                .and_then(|check| check.modified_content.clone())
        });

        let failure = failure.lock().unwrap().clone();
        GroupEval {
            outcomes,
            failure,
            deadline_hit,
            modified_content,
        }
    }
}

struct GroupEval {
    outcomes: Vec<GuardrailOutcome>,
    failure: Option<Failure>,
    deadline_hit: bool,
    modified_content: Option<String>,
}

#[allow(clippy::too_many_arguments)]
async fn run_one(
    guardrail: Arc<dyn Guardrail>,
    layer: GuardrailLayer,
    request_id: Uuid,
    content: String,
    cancel: CancellationToken,
    deadline: Instant,
    failure: Arc<Mutex<Option<Failure>>>,
    metrics: Option<Arc<Sink<GuardrailMetric>>>,
    responses: Option<Arc<ResponsePair>>,
) -> GuardrailOutcome {
    let name = guardrail.name().to_string();
    let priority = guardrail.priority();

    let started_at = Utc::now();
    let start = Instant::now();
    let result = tokio::select! {
        res = guardrail.check(&content) => res,
        _ = cancel.cancelled() => Err(GuardrailError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(GuardrailError::DeadlineExceeded),
    };
    let duration = start.elapsed();
    let ended_at = Utc::now();

    let mut metric = GuardrailMetric {
        id: Uuid::new_v4(),
        request_id,
        guardrail_name: name.clone(),
        layer,
        priority,
        start_time: started_at,
        end_time: ended_at,
        duration_ms: duration.as_millis() as i64,
        passed: false,
        score: None,
        error: None,
        metadata: serde_json::Value::Null,
        original_response: None,
        override_response: None,
        response_overridden: false,
        created_at: ended_at,
    };

    match &result {
        Ok(check) => {
            metric.passed = check.passed;
            metric.score = check.score;
            metric.metadata = check.metadata.clone();
            if !check.passed {
                if layer == GuardrailLayer::Output {
                    if let Some(pair) = &responses {
                        metric.original_response = Some(pair.original.clone());
                        metric.override_response = Some(pair.override_body.clone());
                        metric.response_overridden = true;
                    }
                }
                record_failure(&failure, &name, priority, &check.reason);
                cancel.cancel();
            }
        }
        Err(GuardrailError::DeadlineExceeded) => {
            metric.error = Some(GuardrailError::DeadlineExceeded.to_string());
        }
        Err(GuardrailError::Cancelled) => {
            // A sibling already failed; the metric keeps the partial
            // duration and the cancellation error.
            metric.error = Some(GuardrailError::Cancelled.to_string());
        }
        Err(err) => {
            metric.error = Some(err.to_string());
            record_failure(&failure, &name, priority, &err.to_string());
            cancel.cancel();
        }
    }

    if let Some(sink) = &metrics {
        sink.submit(metric);
    }

    GuardrailOutcome {
        name,
        priority,
        result,
        duration,
    }
}

/// Remember the failure with the numerically lowest priority value; ties
/// keep the first one recorded.
fn record_failure(slot: &Arc<Mutex<Option<Failure>>>, name: &str, priority: i32, reason: &str) {
    let mut slot = slot.lock().unwrap();
    let replace = match slot.as_ref() {
        None => true,
        Some(existing) => priority < existing.priority,
    };
    if replace {
        *slot = Some(Failure {
            name: name.to_string(),
            priority,
            reason: reason.to_string(),
        });
    }
}
