//! Pipeline Executor (§4.6): `execute_multiple` creates one
//! `PipelineExecution` row per matched ruleset, runs its steps in
//! declaration order, and derives the execution-level status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use docidx_domain::{
    derive_execution_status, ExecutionId, ExecutionStatus, OutboxId, PipelineExecution,
    RevisionEventType, RevisionId, StepResult, StepStatus,
};
use docidx_ports::{Clock, ExecutionStore, ExecutionStoreError};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::steps::{PipelineStep, StepError};

/// Denormalized input handed to every step: the revision plus the
/// document content and free-form metadata the event payload carried,
/// since `DocumentRevision` itself has no body field (§3, §4.4 step 4).
#[derive(Debug, Clone)]
pub struct StepInput {
    pub revision_id: RevisionId,
    pub document_uuid: uuid::Uuid,
    pub document_id: String,
    pub title: String,
    pub status: String,
    pub content: String,
    pub doc_number: Option<String>,
    pub doc_type: String,
    pub product: Option<String>,
    pub owners: Vec<String>,
    pub contributors: Vec<String>,
    pub approvers: Vec<String>,
    pub custom_fields: BTreeMap<String, String>,
    pub event_type: RevisionEventType,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("execution store error: {0}")]
    Store(#[from] ExecutionStoreError),
}

/// Attempt budget for in-step retries of a retryable step error
/// (default 3, §4.6).
pub const DEFAULT_STEP_ATTEMPT_BUDGET: u32 = 3;

pub struct PipelineExecutor<S: ExecutionStore, C: Clock> {
    execution_store: Arc<S>,
    clock: Arc<C>,
    steps: BTreeMap<String, Arc<dyn PipelineStep>>,
    step_attempt_budget: u32,
}

impl<S: ExecutionStore, C: Clock> PipelineExecutor<S, C> {
    /// Registers the known step kinds at construction time; an
    /// unregistered step name referenced by a ruleset is invariant I9's
    /// concern (enforced by the Matcher), not the executor's.
    pub fn new(
        execution_store: Arc<S>,
        clock: Arc<C>,
        steps: Vec<Arc<dyn PipelineStep>>,
    ) -> Self {
        let steps = steps.into_iter().map(|s| (s.name().to_string(), s)).collect();
        Self {
            execution_store,
            clock,
            steps,
            step_attempt_budget: DEFAULT_STEP_ATTEMPT_BUDGET,
        }
    }

    pub fn with_step_attempt_budget(mut self, budget: u32) -> Self {
        self.step_attempt_budget = budget;
        self
    }

    pub fn known_step_names(&self) -> std::collections::HashSet<String> {
        self.steps.keys().cloned().collect()
    }

    /// Runs every step of one ruleset's pipeline for one matched
    /// ruleset, recording per-step results and completing the execution
    /// row. Returns `Ok(None)` if the execution already existed (the
    /// uniqueness guard observed a duplicate insert — a crash-replay
    /// race, not an error) and `Ok(Some(status))` otherwise.
    #[instrument(skip(self, input, step_configs), fields(ruleset = %ruleset_name, outbox_id = outbox_id.0))]
    pub async fn execute_one(
        &self,
        input: &StepInput,
        outbox_id: OutboxId,
        ruleset_name: &str,
        pipeline: &[String],
        step_configs: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Option<ExecutionStatus>, ExecutorError> {
        let execution = PipelineExecution {
            id: ExecutionId(0),
            revision_id: input.revision_id,
            outbox_id,
            ruleset_name: ruleset_name.to_string(),
            pipeline_steps: pipeline.to_vec(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            step_results: BTreeMap::new(),
            error_details: None,
            attempt_number: 1,
            max_attempts: 1,
            created_at: self.clock.now(),
        };

        let execution_id = match self.execution_store.create(&execution).await {
            Ok(id) => id,
            Err(ExecutionStoreError::Duplicate) => {
                info!(ruleset = %ruleset_name, "execution already exists for this outbox entry, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let started_at = self.clock.now();
        self.execution_store
            .mark_running(execution_id, started_at)
            .await?;

        let mut step_results = BTreeMap::new();
        for step_name in pipeline {
            let config = step_configs
                .get(step_name)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let result = self.run_step_with_retries(step_name, input, &config).await;
            self.execution_store
                .record_step_result(execution_id, step_name, result.clone())
                .await?;
            step_results.insert(step_name.clone(), result);
        }

        let status = derive_execution_status(&step_results);
        let error_details = if status == ExecutionStatus::Partial || status == ExecutionStatus::Failed {
            Some(
                step_results
                    .iter()
                    .filter_map(|(name, r)| r.error.as_ref().map(|e| format!("{name}: {e}")))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        } else {
            None
        };

        self.execution_store
            .complete(execution_id, status, self.clock.now(), error_details)
            .await?;

        Ok(Some(status))
    }

    /// Runs every matched ruleset's pipeline, collecting the first error
    /// across all of them (the Consumer logs it and commits the offset
    /// regardless, per §4.4 step 7 and §7's liveness-over-completeness
    /// tradeoff).
    pub async fn execute_multiple(
        &self,
        input: &StepInput,
        outbox_id: OutboxId,
        matched: &[&docidx_domain::Ruleset],
    ) -> Vec<ExecutorError> {
        let mut errors = Vec::new();
        for ruleset in matched {
            match self
                .execute_one(input, outbox_id, &ruleset.name, &ruleset.pipeline, &ruleset.config)
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    warn!(ruleset = %ruleset.name, error = %e, "pipeline execution failed");
                    errors.push(e);
                }
            }
        }
        errors
    }

    async fn run_step_with_retries(
        &self,
        step_name: &str,
        input: &StepInput,
        config: &serde_json::Value,
    ) -> StepResult {
        let Some(step) = self.steps.get(step_name) else {
            return StepResult {
                status: StepStatus::Failed,
                duration_ms: 0,
                error: Some(format!("step '{step_name}' is not registered")),
            };
        };

        let start = Instant::now();
        let mut attempt = 1;
        loop {
            match step.execute(input, config).await {
                Ok(()) => {
                    return StepResult {
                        status: StepStatus::Success,
                        duration_ms: start.elapsed().as_millis() as u64,
                        error: None,
                    };
                }
                Err(err) => {
                    let retryable = step.is_retryable(&err) && attempt < self.step_attempt_budget;
                    if !retryable {
                        return StepResult {
                            status: StepStatus::Failed,
                            duration_ms: start.elapsed().as_millis() as u64,
                            error: Some(err.to_string()),
                        };
                    }
                    let backoff_ms = 100u64.saturating_mul(1 << (attempt - 1)).min(5_000);
                    warn!(
                        step = %step_name,
                        attempt,
                        backoff_ms,
                        error = %err,
                        "retryable step error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepError as SErr;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FakeClock;
    impl Clock for FakeClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
    }

    struct FakeExecutionStore {
        seen: Mutex<std::collections::HashSet<(i64, String)>>,
        steps: Mutex<BTreeMap<i64, BTreeMap<String, StepResult>>>,
        next_id: AtomicU32,
    }

    impl FakeExecutionStore {
        fn new() -> Self {
            Self {
                seen: Mutex::new(std::collections::HashSet::new()),
                steps: Mutex::new(BTreeMap::new()),
                next_id: AtomicU32::new(1),
            }
        }
    }

    impl ExecutionStore for FakeExecutionStore {
        async fn exists_for_outbox(
            &self,
            outbox_id: OutboxId,
            ruleset_name: &str,
        ) -> Result<bool, ExecutionStoreError> {
            Ok(self
                .seen
                .lock()
                .unwrap()
                .contains(&(outbox_id.0, ruleset_name.to_string())))
        }

        async fn create(
            &self,
            execution: &PipelineExecution,
        ) -> Result<ExecutionId, ExecutionStoreError> {
            let key = (execution.outbox_id.0, execution.ruleset_name.clone());
            let mut seen = self.seen.lock().unwrap();
            if !seen.insert(key) {
                return Err(ExecutionStoreError::Duplicate);
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
            self.steps.lock().unwrap().insert(id, BTreeMap::new());
            Ok(ExecutionId(id))
        }

        async fn mark_running(
            &self,
            _id: ExecutionId,
            _started_at: chrono::DateTime<Utc>,
        ) -> Result<(), ExecutionStoreError> {
            Ok(())
        }

        async fn record_step_result(
            &self,
            id: ExecutionId,
            step_name: &str,
            result: StepResult,
        ) -> Result<(), ExecutionStoreError> {
            self.steps
                .lock()
                .unwrap()
                .get_mut(&id.0)
                .unwrap()
                .insert(step_name.to_string(), result);
            Ok(())
        }

        async fn complete(
            &self,
            _id: ExecutionId,
            _status: ExecutionStatus,
            _completed_at: chrono::DateTime<Utc>,
            _error_details: Option<String>,
        ) -> Result<(), ExecutionStoreError> {
            Ok(())
        }
    }

    struct AlwaysSucceedsStep;
    #[async_trait]
    impl PipelineStep for AlwaysSucceedsStep {
        fn name(&self) -> &str {
            "search_index"
        }
        async fn execute(&self, _input: &StepInput, _config: &serde_json::Value) -> Result<(), SErr> {
            Ok(())
        }
        fn is_retryable(&self, _error: &SErr) -> bool {
            false
        }
    }

    struct AlwaysFailsStep;
    #[async_trait]
    impl PipelineStep for AlwaysFailsStep {
        fn name(&self) -> &str {
            "llm_summary"
        }
        async fn execute(&self, _input: &StepInput, _config: &serde_json::Value) -> Result<(), SErr> {
            Err(SErr::NonRetryable {
                message: "over budget".to_string(),
            })
        }
        fn is_retryable(&self, _error: &SErr) -> bool {
            false
        }
    }

    fn sample_input() -> StepInput {
        StepInput {
            revision_id: RevisionId(10),
            document_uuid: uuid::Uuid::nil(),
            document_id: "doc-1".to_string(),
            title: "Doc".to_string(),
            status: "active".to_string(),
            content: "body".to_string(),
            doc_number: None,
            doc_type: "RFC".to_string(),
            product: None,
            owners: vec![],
            contributors: vec![],
            approvers: vec![],
            custom_fields: BTreeMap::new(),
            event_type: RevisionEventType::Created,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn all_steps_succeed_yields_completed() {
        let store = Arc::new(FakeExecutionStore::new());
        let executor = PipelineExecutor::new(
            store,
            Arc::new(FakeClock),
            vec![Arc::new(AlwaysSucceedsStep)],
        );
        let status = executor
            .execute_one(
                &sample_input(),
                OutboxId(1),
                "all",
                &["search_index".to_string()],
                &BTreeMap::new(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn mixed_steps_yield_partial() {
        let store = Arc::new(FakeExecutionStore::new());
        let executor = PipelineExecutor::new(
            store,
            Arc::new(FakeClock),
            vec![Arc::new(AlwaysSucceedsStep), Arc::new(AlwaysFailsStep)],
        );
        let status = executor
            .execute_one(
                &sample_input(),
                OutboxId(1),
                "enrich",
                &["search_index".to_string(), "llm_summary".to_string()],
                &BTreeMap::new(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, ExecutionStatus::Partial);
    }

    #[tokio::test]
    async fn duplicate_execution_is_skipped_not_errored() {
        let store = Arc::new(FakeExecutionStore::new());
        let executor = PipelineExecutor::new(
            store,
            Arc::new(FakeClock),
            vec![Arc::new(AlwaysSucceedsStep)],
        );
        let pipeline = vec!["search_index".to_string()];
        executor
            .execute_one(&sample_input(), OutboxId(1), "all", &pipeline, &BTreeMap::new())
            .await
            .unwrap();
        let second = executor
            .execute_one(&sample_input(), OutboxId(1), "all", &pipeline, &BTreeMap::new())
            .await
            .unwrap();
        assert!(second.is_none());
    }
}
