//! In-memory stand-ins for the outbox store, execution store, and log
//! transport ports. The harness drives real `docidx-relay`,
//! `docidx-consumer`, and `docidx-pipeline` code against these rather
//! than a live Postgres/NATS pair, so the seed scenarios run
//! deterministically and without external services.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docidx_domain::{EventEnvelope, ExecutionId, ExecutionStatus, OutboxEntry, OutboxId, OutboxStatus, PipelineExecution, StepResult};
use docidx_pipeline::{PipelineStep, StepError, StepInput};
use docidx_ports::{ExecutionStore, ExecutionStoreError, LogRecord, LogTransport, LogTransportError, OutboxStore, OutboxStoreError};

/// Mirrors the Postgres outbox table's relevant transitions (§4.1) with
/// a `Mutex<Vec<_>>` instead of a connection pool.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    rows: Mutex<Vec<OutboxEntry>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the producer's own transaction: insert a revision's
    /// outbox row directly, bypassing `append`'s duplicate-key path
    /// (callers needing that path use `append` itself).
    pub fn seed(&self, entry: OutboxEntry) {
        self.rows.lock().unwrap().push(entry);
    }

    pub fn row(&self, id: OutboxId) -> Option<OutboxEntry> {
        self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }
}

impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, entry: &OutboxEntry) -> Result<OutboxId, OutboxStoreError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|r| r.idempotent_key == entry.idempotent_key) {
            return Err(OutboxStoreError::Duplicate);
        }
        rows.push(entry.clone());
        Ok(entry.id)
    }

    async fn fetch_pending(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == OutboxStatus::Pending)
            .take(batch_size)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: OutboxId, published_at: DateTime<Utc>) -> Result<(), OutboxStoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.iter_mut().find(|r| r.id == id).ok_or(OutboxStoreError::NotFound { id: id.0 })?;
        row.status = OutboxStatus::Published;
        row.published_at = Some(published_at);
        row.updated_at = published_at;
        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<(), OutboxStoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.iter_mut().find(|r| r.id == id).ok_or(OutboxStoreError::NotFound { id: id.0 })?;
        row.status = OutboxStatus::Failed;
        row.publish_attempts += 1;
        row.last_error = Some(error.to_string());
        Ok(())
    }

    async fn retry_failed(&self, limit: usize) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
        let mut rows = self.rows.lock().unwrap();
        let mut taken = Vec::new();
        for row in rows.iter_mut() {
            if taken.len() >= limit {
                break;
            }
            if row.status == OutboxStatus::Failed {
                row.status = OutboxStatus::Pending;
                taken.push(row.clone());
            }
        }
        Ok(taken)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, OutboxStoreError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| !(r.status == OutboxStatus::Published && r.updated_at < older_than));
        Ok((before - rows.len()) as u64)
    }
}

/// Records one `PipelineExecution` per `(outbox_id, ruleset_name)`, the
/// in-memory analogue of the unique index that backs testable property 3.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: Mutex<Vec<PipelineExecution>>,
    next_id: AtomicUsize,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            executions: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn all(&self) -> Vec<PipelineExecution> {
        self.executions.lock().unwrap().clone()
    }

    pub fn count_for(&self, outbox_id: OutboxId, ruleset_name: &str) -> usize {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.outbox_id == outbox_id && e.ruleset_name == ruleset_name)
            .count()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    async fn exists_for_outbox(&self, outbox_id: OutboxId, ruleset_name: &str) -> Result<bool, ExecutionStoreError> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.outbox_id == outbox_id && e.ruleset_name == ruleset_name))
    }

    async fn create(&self, execution: &PipelineExecution) -> Result<ExecutionId, ExecutionStoreError> {
        let mut executions = self.executions.lock().unwrap();
        if executions
            .iter()
            .any(|e| e.outbox_id == execution.outbox_id && e.ruleset_name == execution.ruleset_name)
        {
            return Err(ExecutionStoreError::Duplicate);
        }
        let id = ExecutionId(self.next_id.fetch_add(1, Ordering::SeqCst) as i64);
        let mut stored = execution.clone();
        stored.id = id;
        executions.push(stored);
        Ok(id)
    }

    async fn mark_running(&self, id: ExecutionId, started_at: DateTime<Utc>) -> Result<(), ExecutionStoreError> {
        let mut executions = self.executions.lock().unwrap();
        if let Some(e) = executions.iter_mut().find(|e| e.id == id) {
            e.status = ExecutionStatus::Running;
            e.started_at = Some(started_at);
        }
        Ok(())
    }

    async fn record_step_result(&self, id: ExecutionId, step_name: &str, result: StepResult) -> Result<(), ExecutionStoreError> {
        let mut executions = self.executions.lock().unwrap();
        if let Some(e) = executions.iter_mut().find(|e| e.id == id) {
            e.step_results.insert(step_name.to_string(), result);
        }
        Ok(())
    }

    async fn complete(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        completed_at: DateTime<Utc>,
        error_details: Option<String>,
    ) -> Result<(), ExecutionStoreError> {
        let mut executions = self.executions.lock().unwrap();
        if let Some(e) = executions.iter_mut().find(|e| e.id == id) {
            e.status = status;
            e.completed_at = Some(completed_at);
            e.error_details = error_details;
        }
        Ok(())
    }
}

/// A transport backed by a fixed set of records that `poll` keeps
/// returning regardless of prior `commit_records` calls, modeling an
/// at-least-once redelivery after a crash between processing and offset
/// commit (testable property 4, scenario S3).
#[derive(Default)]
pub struct RedeliveringTransport {
    records: Vec<LogRecord>,
    committed: Mutex<Vec<String>>,
}

impl RedeliveringTransport {
    pub fn new(records: Vec<LogRecord>) -> Self {
        Self {
            records,
            committed: Mutex::new(Vec::new()),
        }
    }

    pub fn committed_ack_tokens(&self) -> Vec<String> {
        self.committed.lock().unwrap().clone()
    }
}

impl LogTransport for RedeliveringTransport {
    async fn produce_sync(
        &self,
        _key: &str,
        _envelope: &EventEnvelope,
        _headers: &docidx_domain::EnvelopeHeaders,
    ) -> Result<(), LogTransportError> {
        unimplemented!("RedeliveringTransport only models the consumer side")
    }

    async fn poll(&self, max_records: usize) -> Result<Vec<LogRecord>, LogTransportError> {
        Ok(self.records.iter().take(max_records).cloned().collect())
    }

    async fn commit_records(&self, records: &[LogRecord]) -> Result<(), LogTransportError> {
        let mut committed = self.committed.lock().unwrap();
        committed.extend(records.iter().map(|r| r.ack_token.clone()));
        Ok(())
    }
}

/// A produce-side transport that fails the first `fail_count` calls to
/// `produce_sync` and succeeds thereafter, modeling a transport outage
/// that outlasts the relay's retry budget (scenario S6).
pub struct FlakyProduceTransport {
    fail_count: usize,
    attempts: AtomicUsize,
    pub produced: Mutex<Vec<String>>,
}

impl FlakyProduceTransport {
    pub fn new(fail_count: usize) -> Self {
        Self {
            fail_count,
            attempts: AtomicUsize::new(0),
            produced: Mutex::new(Vec::new()),
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl LogTransport for FlakyProduceTransport {
    async fn produce_sync(
        &self,
        key: &str,
        _envelope: &EventEnvelope,
        _headers: &docidx_domain::EnvelopeHeaders,
    ) -> Result<(), LogTransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_count {
            return Err(LogTransportError::PublishError {
                message: "simulated transport outage".to_string(),
            });
        }
        self.produced.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn poll(&self, _max_records: usize) -> Result<Vec<LogRecord>, LogTransportError> {
        Ok(Vec::new())
    }

    async fn commit_records(&self, _records: &[LogRecord]) -> Result<(), LogTransportError> {
        Ok(())
    }
}

/// A step whose outcome is fixed at construction, for driving the
/// executor through a chosen success/failure shape without needing a
/// real embedding/LLM provider (scenario S5).
pub struct ScriptedStep {
    step_name: &'static str,
    outcome: Result<(), StepError>,
    pub invocations: AtomicUsize,
}

impl ScriptedStep {
    pub fn succeeding(step_name: &'static str) -> Self {
        Self {
            step_name,
            outcome: Ok(()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn failing_non_retryable(step_name: &'static str, message: &str) -> Self {
        Self {
            step_name,
            outcome: Err(StepError::NonRetryable { message: message.to_string() }),
            invocations: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PipelineStep for ScriptedStep {
    fn name(&self) -> &str {
        self.step_name
    }

    async fn execute(&self, _input: &StepInput, _config: &serde_json::Value) -> Result<(), StepError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        clone_outcome(&self.outcome)
    }
}

/// `StepError` doesn't derive `Clone` upstream; the scripted outcome is
/// small enough to hand-roll it for this one use.
fn clone_outcome(outcome: &Result<(), StepError>) -> Result<(), StepError> {
    match outcome {
        Ok(()) => Ok(()),
        Err(StepError::Retryable { message }) => Err(StepError::Retryable { message: message.clone() }),
        Err(StepError::NonRetryable { message }) => Err(StepError::NonRetryable { message: message.clone() }),
    }
}

pub fn sample_step_input(revision_id: docidx_domain::RevisionId, document_uuid: uuid::Uuid, document_id: &str) -> StepInput {
    StepInput {
        revision_id,
        document_uuid,
        document_id: document_id.to_string(),
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
        event_type: docidx_domain::RevisionEventType::Created,
        metadata: BTreeMap::new(),
    }
}
