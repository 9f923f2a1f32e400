//! docidx Port Traits
//!
//! Defines the port interfaces (traits) that `docidx-adapters` implements:
//! - OutboxStore
//! - ExecutionStore
//! - LogTransport
//! - EmbeddingProvider
//! - SummaryProvider
//! - VectorStore
//! - KeywordIndex
//! - SummaryStore
//! - Clock

use std::future::Future;

use chrono::{DateTime, Utc};
use docidx_domain::{
    Embedding, EventEnvelope, ExecutionId, OutboxEntry, OutboxId, PipelineExecution,
    SearchDocument, StepResult, Summary,
};

/// Outbox store port (§4.1). Producers call `append` inside their own
/// database transaction; the Relay calls the read/update operations.
pub trait OutboxStore: Send + Sync {
    /// Inserts a new outbox row. A unique-constraint violation on
    /// `idempotent_key` is surfaced as `Err(OutboxStoreError::Duplicate)`;
    /// callers must treat that as success (testable property 3).
    fn append(
        &self,
        entry: &OutboxEntry,
    ) -> impl Future<Output = Result<OutboxId, OutboxStoreError>> + Send;

    /// Ordered scan of pending rows by `created_at` ascending, up to
    /// `batch_size`. The only query permitted to use the partial index on
    /// `status = 'pending'`.
    fn fetch_pending(
        &self,
        batch_size: usize,
    ) -> impl Future<Output = Result<Vec<OutboxEntry>, OutboxStoreError>> + Send;

    /// Marks a row published after a successful produce-with-ack.
    fn mark_published(
        &self,
        id: OutboxId,
        published_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), OutboxStoreError>> + Send;

    /// Marks a row failed, recording the last publish error.
    fn mark_failed(
        &self,
        id: OutboxId,
        error: &str,
    ) -> impl Future<Output = Result<(), OutboxStoreError>> + Send;

    /// Administrative: flips up to `limit` `failed` rows back to
    /// `pending` so the next poll tick re-publishes them.
    fn retry_failed(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<OutboxEntry>, OutboxStoreError>> + Send;

    /// Administrative: deletes `published` rows older than `older_than`.
    /// Must never delete a `failed` row (testable property 10).
    fn cleanup(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, OutboxStoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum OutboxStoreError {
    #[error("duplicate idempotent key")]
    Duplicate,

    #[error("outbox row not found: {id}")]
    NotFound { id: i64 },

    #[error("connection error: {message}")]
    ConnectionError { message: String },
}

/// Execution store port (§4.6). Serves the Consumer's idempotency check
/// and persists per-step results as the Executor runs.
pub trait ExecutionStore: Send + Sync {
    /// `true` iff a `PipelineExecution` row already exists for this
    /// `(outbox_id, ruleset_name)` pair (invariant I4).
    fn exists_for_outbox(
        &self,
        outbox_id: OutboxId,
        ruleset_name: &str,
    ) -> impl Future<Output = Result<bool, ExecutionStoreError>> + Send;

    /// Inserts a new execution row in `pending` status. Returns
    /// `Err(ExecutionStoreError::Duplicate)` on the `UNIQUE(outbox_id,
    /// ruleset_name)` constraint — the caller treats that as "already
    /// being processed" and skips.
    fn create(
        &self,
        execution: &PipelineExecution,
    ) -> impl Future<Output = Result<ExecutionId, ExecutionStoreError>> + Send;

    fn mark_running(
        &self,
        id: ExecutionId,
        started_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), ExecutionStoreError>> + Send;

    fn record_step_result(
        &self,
        id: ExecutionId,
        step_name: &str,
        result: StepResult,
    ) -> impl Future<Output = Result<(), ExecutionStoreError>> + Send;

    fn complete(
        &self,
        id: ExecutionId,
        status: docidx_domain::ExecutionStatus,
        completed_at: DateTime<Utc>,
        error_details: Option<String>,
    ) -> impl Future<Output = Result<(), ExecutionStoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionStoreError {
    #[error("duplicate execution for outbox_id/ruleset_name")]
    Duplicate,

    #[error("execution not found: {id}")]
    NotFound { id: i64 },

    #[error("connection error: {message}")]
    ConnectionError { message: String },
}

/// Log transport port (§4.3): the partitioned, ordered-per-key message
/// log. Realized over NATS JetStream in `docidx-adapters`.
pub trait LogTransport: Send + Sync {
    /// Synchronous produce-with-ack, keyed so per-document order is
    /// preserved end to end.
    fn produce_sync(
        &self,
        key: &str,
        envelope: &EventEnvelope,
        headers: &docidx_domain::EnvelopeHeaders,
    ) -> impl Future<Output = Result<(), LogTransportError>> + Send;

    /// Pulls the next batch of records for this consumer group. Offset
    /// commit is manual via `commit_records`.
    fn poll(
        &self,
        max_records: usize,
    ) -> impl Future<Output = Result<Vec<LogRecord>, LogTransportError>> + Send;

    fn commit_records(
        &self,
        records: &[LogRecord],
    ) -> impl Future<Output = Result<(), LogTransportError>> + Send;
}

/// A single record pulled from the log, not yet committed.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub headers: std::collections::BTreeMap<String, String>,
    /// Opaque transport-specific handle used to ack/commit this record.
    pub ack_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LogTransportError {
    #[error("connection error: {message}")]
    ConnectionError { message: String },

    #[error("publish error: {message}")]
    PublishError { message: String },

    #[error("commit error: {message}")]
    CommitError { message: String },
}

/// Embedding provider port (§4.7). Implemented by OpenAI/Bedrock/Ollama
/// style HTTP adapters; each tracks its own daily token/request budget.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn generate_embedding(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<EmbeddingResult, ProviderError>> + Send;
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub dimensions: usize,
    pub tokens_used: u32,
}

/// Summary provider port (§4.7).
pub trait SummaryProvider: Send + Sync {
    fn name(&self) -> &str;

    fn summarize(
        &self,
        request: SummaryRequest,
    ) -> impl Future<Output = Result<SummaryResult, ProviderError>> + Send;
}

#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub document_id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct SummaryResult {
    pub executive_summary: String,
    pub key_points: Vec<String>,
    pub topics: Vec<String>,
    pub tags: Vec<String>,
    pub suggested_status: Option<String>,
    pub confidence: f32,
    pub tokens_used: u32,
}

/// Shared error surface for embedding/summary providers. `BudgetExceeded`
/// is classified non-retryable for the remainder of the quota window
/// (§4.7); `RateLimited` carries a retry-after hint and is retryable.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("budget exceeded: {budget_type}")]
    BudgetExceeded { budget_type: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("transient error: {message}")]
    Transient { message: String },

    #[error("request rejected: {message}")]
    Rejected { message: String },
}

impl ProviderError {
    /// Step-level retryability classification (§4.7, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Transient { .. }
        )
    }
}

/// Vector store port (§4.8). Backed by Postgres + pgvector.
pub trait VectorStore: Send + Sync {
    fn upsert(&self, embedding: &Embedding) -> impl Future<Output = Result<(), VectorStoreError>> + Send;

    fn delete_for_document(
        &self,
        document_uuid: uuid::Uuid,
    ) -> impl Future<Output = Result<u64, VectorStoreError>> + Send;

    /// Returns the `content_hash` already stored for `(document_id,
    /// model, chunk_index)`, if any, so the `embeddings` step can skip a
    /// redundant provider call when content is unchanged (§4.7).
    fn existing_content_hash(
        &self,
        document_id: &str,
        model: &str,
        chunk_index: i32,
    ) -> impl Future<Output = Result<Option<String>, VectorStoreError>> + Send;

    /// Cosine-similarity kNN: `similarity = 1 - cosine_distance ∈ [0, 2]`,
    /// ordered descending, at most `k` hits, `min_similarity` applied
    /// after the index scan.
    fn knn(
        &self,
        vector: &[f32],
        k: usize,
        model_filter: Option<&str>,
        min_similarity: f32,
    ) -> impl Future<Output = Result<Vec<KnnHit>, VectorStoreError>> + Send;
}

#[derive(Debug, Clone)]
pub struct KnnHit {
    pub document_id: String,
    pub similarity: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("connection error: {message}")]
    ConnectionError { message: String },
}

/// Keyword index port (§4.9). Backed by Tantivy.
pub trait KeywordIndex: Send + Sync {
    fn upsert(&self, document: &SearchDocument) -> impl Future<Output = Result<(), SearchIndexError>> + Send;

    fn delete(&self, object_id: &str) -> impl Future<Output = Result<(), SearchIndexError>> + Send;

    fn search(
        &self,
        query: &KeywordQuery,
    ) -> impl Future<Output = Result<KeywordResults, SearchIndexError>> + Send;

    /// Fetches the denormalized document by its business `document_id`,
    /// used to hydrate a semantic-only hit (the vector store only knows
    /// `document_id` and a similarity score, not the full document).
    fn get_by_doc_id(
        &self,
        document_id: &str,
    ) -> impl Future<Output = Result<Option<SearchDocument>, SearchIndexError>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct KeywordQuery {
    pub text: String,
    pub doc_type: Option<String>,
    pub product: Option<String>,
    pub status: Option<String>,
    pub owners: Vec<String>,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub object_id: String,
    pub score: f32,
    pub document: SearchDocument,
}

#[derive(Debug, Clone, Default)]
pub struct KeywordResults {
    pub hits: Vec<KeywordHit>,
    pub total_hits: u64,
    pub facets: std::collections::BTreeMap<String, std::collections::BTreeMap<String, u64>>,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchIndexError {
    #[error("index error: {message}")]
    IndexError { message: String },

    #[error("query parse error: {message}")]
    QueryParseError { message: String },
}

/// Summary store port (§3 Summary, §4.7 `llm_summary` step). Idempotent
/// on `content_hash`: upserting a summary for a revision whose content
/// hash already has a stored summary is a no-op effect-wise (testable
/// property 5), keyed by `document_id`.
pub trait SummaryStore: Send + Sync {
    fn upsert(&self, summary: &Summary) -> impl Future<Output = Result<(), SummaryStoreError>> + Send;

    /// Returns the content_hash of the most recently stored summary for
    /// this document, if any, so the step can skip a redundant provider
    /// call when the hash is unchanged.
    fn content_hash_for_document(
        &self,
        document_id: &str,
    ) -> impl Future<Output = Result<Option<String>, SummaryStoreError>> + Send;

    fn delete_for_document(
        &self,
        document_id: &str,
    ) -> impl Future<Output = Result<u64, SummaryStoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum SummaryStoreError {
    #[error("connection error: {message}")]
    ConnectionError { message: String },
}

/// Clock port for deterministic time handling in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
