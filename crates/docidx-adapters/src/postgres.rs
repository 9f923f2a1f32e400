//! Postgres-backed `OutboxStore`, `ExecutionStore`, and `SummaryStore`
//! (§A.3, §A.5, §3 Summary).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use docidx_domain::{
    ContentHash, ExecutionId, ExecutionStatus, IdempotentKey, OutboxEntry, OutboxId,
    OutboxStatus, PipelineExecution, RevisionEventType, RevisionId, StepResult, Summary,
};
use docidx_ports::{
    ExecutionStore, ExecutionStoreError, OutboxStore, OutboxStoreError, SummaryStore,
    SummaryStoreError,
};
use sqlx::{PgPool, Row};
use tracing::instrument;

pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_err(e: sqlx::Error) -> OutboxStoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.constraint() == Some("outbox_idempotent_key_key") {
            return OutboxStoreError::Duplicate;
        }
    }
    OutboxStoreError::ConnectionError {
        message: e.to_string(),
    }
}

fn event_type_str(event_type: RevisionEventType) -> &'static str {
    match event_type {
        RevisionEventType::Created => "created",
        RevisionEventType::Updated => "updated",
        RevisionEventType::Deleted => "deleted",
    }
}

fn event_type_from_str(s: &str) -> RevisionEventType {
    match s {
        "updated" => RevisionEventType::Updated,
        "deleted" => RevisionEventType::Deleted,
        _ => RevisionEventType::Created,
    }
}

fn status_from_str(s: &str) -> OutboxStatus {
    match s {
        "published" => OutboxStatus::Published,
        "failed" => OutboxStatus::Failed,
        _ => OutboxStatus::Pending,
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> OutboxEntry {
    OutboxEntry {
        id: OutboxId(row.get("id")),
        revision_id: RevisionId(row.get("revision_id")),
        document_uuid: row.get("document_uuid"),
        document_id: row.get("document_id"),
        idempotent_key: IdempotentKey::new(
            row.get::<String, _>("idempotent_key")
                .trim_start_matches("sha256:"),
        ),
        content_hash: ContentHash::new(row.get::<String, _>("content_hash")),
        event_type: event_type_from_str(row.get("event_type")),
        provider_type: row.get("provider_type"),
        payload: row.get("payload"),
        status: status_from_str(row.get("status")),
        published_at: row.get("published_at"),
        publish_attempts: row.get("publish_attempts"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self, entry), fields(document_uuid = %entry.document_uuid))]
    async fn append(&self, entry: &OutboxEntry) -> Result<OutboxId, OutboxStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO docidx.outbox
                (revision_id, document_uuid, document_id, idempotent_key, content_hash,
                 event_type, provider_type, payload, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            RETURNING id
            "#,
        )
        .bind(entry.revision_id.0)
        .bind(entry.document_uuid)
        .bind(&entry.document_id)
        .bind(entry.idempotent_key.as_str())
        .bind(entry.content_hash.as_str())
        .bind(event_type_str(entry.event_type))
        .bind(&entry.provider_type)
        .bind(&entry.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(OutboxId(row.get("id")))
    }

    #[instrument(skip(self))]
    async fn fetch_pending(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, revision_id, document_uuid, document_id, idempotent_key, content_hash,
                   event_type, provider_type, payload, status, published_at, publish_attempts,
                   last_error, created_at, updated_at
            FROM docidx.outbox
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().map(row_to_entry).collect())
    }

    #[instrument(skip(self))]
    async fn mark_published(
        &self,
        id: OutboxId,
        published_at: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        sqlx::query(
            r#"
            UPDATE docidx.outbox
            SET status = 'published', published_at = $2, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.0)
        .bind(published_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<(), OutboxStoreError> {
        sqlx::query(
            r#"
            UPDATE docidx.outbox
            SET status = 'failed', publish_attempts = publish_attempts + 1,
                last_error = $2, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.0)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn retry_failed(&self, limit: usize) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE docidx.outbox
            SET status = 'pending', updated_at = now()
            WHERE id IN (
                SELECT id FROM docidx.outbox WHERE status = 'failed'
                ORDER BY created_at ASC LIMIT $1 FOR UPDATE SKIP LOCKED
            )
            RETURNING id, revision_id, document_uuid, document_id, idempotent_key, content_hash,
                      event_type, provider_type, payload, status, published_at, publish_attempts,
                      last_error, created_at, updated_at
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().map(row_to_entry).collect())
    }

    #[instrument(skip(self))]
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, OutboxStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM docidx.outbox
            WHERE status = 'published' AND published_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}

pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_execution_err(e: sqlx::Error) -> ExecutionStoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.constraint() == Some("pipeline_executions_outbox_id_ruleset_name_key") {
            return ExecutionStoreError::Duplicate;
        }
    }
    ExecutionStoreError::ConnectionError {
        message: e.to_string(),
    }
}

fn execution_status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Partial => "partial",
    }
}

impl ExecutionStore for PostgresExecutionStore {
    #[instrument(skip(self))]
    async fn exists_for_outbox(
        &self,
        outbox_id: OutboxId,
        ruleset_name: &str,
    ) -> Result<bool, ExecutionStoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM docidx.pipeline_executions
                WHERE outbox_id = $1 AND ruleset_name = $2
            ) AS present
            "#,
        )
        .bind(outbox_id.0)
        .bind(ruleset_name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_execution_err)?;
        Ok(row.get("present"))
    }

    #[instrument(skip(self, execution), fields(ruleset = %execution.ruleset_name))]
    async fn create(&self, execution: &PipelineExecution) -> Result<ExecutionId, ExecutionStoreError> {
        let steps_json = serde_json::to_value(&execution.pipeline_steps).map_err(|e| {
            ExecutionStoreError::ConnectionError {
                message: e.to_string(),
            }
        })?;
        let row = sqlx::query(
            r#"
            INSERT INTO docidx.pipeline_executions
                (revision_id, outbox_id, ruleset_name, pipeline_steps, status,
                 step_results, attempt_number, max_attempts)
            VALUES ($1, $2, $3, $4, 'pending', '{}'::jsonb, $5, $6)
            RETURNING id
            "#,
        )
        .bind(execution.revision_id.0)
        .bind(execution.outbox_id.0)
        .bind(&execution.ruleset_name)
        .bind(&steps_json)
        .bind(execution.attempt_number)
        .bind(execution.max_attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(map_execution_err)?;

        Ok(ExecutionId(row.get("id")))
    }

    #[instrument(skip(self))]
    async fn mark_running(
        &self,
        id: ExecutionId,
        started_at: DateTime<Utc>,
    ) -> Result<(), ExecutionStoreError> {
        sqlx::query(
            r#"UPDATE docidx.pipeline_executions SET status = 'running', started_at = $2 WHERE id = $1"#,
        )
        .bind(id.0)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(map_execution_err)?;
        Ok(())
    }

    #[instrument(skip(self, result))]
    async fn record_step_result(
        &self,
        id: ExecutionId,
        step_name: &str,
        result: StepResult,
    ) -> Result<(), ExecutionStoreError> {
        let result_json = serde_json::to_value(&result).map_err(|e| {
            ExecutionStoreError::ConnectionError {
                message: e.to_string(),
            }
        })?;
        sqlx::query(
            r#"
            UPDATE docidx.pipeline_executions
            SET step_results = jsonb_set(step_results, ARRAY[$2], $3, true)
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(step_name)
        .bind(&result_json)
        .execute(&self.pool)
        .await
        .map_err(map_execution_err)?;
        Ok(())
    }

    #[instrument(skip(self, error_details))]
    async fn complete(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        completed_at: DateTime<Utc>,
        error_details: Option<String>,
    ) -> Result<(), ExecutionStoreError> {
        sqlx::query(
            r#"
            UPDATE docidx.pipeline_executions
            SET status = $2, completed_at = $3, error_details = $4
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(execution_status_str(status))
        .bind(completed_at)
        .bind(error_details)
        .execute(&self.pool)
        .await
        .map_err(map_execution_err)?;
        Ok(())
    }
}

/// Loads the registered ruleset configuration. Rulesets are stored as a
/// single JSON document (matching the `rulesets:` config section in §6)
/// rather than a table, since they are operator-managed config, not
/// runtime-written state.
#[instrument(skip(pool))]
pub async fn load_rulesets_config(
    pool: &PgPool,
) -> Result<BTreeMap<String, serde_json::Value>, sqlx::Error> {
    let row = sqlx::query("SELECT value FROM docidx.config WHERE key = 'rulesets'")
        .fetch_optional(pool)
        .await?;
    match row {
        Some(r) => {
            let value: serde_json::Value = r.get("value");
            Ok(value
                .as_object()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default())
        }
        None => Ok(BTreeMap::new()),
    }
}

pub struct PostgresSummaryStore {
    pool: PgPool,
}

impl PostgresSummaryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_summary_err(e: sqlx::Error) -> SummaryStoreError {
    SummaryStoreError::ConnectionError {
        message: e.to_string(),
    }
}

impl SummaryStore for PostgresSummaryStore {
    #[instrument(skip(self, summary), fields(document_id = %summary.document_id))]
    async fn upsert(&self, summary: &Summary) -> Result<(), SummaryStoreError> {
        let key_points = serde_json::to_value(&summary.key_points).map_err(|e| {
            SummaryStoreError::ConnectionError {
                message: e.to_string(),
            }
        })?;
        let topics = serde_json::to_value(&summary.topics).map_err(|e| {
            SummaryStoreError::ConnectionError {
                message: e.to_string(),
            }
        })?;
        let tags = serde_json::to_value(&summary.tags).map_err(|e| {
            SummaryStoreError::ConnectionError {
                message: e.to_string(),
            }
        })?;
        sqlx::query(
            r#"
            INSERT INTO docidx.summaries
                (document_id, document_uuid, executive_summary, key_points, topics, tags,
                 suggested_status, confidence, model, provider, tokens_used, content_hash,
                 content_length, generated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (document_id)
            DO UPDATE SET
                executive_summary = EXCLUDED.executive_summary,
                key_points = EXCLUDED.key_points,
                topics = EXCLUDED.topics,
                tags = EXCLUDED.tags,
                suggested_status = EXCLUDED.suggested_status,
                confidence = EXCLUDED.confidence,
                model = EXCLUDED.model,
                provider = EXCLUDED.provider,
                tokens_used = EXCLUDED.tokens_used,
                content_hash = EXCLUDED.content_hash,
                content_length = EXCLUDED.content_length,
                generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(&summary.document_id)
        .bind(summary.document_uuid)
        .bind(&summary.executive_summary)
        .bind(&key_points)
        .bind(&topics)
        .bind(&tags)
        .bind(&summary.suggested_status)
        .bind(summary.confidence)
        .bind(&summary.model)
        .bind(&summary.provider)
        .bind(summary.tokens_used)
        .bind(summary.content_hash.as_str())
        .bind(summary.content_length)
        .bind(summary.generated_at)
        .execute(&self.pool)
        .await
        .map_err(map_summary_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn content_hash_for_document(
        &self,
        document_id: &str,
    ) -> Result<Option<String>, SummaryStoreError> {
        let row = sqlx::query("SELECT content_hash FROM docidx.summaries WHERE document_id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_summary_err)?;
        Ok(row.map(|r| r.get::<String, _>("content_hash")))
    }

    #[instrument(skip(self))]
    async fn delete_for_document(&self, document_id: &str) -> Result<u64, SummaryStoreError> {
        let result = sqlx::query("DELETE FROM docidx.summaries WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(map_summary_err)?;
        Ok(result.rows_affected())
    }
}
