//! Postgres + pgvector `VectorStore` (§A.8).
//!
//! Cosine-similarity kNN over `docidx.embeddings.vector`. Below the cold
//! threshold the adapter just issues the same `<=>` operator query
//! without a tuned `ivfflat.probes` setting — pgvector's planner picks a
//! sequential scan automatically when the ivfflat index estimates more
//! cost than a brute-force scan on a small table, so there is one query
//! path, not two.

use docidx_domain::Embedding;
use docidx_ports::{KnnHit, VectorStore, VectorStoreError};
use pgvector::Vector;
use sqlx::{PgPool, Row};
use tracing::instrument;

/// Row count below which `probe` tuning has no measurable effect;
/// informational only since pgvector's own planner makes the brute-force
/// vs. ivfflat decision.
pub const COLD_DATASET_ROW_THRESHOLD: u64 = 10_000;

pub struct PgVectorStore {
    pool: PgPool,
    /// `ivfflat.probes` set per-session before a kNN query; higher values
    /// trade latency for recall. Default matches a `lists = sqrt(rows)`
    /// index tuned for ~10 probes at moderate recall.
    pub probe: i32,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, probe: 10 }
    }

    pub fn with_probe(pool: PgPool, probe: i32) -> Self {
        Self { pool, probe }
    }
}

fn map_sqlx_err(e: sqlx::Error) -> VectorStoreError {
    VectorStoreError::ConnectionError {
        message: e.to_string(),
    }
}

impl VectorStore for PgVectorStore {
    #[instrument(skip(self, embedding), fields(document_id = %embedding.document_id, model = %embedding.model))]
    async fn upsert(&self, embedding: &Embedding) -> Result<(), VectorStoreError> {
        if embedding.vector.len() as i32 != embedding.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                expected: embedding.dimensions as usize,
                actual: embedding.vector.len(),
            });
        }
        let vector = Vector::from(embedding.vector.clone());
        sqlx::query(
            r#"
            INSERT INTO docidx.embeddings
                (document_id, document_uuid, revision_id, model, dimensions, vector,
                 content_hash, chunk_index, chunk_text, tokens_used, generated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (document_id, model, chunk_index)
            DO UPDATE SET
                vector = EXCLUDED.vector,
                content_hash = EXCLUDED.content_hash,
                chunk_text = EXCLUDED.chunk_text,
                tokens_used = EXCLUDED.tokens_used,
                generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(&embedding.document_id)
        .bind(embedding.document_uuid)
        .bind(embedding.revision_id.map(|r| r.0))
        .bind(&embedding.model)
        .bind(embedding.dimensions)
        .bind(vector)
        .bind(embedding.content_hash.as_str())
        .bind(embedding.chunk_index)
        .bind(&embedding.chunk_text)
        .bind(embedding.tokens_used)
        .bind(embedding.generated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn existing_content_hash(
        &self,
        document_id: &str,
        model: &str,
        chunk_index: i32,
    ) -> Result<Option<String>, VectorStoreError> {
        let row = sqlx::query(
            "SELECT content_hash FROM docidx.embeddings WHERE document_id = $1 AND model = $2 AND chunk_index = $3",
        )
        .bind(document_id)
        .bind(model)
        .bind(chunk_index)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(row.map(|r| r.get::<String, _>("content_hash")))
    }

    #[instrument(skip(self))]
    async fn delete_for_document(&self, document_uuid: uuid::Uuid) -> Result<u64, VectorStoreError> {
        let result = sqlx::query("DELETE FROM docidx.embeddings WHERE document_uuid = $1")
            .bind(document_uuid)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, vector))]
    async fn knn(
        &self,
        vector: &[f32],
        k: usize,
        model_filter: Option<&str>,
        min_similarity: f32,
    ) -> Result<Vec<KnnHit>, VectorStoreError> {
        sqlx::query(&format!("SET LOCAL ivfflat.probes = {}", self.probe.max(1)))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let query_vector = Vector::from(vector.to_vec());
        let rows = if let Some(model) = model_filter {
            sqlx::query(
                r#"
                SELECT document_id, 1 - (vector <=> $1) AS similarity
                FROM docidx.embeddings
                WHERE model = $2
                ORDER BY vector <=> $1
                LIMIT $3
                "#,
            )
            .bind(&query_vector)
            .bind(model)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?
        } else {
            sqlx::query(
                r#"
                SELECT document_id, 1 - (vector <=> $1) AS similarity
                FROM docidx.embeddings
                ORDER BY vector <=> $1
                LIMIT $2
                "#,
            )
            .bind(&query_vector)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?
        };

        Ok(rows
            .into_iter()
            .map(|row| KnnHit {
                document_id: row.get("document_id"),
                similarity: row.get::<f32, _>("similarity"),
            })
            .filter(|hit| hit.similarity >= min_similarity)
            .collect())
    }
}

/// Computes the `lists` parameter for an ivfflat index at migration-apply
/// time, per §A.8: `max(1, round(sqrt(row_estimate)))`.
pub fn ivfflat_lists_for_row_estimate(row_estimate: u64) -> u32 {
    ((row_estimate as f64).sqrt().round() as u32).max(1)
}

/// Pure helper exercised in unit tests without a database: cosine
/// similarity from two raw vectors, matching the `1 - cosine_distance`
/// definition in §4.8 and testable property 7.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
