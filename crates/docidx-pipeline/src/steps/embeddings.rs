//! `embeddings` step (§4.7): chunks document content, generates a dense
//! vector per chunk, and persists it keyed by `(document_id, model,
//! chunk_index)`. Idempotent via `content_hash` — a chunk whose stored
//! hash matches the current revision's skips the provider call entirely.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use docidx_domain::{ContentHash, Embedding, RevisionEventType};
use docidx_ports::{EmbeddingProvider, ProviderError, VectorStore};
use serde::Deserialize;
use tracing::instrument;

use crate::executor::StepInput;
use crate::steps::{PipelineStep, StepError};

pub const DEFAULT_CHUNK_SIZE: usize = 8_000;

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsStepConfig {
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for EmbeddingsStepConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

fn to_step_error(error: ProviderError) -> StepError {
    if error.is_retryable() {
        StepError::Retryable {
            message: error.to_string(),
        }
    } else {
        StepError::NonRetryable {
            message: error.to_string(),
        }
    }
}

/// Splits `text` into fixed-size character windows. Acceptable per §9
/// design notes ("fixed-size character windows with overlap is
/// acceptable"); this implementation uses no overlap since chunk
/// boundaries are not re-queried independently — each chunk's embedding
/// is deduplicated at kNN time by `document_uuid`, not by chunk content.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

pub struct EmbeddingsStep<P: EmbeddingProvider, V: VectorStore> {
    provider: Arc<P>,
    vector_store: Arc<V>,
    model: String,
    dimensions: usize,
}

impl<P: EmbeddingProvider, V: VectorStore> EmbeddingsStep<P, V> {
    pub fn new(provider: Arc<P>, vector_store: Arc<V>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            provider,
            vector_store,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl<P: EmbeddingProvider, V: VectorStore> PipelineStep for EmbeddingsStep<P, V> {
    fn name(&self) -> &str {
        "embeddings"
    }

    #[instrument(skip(self, input, config), fields(document_id = %input.document_id))]
    async fn execute(&self, input: &StepInput, config: &serde_json::Value) -> Result<(), StepError> {
        if input.event_type == RevisionEventType::Deleted {
            self.vector_store
                .delete_for_document(input.document_uuid)
                .await
                .map_err(|e| StepError::Retryable {
                    message: e.to_string(),
                })?;
            return Ok(());
        }

        let step_config: EmbeddingsStepConfig = if config.is_null() {
            EmbeddingsStepConfig::default()
        } else {
            serde_json::from_value(config.clone()).unwrap_or_default()
        };

        let hash_str = hex_sha256(&input.content);

        let chunks = chunk_text(&input.content, step_config.chunk_size);
        for (chunk_index, chunk) in chunks.iter().enumerate() {
            let chunk_index = chunk_index as i32;
            let existing = self
                .vector_store
                .existing_content_hash(&input.document_id, &self.model, chunk_index)
                .await
                .map_err(|e| StepError::Retryable {
                    message: e.to_string(),
                })?;
            if existing.as_deref() == Some(hash_str.as_str()) {
                continue;
            }

            let generated = self
                .provider
                .generate_embedding(chunk)
                .await
                .map_err(to_step_error)?;

            if generated.dimensions != self.dimensions {
                return Err(StepError::NonRetryable {
                    message: format!(
                        "provider returned {} dimensions, expected {}",
                        generated.dimensions, self.dimensions
                    ),
                });
            }

            let embedding = Embedding {
                id: 0,
                document_id: input.document_id.clone(),
                document_uuid: Some(input.document_uuid),
                revision_id: Some(input.revision_id),
                model: self.model.clone(),
                dimensions: generated.dimensions as i32,
                vector: generated.vector,
                content_hash: ContentHash::new(hash_str.clone()),
                chunk_index,
                chunk_text: Some(chunk.clone()),
                tokens_used: Some(generated.tokens_used as i32),
                generated_at: Utc::now(),
            };
            embedding
                .validate()
                .map_err(|e| StepError::NonRetryable {
                    message: e.to_string(),
                })?;
            self.vector_store
                .upsert(&embedding)
                .await
                .map_err(|e| StepError::Retryable {
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn is_retryable(&self, error: &StepError) -> bool {
        matches!(error, StepError::Retryable { .. })
    }
}

fn hex_sha256(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_text_splits_by_fixed_size() {
        let text = "a".repeat(20);
        let chunks = chunk_text(&text, 8);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 8);
        assert_eq!(chunks[2].len(), 4);
    }

    #[test]
    fn chunk_text_empty_input_yields_one_empty_chunk() {
        assert_eq!(chunk_text("", 8000), vec!["".to_string()]);
    }

    #[test]
    fn default_chunk_size_is_8000() {
        assert_eq!(DEFAULT_CHUNK_SIZE, 8_000);
    }
}
