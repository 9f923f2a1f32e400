//! `llm_summary` step (§4.7): sends document content to a completion
//! provider and upserts the structured `Summary`. Idempotent on
//! `content_hash` — an unchanged revision skips the provider call.
//!
//! Open question resolved (spec §9): a `revision.deleted` event deletes
//! the stored summary rather than keeping it for historical reference,
//! matching the `embeddings` step's symmetric deletion behavior and the
//! `search_index` step's delete-by-id on the same event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use docidx_domain::{ContentHash, RevisionEventType, Summary};
use docidx_ports::{ProviderError, SummaryProvider, SummaryRequest, SummaryStore};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::executor::StepInput;
use crate::steps::{PipelineStep, StepError};

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

fn hex_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct LlmSummaryStep<P: SummaryProvider, S: SummaryStore> {
    provider: Arc<P>,
    summary_store: Arc<S>,
}

impl<P: SummaryProvider, S: SummaryStore> LlmSummaryStep<P, S> {
    pub fn new(provider: Arc<P>, summary_store: Arc<S>) -> Self {
        Self {
            provider,
            summary_store,
        }
    }
}

#[async_trait]
impl<P: SummaryProvider, S: SummaryStore> PipelineStep for LlmSummaryStep<P, S> {
    fn name(&self) -> &str {
        "llm_summary"
    }

    #[instrument(skip(self, input, _config), fields(document_id = %input.document_id))]
    async fn execute(&self, input: &StepInput, _config: &serde_json::Value) -> Result<(), StepError> {
        if input.event_type == RevisionEventType::Deleted {
            self.summary_store
                .delete_for_document(&input.document_id)
                .await
                .map_err(|e| StepError::Retryable {
                    message: e.to_string(),
                })?;
            return Ok(());
        }

        let content_hash = hex_sha256(&input.content);
        let existing = self
            .summary_store
            .content_hash_for_document(&input.document_id)
            .await
            .map_err(|e| StepError::Retryable {
                message: e.to_string(),
            })?;
        if existing.as_deref() == Some(content_hash.as_str()) {
            return Ok(());
        }

        let request = SummaryRequest {
            document_id: input.document_id.clone(),
            title: input.title.clone(),
            content: input.content.clone(),
        };
        let result = self.provider.summarize(request).await.map_err(to_step_error)?;

        let summary = Summary {
            id: 0,
            document_id: input.document_id.clone(),
            document_uuid: Some(input.document_uuid),
            executive_summary: result.executive_summary,
            key_points: result.key_points,
            topics: result.topics,
            tags: result.tags,
            suggested_status: result.suggested_status,
            confidence: result.confidence,
            model: self.provider.name().to_string(),
            provider: self.provider.name().to_string(),
            tokens_used: Some(result.tokens_used as i32),
            content_hash: ContentHash::new(content_hash),
            content_length: input.content.len() as i32,
            generated_at: Utc::now(),
        };
        self.summary_store
            .upsert(&summary)
            .await
            .map_err(|e| StepError::Retryable {
                message: e.to_string(),
            })
    }

    fn is_retryable(&self, error: &StepError) -> bool {
        matches!(error, StepError::Retryable { .. })
    }
}
