//! Pipeline step contract (§4.6, §4.7): `name`, `execute`, `is_retryable`.

pub mod embeddings;
pub mod llm_summary;
pub mod search_index;

use async_trait::async_trait;
use thiserror::Error;

use crate::executor::StepInput;

#[derive(Debug, Error, Clone)]
pub enum StepError {
    /// Transient provider/transport failure, missing external dependency,
    /// or a 5xx/rate-limit from a remote service; retried in-step up to
    /// the attempt budget.
    #[error("retryable: {message}")]
    Retryable { message: String },

    /// Bad request, budget exceeded, or an invariant violation; the step
    /// is marked failed immediately.
    #[error("non-retryable: {message}")]
    NonRetryable { message: String },
}

/// One named step in a ruleset's pipeline. Registered explicitly at
/// executor construction; `is_retryable` is the step's own classification
/// of one of its errors, not a generic policy (§9 design notes).
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, input: &StepInput, config: &serde_json::Value) -> Result<(), StepError>;

    fn is_retryable(&self, error: &StepError) -> bool {
        matches!(error, StepError::Retryable { .. })
    }
}
