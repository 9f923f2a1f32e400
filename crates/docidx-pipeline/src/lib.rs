//! Pipeline Executor and Pipeline Steps (§4.6, §4.7).
//!
//! The executor runs the ordered `pipeline` of a matched ruleset
//! sequentially, recording a per-step result and deriving the
//! execution-level status. Step execution happens inline on the
//! consumer's task — there is no per-step worker pool (§5).

pub mod executor;
pub mod steps;

pub use executor::{ExecutorError, PipelineExecutor, StepInput};
pub use steps::{PipelineStep, StepError};
pub use steps::embeddings::EmbeddingsStep;
pub use steps::llm_summary::LlmSummaryStep;
pub use steps::search_index::SearchIndexStep;
