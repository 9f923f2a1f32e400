//! Pipeline execution type, per-step results, and status derivation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{ExecutionId, OutboxId, RevisionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
}

/// Result of running a single pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepResult {
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One row per (outbox_id, ruleset_name) pair — the idempotency guard for
/// pipeline execution (invariant I4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: ExecutionId,
    pub revision_id: RevisionId,
    pub outbox_id: OutboxId,
    pub ruleset_name: String,
    pub pipeline_steps: Vec<String>,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub step_results: BTreeMap<String, StepResult>,
    pub error_details: Option<String>,
    pub attempt_number: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
}

/// Derives the execution-level status from the per-step results collected
/// so far, per invariant I5: `partial` iff at least one step succeeded and
/// at least one failed.
pub fn derive_execution_status(step_results: &BTreeMap<String, StepResult>) -> ExecutionStatus {
    if step_results.is_empty() {
        return ExecutionStatus::Failed;
    }
    let succeeded = step_results
        .values()
        .filter(|r| r.status == StepStatus::Success)
        .count();
    let failed = step_results
        .values()
        .filter(|r| r.status == StepStatus::Failed)
        .count();
    if failed == 0 {
        ExecutionStatus::Completed
    } else if succeeded == 0 {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: StepStatus) -> StepResult {
        StepResult {
            status,
            duration_ms: 1,
            error: None,
        }
    }

    #[test]
    fn all_success_is_completed() {
        let mut steps = BTreeMap::new();
        steps.insert("search_index".to_string(), result(StepStatus::Success));
        steps.insert("embeddings".to_string(), result(StepStatus::Success));
        assert_eq!(derive_execution_status(&steps), ExecutionStatus::Completed);
    }

    #[test]
    fn all_failed_is_failed() {
        let mut steps = BTreeMap::new();
        steps.insert("search_index".to_string(), result(StepStatus::Failed));
        assert_eq!(derive_execution_status(&steps), ExecutionStatus::Failed);
    }

    #[test]
    fn mixed_is_partial() {
        let mut steps = BTreeMap::new();
        steps.insert("embeddings".to_string(), result(StepStatus::Success));
        steps.insert("llm_summary".to_string(), result(StepStatus::Failed));
        assert_eq!(derive_execution_status(&steps), ExecutionStatus::Partial);
    }
}
