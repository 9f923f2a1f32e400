//! Deterministic audit trail produced by one harness scenario run: an
//! ordered list of entries plus a content hash over them, so a scenario's
//! transcript can be diffed byte-for-byte across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TranscriptEntryKind {
    /// A revision + outbox row landed as if written by the producer's
    /// own transaction.
    SeedOutboxEntry,
    /// The relay attempted to publish one outbox row to the event log.
    RelayPublishAttempt,
    RelayPublishSucceeded,
    RelayPublishFailed,
    /// Administrative relay operations.
    RelayRetryFailed,
    RelayCleanup,
    /// The consumer polled a batch of records from the log.
    ConsumerPollBatch,
    /// The matcher ran and zero or more rulesets matched a record.
    RulesetsMatched,
    /// A `PipelineExecution` row was created for one matched ruleset.
    PipelineExecutionCreated,
    /// A crash-replay race was observed: the uniqueness guard rejected a
    /// duplicate `(outbox_id, ruleset_name)` insert.
    PipelineExecutionSkippedDuplicate,
    /// One step of a pipeline ran to completion (success or failure).
    StepInvoked,
    /// A pipeline execution reached its terminal status.
    PipelineExecutionCompleted,
    InvariantCheck,
    HarnessStart,
    HarnessComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: TranscriptEntryKind,
    pub description: String,
    pub outbox_id: Option<i64>,
    pub execution_id: Option<i64>,
    pub ruleset_name: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

/// Ids produced over the course of one scenario run, surfaced for
/// post-run assertions and for the CLI's summary output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProducedIds {
    pub outbox_ids: Vec<i64>,
    pub execution_ids: Vec<i64>,
    pub retried_outbox_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessTranscript {
    pub transcript_id: String,
    pub version: u32,
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: TranscriptStatus,
    pub entries: Vec<TranscriptEntry>,
    pub produced_ids: ProducedIds,
    pub invariants_checked: Vec<InvariantCheck>,
    pub content_hash: Option<String>,
}

impl HarnessTranscript {
    pub fn new(scenario: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            transcript_id: uuid::Uuid::new_v4().to_string(),
            version: 1,
            scenario: scenario.to_string(),
            started_at,
            ended_at: None,
            status: TranscriptStatus::Running,
            entries: Vec::new(),
            produced_ids: ProducedIds::default(),
            invariants_checked: Vec::new(),
            content_hash: None,
        }
    }

    pub fn add_entry(
        &mut self,
        timestamp: DateTime<Utc>,
        kind: TranscriptEntryKind,
        description: impl Into<String>,
        outbox_id: Option<i64>,
        execution_id: Option<i64>,
        ruleset_name: Option<String>,
        error: Option<String>,
    ) {
        let sequence = self.entries.len() as u64;
        self.entries.push(TranscriptEntry {
            sequence,
            timestamp,
            kind,
            description: description.into(),
            outbox_id,
            execution_id,
            ruleset_name,
            error,
        });
    }

    pub fn check_invariant(&mut self, name: impl Into<String>, passed: bool, message: impl Into<String>) {
        self.invariants_checked.push(InvariantCheck {
            name: name.into(),
            passed,
            message: message.into(),
        });
    }

    pub fn all_invariants_passed(&self) -> bool {
        self.invariants_checked.iter().all(|c| c.passed)
    }

    pub fn failed_invariants(&self) -> Vec<&InvariantCheck> {
        self.invariants_checked.iter().filter(|c| !c.passed).collect()
    }

    pub fn mark_success(&mut self, ended_at: DateTime<Utc>) {
        self.ended_at = Some(ended_at);
        self.status = TranscriptStatus::Success;
        self.content_hash = Some(self.compute_hash());
    }

    pub fn mark_failed(&mut self, ended_at: DateTime<Utc>) {
        self.ended_at = Some(ended_at);
        self.status = TranscriptStatus::Failed;
        self.content_hash = Some(self.compute_hash());
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.transcript_id.as_bytes());
        hasher.update(self.started_at.to_rfc3339().as_bytes());
        for entry in &self.entries {
            hasher.update(entry.sequence.to_le_bytes());
            hasher.update(entry.timestamp.to_rfc3339().as_bytes());
            hasher.update(format!("{:?}", entry.kind).as_bytes());
            hasher.update(entry.description.as_bytes());
            if let Some(id) = entry.outbox_id {
                hasher.update(id.to_le_bytes());
            }
            if let Some(id) = entry.execution_id {
                hasher.update(id.to_le_bytes());
            }
        }
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
