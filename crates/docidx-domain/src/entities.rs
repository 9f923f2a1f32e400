//! Core domain entities: documents, outbox entries, pipeline executions,
//! embeddings, summaries, search documents, and rulesets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotone revision identifier assigned by the producing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub i64);

/// Monotone outbox row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutboxId(pub i64);

/// Monotone pipeline execution row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub i64);

/// Content hash of a document revision: lowercase 64-hex SHA-256 digest,
/// no prefix (unlike `IdempotentKey`, which prefixes `sha256:`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hex_digest: impl Into<String>) -> Self {
        Self(hex_digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Idempotent key for an outbox entry: `sha256:<64-hex>` derived from
/// `(document_uuid, content_hash)`. See [`crate::outbox::compute_idempotent_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotentKey(String);

impl IdempotentKey {
    pub fn new(hex_digest: &str) -> Self {
        Self(format!("sha256:{hex_digest}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable snapshot of a document, identified by its content hash.
/// A change to the underlying document always produces a new revision,
/// never a mutation of an existing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRevision {
    pub id: RevisionId,
    pub document_uuid: Uuid,
    pub document_id: String,
    pub provider_type: String,
    pub content_hash: ContentHash,
    pub modified_time: DateTime<Utc>,
    pub title: String,
    pub status: String,
}

/// Event type attached to an outbox entry / log envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionEventType {
    #[serde(rename = "revision.created")]
    Created,
    #[serde(rename = "revision.updated")]
    Updated,
    #[serde(rename = "revision.deleted")]
    Deleted,
}

impl RevisionEventType {
    /// Wire representation used in the log envelope's `eventType` field,
    /// e.g. `revision.created`.
    pub fn wire_str(&self) -> &'static str {
        match self {
            RevisionEventType::Created => "revision.created",
            RevisionEventType::Updated => "revision.updated",
            RevisionEventType::Deleted => "revision.deleted",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "revision.created" => Some(RevisionEventType::Created),
            "revision.updated" => Some(RevisionEventType::Updated),
            "revision.deleted" => Some(RevisionEventType::Deleted),
            _ => None,
        }
    }
}
