//! Outbox entry type and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::entities::{ContentHash, IdempotentKey, OutboxId, RevisionEventType, RevisionId};
use crate::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

/// Row in the transactional outbox. Written once by the producing service
/// inside its own transaction; owned exclusively by the Relay afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub revision_id: RevisionId,
    pub document_uuid: Uuid,
    pub document_id: String,
    pub idempotent_key: IdempotentKey,
    pub content_hash: ContentHash,
    pub event_type: RevisionEventType,
    pub provider_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub publish_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Computes `idempotent_key = sha256("docidx:outbox:" || document_uuid || ":" || content_hash)`,
/// hex-encoded and prefixed `sha256:`. Deterministic: equal inputs always
/// produce equal keys (testable property 2).
pub fn compute_idempotent_key(document_uuid: &Uuid, content_hash: &ContentHash) -> IdempotentKey {
    let mut hasher = Sha256::new();
    hasher.update(b"docidx:outbox:");
    hasher.update(document_uuid.as_bytes());
    hasher.update(b":");
    hasher.update(content_hash.as_str().as_bytes());
    let digest = hasher.finalize();
    IdempotentKey::new(&hex::encode(digest))
}

#[derive(Debug, Clone, Copy)]
pub enum OutboxTransition {
    Publish,
    FailPublish,
    Retry,
}

/// Validates outbox status transitions per invariant I3: the only legal
/// transitions are pending→published, pending→failed, failed→pending.
pub struct OutboxStateMachine;

impl OutboxStateMachine {
    pub fn transition(
        current: OutboxStatus,
        event: OutboxTransition,
    ) -> Result<OutboxStatus, DomainError> {
        match (current, event) {
            (OutboxStatus::Pending, OutboxTransition::Publish) => Ok(OutboxStatus::Published),
            (OutboxStatus::Pending, OutboxTransition::FailPublish) => Ok(OutboxStatus::Failed),
            (OutboxStatus::Failed, OutboxTransition::Retry) => Ok(OutboxStatus::Pending),
            (state, transition) => Err(DomainError::InvalidTransition {
                current_state: format!("{state:?}"),
                attempted_transition: format!("{transition:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_key_is_deterministic() {
        let uuid = Uuid::nil();
        let hash = ContentHash::new("a".repeat(64));
        let k1 = compute_idempotent_key(&uuid, &hash);
        let k2 = compute_idempotent_key(&uuid, &hash);
        assert_eq!(k1, k2);
        assert!(k1.as_str().starts_with("sha256:"));
    }

    #[test]
    fn idempotent_key_changes_with_content_hash() {
        let uuid = Uuid::nil();
        let k1 = compute_idempotent_key(&uuid, &ContentHash::new("a".repeat(64)));
        let k2 = compute_idempotent_key(&uuid, &ContentHash::new("b".repeat(64)));
        assert_ne!(k1, k2);
    }

    #[test]
    fn pending_to_published_allowed() {
        let next =
            OutboxStateMachine::transition(OutboxStatus::Pending, OutboxTransition::Publish)
                .unwrap();
        assert_eq!(next, OutboxStatus::Published);
    }

    #[test]
    fn published_to_failed_rejected() {
        let err =
            OutboxStateMachine::transition(OutboxStatus::Published, OutboxTransition::FailPublish);
        assert!(err.is_err());
    }

    #[test]
    fn failed_to_pending_via_retry() {
        let next = OutboxStateMachine::transition(OutboxStatus::Failed, OutboxTransition::Retry)
            .unwrap();
        assert_eq!(next, OutboxStatus::Pending);
    }
}
