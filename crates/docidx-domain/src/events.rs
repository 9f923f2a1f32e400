//! The log envelope shape shared by Relay (producer) and Consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{ContentHash, IdempotentKey, OutboxId, RevisionEventType};

/// Schema version of the envelope, carried so deployed consumers can
/// evolve independently of producers (design note in spec §9).
pub const ENVELOPE_SCHEMA_VERSION: &str = "1.0";

/// Wire envelope published to the log, keyed by `document_uuid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: OutboxId,
    #[serde(rename = "documentUuid")]
    pub document_uuid: Uuid,
    #[serde(rename = "documentId")]
    pub document_id: String,
    #[serde(rename = "eventType")]
    pub event_type: RevisionEventType,
    #[serde(rename = "providerType")]
    pub provider_type: String,
    #[serde(rename = "contentHash")]
    pub content_hash: ContentHash,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

fn default_schema_version() -> String {
    ENVELOPE_SCHEMA_VERSION.to_string()
}

/// Record headers published alongside the envelope value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeHeaders {
    pub event_type: String,
    pub provider_type: String,
    pub idempotent_key: IdempotentKey,
}

impl EventEnvelope {
    /// The log transport record key: `document_uuid` serialized as text,
    /// which guarantees per-document ordering (spec §4.2).
    pub fn record_key(&self) -> String {
        self.document_uuid.to_string()
    }

    pub fn headers(&self, idempotent_key: IdempotentKey) -> EnvelopeHeaders {
        EnvelopeHeaders {
            event_type: self.event_type.wire_str().to_string(),
            provider_type: self.provider_type.clone(),
            idempotent_key,
        }
    }
}
