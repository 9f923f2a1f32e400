//! LLM-generated document summary entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::ContentHash;

/// A structured summary produced by a completion provider. Idempotent on
/// `content_hash` — re-running the step for an unchanged revision is a
/// no-op (testable property 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub document_id: String,
    pub document_uuid: Option<Uuid>,
    pub executive_summary: String,
    pub key_points: Vec<String>,
    pub topics: Vec<String>,
    pub tags: Vec<String>,
    pub suggested_status: Option<String>,
    pub confidence: f32,
    pub model: String,
    pub provider: String,
    pub tokens_used: Option<i32>,
    pub content_hash: ContentHash,
    pub content_length: i32,
    pub generated_at: DateTime<Utc>,
}
