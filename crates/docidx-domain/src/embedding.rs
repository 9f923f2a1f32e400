//! Embedding vector entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{ContentHash, RevisionId};
use crate::errors::DomainError;

/// A chunk-level embedding vector for a document. Unique per
/// `(document_id, model, chunk_index)` (invariant I7); `len(vector)` must
/// equal `dimensions` (invariant I8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: i64,
    pub document_id: String,
    pub document_uuid: Option<Uuid>,
    pub revision_id: Option<RevisionId>,
    pub model: String,
    pub dimensions: i32,
    pub vector: Vec<f32>,
    pub content_hash: ContentHash,
    pub chunk_index: i32,
    pub chunk_text: Option<String>,
    pub tokens_used: Option<i32>,
    pub generated_at: DateTime<Utc>,
}

impl Embedding {
    /// Validates invariant I8 before the embedding is persisted.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.vector.len() as i32 != self.dimensions {
            return Err(DomainError::InvariantViolation {
                invariant: format!(
                    "I8: vector length {} does not match declared dimensions {}",
                    self.vector.len(),
                    self.dimensions
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(vector: Vec<f32>, dimensions: i32) -> Embedding {
        Embedding {
            id: 1,
            document_id: "doc-1".to_string(),
            document_uuid: None,
            revision_id: None,
            model: "text-embedding-3-small".to_string(),
            dimensions,
            vector,
            content_hash: ContentHash::new("a".repeat(64)),
            chunk_index: 0,
            chunk_text: None,
            tokens_used: None,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn matching_dimensions_validate() {
        assert!(sample(vec![0.0; 1536], 1536).validate().is_ok());
    }

    #[test]
    fn mismatched_dimensions_rejected() {
        assert!(sample(vec![0.0; 10], 1536).validate().is_err());
    }
}
