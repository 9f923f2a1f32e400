//! Denormalized view of a document indexed for keyword search.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchDocument {
    pub object_id: String,
    pub doc_id: String,
    pub title: String,
    pub doc_number: Option<String>,
    pub doc_type: String,
    pub product: Option<String>,
    pub status: String,
    pub owners: Vec<String>,
    pub contributors: Vec<String>,
    pub approvers: Vec<String>,
    pub summary: Option<String>,
    pub content: String,
    pub created_time: Option<DateTime<Utc>>,
    pub modified_time: Option<DateTime<Utc>>,
    pub custom_fields: BTreeMap<String, String>,
}

/// Derives the keyword index key from the document identifier, matching
/// the `object_id` convention S1 asserts on (`object_id` derived from the
/// revision id).
pub fn object_id_for_revision(revision_id: crate::entities::RevisionId) -> String {
    format!("doc:{}", revision_id.0)
}
