//! Ruleset Matcher (§4.5, §A.6): wraps the pure condition-evaluation
//! logic in `docidx_domain::ruleset` with the I/O-adjacent concerns the
//! domain crate may not own — executor-construction-time validation of
//! step names (I9) and warn-once-per-unknown-key logging.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use docidx_domain::ruleset::{ruleset_matches, MatchFields};
use docidx_domain::{DocumentRevision, Ruleset};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("ruleset {ruleset} references unknown step {step}")]
    UnknownStep { ruleset: String, step: String },
}

/// Evaluates an ordered list of rulesets against a revision + its
/// free-form metadata. Construction validates invariant I9 (every
/// pipeline step name is a registered step kind) so a misconfigured
/// ruleset fails the consumer/relay at startup rather than mid-stream.
pub struct RulesetMatcher {
    rulesets: Vec<Ruleset>,
    warned_keys: Mutex<HashSet<String>>,
}

impl RulesetMatcher {
    pub fn new(rulesets: Vec<Ruleset>, known_steps: &HashSet<String>) -> Result<Self, MatcherError> {
        for ruleset in &rulesets {
            for step in &ruleset.pipeline {
                if !known_steps.contains(step) {
                    return Err(MatcherError::UnknownStep {
                        ruleset: ruleset.name.clone(),
                        step: step.clone(),
                    });
                }
            }
        }
        Ok(Self {
            rulesets,
            warned_keys: Mutex::new(HashSet::new()),
        })
    }

    /// Builds the flattened match fields from a revision plus the
    /// event's free-form `metadata` map; revision fields win on key
    /// collision (§4.5).
    pub fn build_fields(
        revision: &DocumentRevision,
        metadata: &BTreeMap<String, String>,
    ) -> MatchFields {
        let mut fields = metadata.clone();
        fields.insert("provider_type".to_string(), revision.provider_type.clone());
        fields.insert("title".to_string(), revision.title.clone());
        fields.insert("status".to_string(), revision.status.clone());
        fields.insert(
            "content_hash".to_string(),
            revision.content_hash.as_str().to_string(),
        );
        fields
    }

    /// Evaluates every ruleset in declaration order, returning all
    /// matches (no first-match-wins short-circuit). Logs a warning the
    /// first time any unknown condition key is observed in this
    /// process's lifetime.
    pub fn match_rulesets(&self, fields: &MatchFields) -> Vec<&Ruleset> {
        let mut matched = Vec::new();
        for ruleset in &self.rulesets {
            let result = ruleset_matches(ruleset, fields);
            for key in &result.unknown_keys {
                self.warn_once(key, &ruleset.name);
            }
            if result.matched {
                matched.push(ruleset);
            }
        }
        matched
    }

    fn warn_once(&self, key: &str, ruleset_name: &str) {
        let mut warned = self.warned_keys.lock().unwrap();
        if warned.insert(key.to_string()) {
            warn!(
                condition_key = %key,
                ruleset = %ruleset_name,
                "ruleset condition references a field absent from revision/metadata; treating as silent miss"
            );
        }
    }

    pub fn rulesets(&self) -> &[Ruleset] {
        &self.rulesets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docidx_domain::{ContentHash, RevisionId};
    use uuid::Uuid;

    fn revision() -> DocumentRevision {
        DocumentRevision {
            id: RevisionId(10),
            document_uuid: Uuid::nil(),
            document_id: "doc-1".to_string(),
            provider_type: "confluence".to_string(),
            content_hash: ContentHash::new("a".repeat(64)),
            modified_time: Utc::now(),
            title: "Storage Migration Plan".to_string(),
            status: "active".to_string(),
        }
    }

    fn known_steps() -> HashSet<String> {
        ["search_index", "embeddings", "llm_summary"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn rejects_unknown_step_at_construction() {
        let rs = Ruleset {
            name: "bad".to_string(),
            conditions: BTreeMap::new(),
            pipeline: vec!["does_not_exist".to_string()],
            config: BTreeMap::new(),
        };
        let err = RulesetMatcher::new(vec![rs], &known_steps()).unwrap_err();
        assert!(matches!(err, MatcherError::UnknownStep { .. }));
    }

    #[test]
    fn multiple_rulesets_can_all_match_in_declaration_order() {
        let rs1 = Ruleset {
            name: "index".to_string(),
            conditions: BTreeMap::new(),
            pipeline: vec!["search_index".to_string()],
            config: BTreeMap::new(),
        };
        let rs2 = Ruleset {
            name: "enrich".to_string(),
            conditions: BTreeMap::new(),
            pipeline: vec!["embeddings".to_string(), "llm_summary".to_string()],
            config: BTreeMap::new(),
        };
        let matcher = RulesetMatcher::new(vec![rs1, rs2], &known_steps()).unwrap();
        let fields = RulesetMatcher::build_fields(&revision(), &BTreeMap::new());
        let matched = matcher.match_rulesets(&fields);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].name, "index");
        assert_eq!(matched[1].name, "enrich");
    }

    #[test]
    fn condition_on_metadata_field_is_honored() {
        let mut conditions = BTreeMap::new();
        conditions.insert("owner_email".to_string(), "a@example.com".to_string());
        let rs = Ruleset {
            name: "owner-rule".to_string(),
            conditions,
            pipeline: vec![],
            config: BTreeMap::new(),
        };
        let matcher = RulesetMatcher::new(vec![rs], &known_steps()).unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert("owner_email".to_string(), "a@example.com".to_string());
        let fields = RulesetMatcher::build_fields(&revision(), &metadata);
        assert_eq!(matcher.match_rulesets(&fields).len(), 1);
    }

    #[test]
    fn no_match_returns_empty() {
        let mut conditions = BTreeMap::new();
        conditions.insert("document_type".to_string(), "PRD".to_string());
        let rs = Ruleset {
            name: "rfc-only".to_string(),
            conditions,
            pipeline: vec![],
            config: BTreeMap::new(),
        };
        let matcher = RulesetMatcher::new(vec![rs], &known_steps()).unwrap();
        let fields = RulesetMatcher::build_fields(&revision(), &BTreeMap::new());
        assert!(matcher.match_rulesets(&fields).is_empty());
    }
}
