//! Ruleset data model and the pure condition-evaluation logic used by the
//! matcher. I/O concerns (warn-once-per-unknown-key logging) live in
//! `docidx-adapters`; this module only decides true/false.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A named rule: an ordered set of conditions gating an ordered pipeline
/// of step names, plus opaque per-step config. Invariant I9 (every step
/// name is a known step kind) is enforced at matcher-construction time by
/// the adapter, since only the adapter knows the registered step kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    pub conditions: BTreeMap<String, String>,
    pub pipeline: Vec<String>,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// The flattened set of fields a condition is evaluated against: revision
/// attributes (`document_type`, `status`, `provider_type`, `title`,
/// `owner_email`, `content_hash`) merged with the free-form `metadata` map
/// from the envelope payload. Revision fields win on key collision.
pub type MatchFields = BTreeMap<String, String>;

pub enum ConditionEval {
    Match,
    NoMatch,
    /// The base field name (suffix stripped) was not present in `fields`.
    UnknownKey(String),
}

/// Evaluates a single `key:value` condition against the flattened fields.
/// A `_contains` suffix performs substring match against the base field;
/// any other key is bare-field exact equality. A key (after suffix strip)
/// absent from `fields` evaluates to `UnknownKey`, which the caller must
/// treat as a failed condition (typos are a silent miss, not a silent
/// match).
pub fn evaluate_condition(key: &str, expected: &str, fields: &MatchFields) -> ConditionEval {
    if let Some(base) = key.strip_suffix("_contains") {
        return match fields.get(base) {
            Some(actual) if actual.contains(expected) => ConditionEval::Match,
            Some(_) => ConditionEval::NoMatch,
            None => ConditionEval::UnknownKey(base.to_string()),
        };
    }
    match fields.get(key) {
        Some(actual) if actual == expected => ConditionEval::Match,
        Some(_) => ConditionEval::NoMatch,
        None => ConditionEval::UnknownKey(key.to_string()),
    }
}

/// Result of matching one ruleset: whether every condition held, plus any
/// base keys referenced that were absent from `fields` (for warn-once
/// logging upstream).
pub struct RulesetEvalResult {
    pub matched: bool,
    pub unknown_keys: Vec<String>,
}

/// Evaluates all conditions of a ruleset against `fields`. An empty
/// condition map matches unconditionally. Conditions are evaluated in
/// declaration order (`BTreeMap` iterates by key, which is stable and
/// sufficient since evaluation order does not affect the result — every
/// condition must hold regardless of order).
pub fn ruleset_matches(ruleset: &Ruleset, fields: &MatchFields) -> RulesetEvalResult {
    let mut unknown_keys = Vec::new();
    let mut matched = true;
    for (key, expected) in &ruleset.conditions {
        match evaluate_condition(key, expected, fields) {
            ConditionEval::Match => {}
            ConditionEval::NoMatch => matched = false,
            ConditionEval::UnknownKey(base) => {
                matched = false;
                unknown_keys.push(base);
            }
        }
    }
    RulesetEvalResult {
        matched,
        unknown_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> MatchFields {
        let mut f = BTreeMap::new();
        f.insert("document_type".to_string(), "RFC".to_string());
        f.insert("title".to_string(), "Storage Migration Plan".to_string());
        f
    }

    #[test]
    fn empty_conditions_match_all() {
        let rs = Ruleset {
            name: "all".to_string(),
            conditions: BTreeMap::new(),
            pipeline: vec!["search_index".to_string()],
            config: BTreeMap::new(),
        };
        assert!(ruleset_matches(&rs, &fields()).matched);
    }

    #[test]
    fn bare_field_equality() {
        let mut conditions = BTreeMap::new();
        conditions.insert("document_type".to_string(), "RFC".to_string());
        let rs = Ruleset {
            name: "rfc".to_string(),
            conditions,
            pipeline: vec![],
            config: BTreeMap::new(),
        };
        assert!(ruleset_matches(&rs, &fields()).matched);
    }

    #[test]
    fn bare_field_mismatch_fails() {
        let mut conditions = BTreeMap::new();
        conditions.insert("document_type".to_string(), "PRD".to_string());
        let rs = Ruleset {
            name: "prd".to_string(),
            conditions,
            pipeline: vec![],
            config: BTreeMap::new(),
        };
        assert!(!ruleset_matches(&rs, &fields()).matched);
    }

    #[test]
    fn contains_suffix_substring_match() {
        let mut conditions = BTreeMap::new();
        conditions.insert("title_contains".to_string(), "Migration".to_string());
        let rs = Ruleset {
            name: "migration".to_string(),
            conditions,
            pipeline: vec![],
            config: BTreeMap::new(),
        };
        assert!(ruleset_matches(&rs, &fields()).matched);
    }

    #[test]
    fn unknown_key_is_silent_miss() {
        let mut conditions = BTreeMap::new();
        conditions.insert("documnet_type".to_string(), "RFC".to_string());
        let rs = Ruleset {
            name: "typo".to_string(),
            conditions,
            pipeline: vec![],
            config: BTreeMap::new(),
        };
        let result = ruleset_matches(&rs, &fields());
        assert!(!result.matched);
        assert_eq!(result.unknown_keys, vec!["documnet_type".to_string()]);
    }
}
