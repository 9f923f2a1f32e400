//! Consumer core (§4.4): decode, reconstruct, match, execute.
//!
//! The binary in `main.rs` wires concrete adapters and drives the poll
//! loop; this module holds the per-batch/per-record logic so it can be
//! exercised without a running NATS/Postgres pair.

pub mod config;

use std::collections::BTreeMap;

use docidx_adapters::RulesetMatcher;
use docidx_domain::{ContentHash, DocumentRevision, EventEnvelope, RevisionId, Ruleset};
use docidx_pipeline::{PipelineExecutor, StepInput};
use docidx_ports::{Clock, ExecutionStore, LogRecord, LogTransport, LogTransportError};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

pub use config::ConsumerConfig;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("log transport error: {0}")]
    Transport(#[from] LogTransportError),
}

/// The revision fields carried in `payload.revision` (§4.4 step 4) beyond
/// what the envelope itself already carries (document_uuid, document_id,
/// provider_type, content_hash, timestamp).
#[derive(Debug, Clone, Default, Deserialize)]
struct RevisionSnapshot {
    /// Revision id assigned by the producing service; falls back to the
    /// outbox entry id when absent, since this value only keys the
    /// search index entry and carries no uniqueness invariant here.
    #[serde(default)]
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    doc_number: Option<String>,
    #[serde(default)]
    doc_type: String,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    owners: Vec<String>,
    #[serde(default)]
    contributors: Vec<String>,
    #[serde(default)]
    approvers: Vec<String>,
    #[serde(default)]
    custom_fields: BTreeMap<String, String>,
}

/// The full reconstructable shape of `EventEnvelope::payload` (§4.4 steps
/// 4-5): a revision snapshot plus the free-form metadata map conditions
/// are matched against.
#[derive(Debug, Clone, Default, Deserialize)]
struct RevisionPayload {
    #[serde(default)]
    revision: RevisionSnapshot,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Ruleset config entry as stored under `docidx.config['rulesets']`: the
/// map key is the ruleset name, the value is its conditions/pipeline/config.
#[derive(Debug, Clone, Deserialize)]
struct RulesetConfigEntry {
    #[serde(default)]
    conditions: BTreeMap<String, String>,
    #[serde(default)]
    pipeline: Vec<String>,
    #[serde(default)]
    config: BTreeMap<String, serde_json::Value>,
}

/// Parses the registered ruleset config into the ordered `Ruleset` list
/// the Matcher consumes. A malformed entry is logged and skipped rather
/// than failing startup, since one operator typo shouldn't take down
/// indexing for every other ruleset.
pub fn parse_rulesets(raw: BTreeMap<String, serde_json::Value>) -> Vec<Ruleset> {
    raw.into_iter()
        .filter_map(|(name, value)| match serde_json::from_value::<RulesetConfigEntry>(value) {
            Ok(entry) => Some(Ruleset {
                name,
                conditions: entry.conditions,
                pipeline: entry.pipeline,
                config: entry.config,
            }),
            Err(err) => {
                warn!(ruleset = %name, error = %err, "failed to parse ruleset config entry, skipping");
                None
            }
        })
        .collect()
}

fn build_step_input(envelope: &EventEnvelope, payload: &RevisionPayload, revision_id: RevisionId) -> StepInput {
    StepInput {
        revision_id,
        document_uuid: envelope.document_uuid,
        document_id: envelope.document_id.clone(),
        title: payload.revision.title.clone(),
        status: payload.revision.status.clone(),
        content: payload.revision.content.clone(),
        doc_number: payload.revision.doc_number.clone(),
        doc_type: payload.revision.doc_type.clone(),
        product: payload.revision.product.clone(),
        owners: payload.revision.owners.clone(),
        contributors: payload.revision.contributors.clone(),
        approvers: payload.revision.approvers.clone(),
        custom_fields: payload.revision.custom_fields.clone(),
        event_type: envelope.event_type,
        metadata: payload.metadata.clone(),
    }
}

/// Processes one polled record (§4.4 steps 1-7). Never returns an error:
/// a malformed envelope, an unmatched ruleset set, or a pipeline step
/// failure are all handled by logging, and the caller commits the offset
/// regardless (§4.4 step 7's logs-and-commits design).
async fn process_record<S, C>(record: &LogRecord, matcher: &RulesetMatcher, executor: &PipelineExecutor<S, C>)
where
    S: ExecutionStore,
    C: Clock,
{
    let envelope: EventEnvelope = match serde_json::from_slice(&record.value) {
        Ok(e) => e,
        Err(err) => {
            warn!(error = %err, "malformed event envelope, skipping (fail-soft)");
            return;
        }
    };

    let payload: RevisionPayload = serde_json::from_value(envelope.payload.clone()).unwrap_or_default();
    let revision_id = RevisionId(if payload.revision.id != 0 {
        payload.revision.id
    } else {
        envelope.id.0
    });

    let revision = DocumentRevision {
        id: revision_id,
        document_uuid: envelope.document_uuid,
        document_id: envelope.document_id.clone(),
        provider_type: envelope.provider_type.clone(),
        content_hash: ContentHash::new(envelope.content_hash.as_str().to_string()),
        modified_time: envelope.timestamp,
        title: payload.revision.title.clone(),
        status: payload.revision.status.clone(),
    };

    let fields = RulesetMatcher::build_fields(&revision, &payload.metadata);
    let matched = matcher.match_rulesets(&fields);
    if matched.is_empty() {
        debug!(document_id = %envelope.document_id, "no ruleset matched revision");
        return;
    }

    let input = build_step_input(&envelope, &payload, revision_id);
    let errors = executor.execute_multiple(&input, envelope.id, &matched).await;
    for err in errors {
        error!(
            document_id = %envelope.document_id,
            error = %err,
            "pipeline execution error, offset still committed"
        );
    }
}

/// Polls one batch, processes every record, then commits the whole
/// batch's offsets. Returns the number of records processed; 0 means the
/// caller should back off until the next poll tick.
pub async fn process_batch<L, S, C>(
    transport: &L,
    matcher: &RulesetMatcher,
    executor: &PipelineExecutor<S, C>,
    batch_size: usize,
) -> Result<usize, ConsumerError>
where
    L: LogTransport,
    S: ExecutionStore,
    C: Clock,
{
    let records = transport.poll(batch_size).await?;
    if records.is_empty() {
        return Ok(0);
    }
    for record in &records {
        process_record(record, matcher, executor).await;
    }
    transport.commit_records(&records).await?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rulesets_skips_malformed_entries_but_keeps_good_ones() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "good".to_string(),
            serde_json::json!({"conditions": {"document_type": "RFC"}, "pipeline": ["search_index"]}),
        );
        raw.insert("bad".to_string(), serde_json::json!("not an object"));
        let rulesets = parse_rulesets(raw);
        assert_eq!(rulesets.len(), 1);
        assert_eq!(rulesets[0].name, "good");
    }

    #[test]
    fn parse_rulesets_defaults_missing_fields() {
        let mut raw = BTreeMap::new();
        raw.insert("empty".to_string(), serde_json::json!({}));
        let rulesets = parse_rulesets(raw);
        assert_eq!(rulesets.len(), 1);
        assert!(rulesets[0].conditions.is_empty());
        assert!(rulesets[0].pipeline.is_empty());
    }
}
