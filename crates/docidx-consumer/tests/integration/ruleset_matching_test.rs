//! S2/S4 matcher + executor scenarios end to end, against in-memory
//! fakes (no Postgres/NATS required).

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use docidx_adapters::RulesetMatcher;
use docidx_domain::{
    ExecutionId, ExecutionStatus, OutboxId, PipelineExecution, Ruleset, RevisionEventType,
    RevisionId, StepResult,
};
use docidx_ports::{Clock, ExecutionStore, ExecutionStoreError};
use docidx_pipeline::{PipelineExecutor, PipelineStep, StepError, StepInput};

struct FakeClock;
impl Clock for FakeClock {
    fn now(&self) -> chrono::DateTime<Utc> {
        Utc::now()
    }
}

struct FakeExecutionStore {
    seen: Mutex<HashSet<(i64, String)>>,
    next_id: AtomicU32,
}

impl FakeExecutionStore {
    fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            next_id: AtomicU32::new(1),
        }
    }
}

impl ExecutionStore for FakeExecutionStore {
    async fn exists_for_outbox(&self, outbox_id: OutboxId, ruleset_name: &str) -> Result<bool, ExecutionStoreError> {
        Ok(self.seen.lock().unwrap().contains(&(outbox_id.0, ruleset_name.to_string())))
    }

    async fn create(&self, execution: &PipelineExecution) -> Result<ExecutionId, ExecutionStoreError> {
        let key = (execution.outbox_id.0, execution.ruleset_name.clone());
        if !self.seen.lock().unwrap().insert(key) {
            return Err(ExecutionStoreError::Duplicate);
        }
        Ok(ExecutionId(self.next_id.fetch_add(1, Ordering::SeqCst) as i64))
    }

    async fn mark_running(&self, _id: ExecutionId, _started_at: chrono::DateTime<Utc>) -> Result<(), ExecutionStoreError> {
        Ok(())
    }

    async fn record_step_result(&self, _id: ExecutionId, _step_name: &str, _result: StepResult) -> Result<(), ExecutionStoreError> {
        Ok(())
    }

    async fn complete(
        &self,
        _id: ExecutionId,
        _status: ExecutionStatus,
        _completed_at: chrono::DateTime<Utc>,
        _error_details: Option<String>,
    ) -> Result<(), ExecutionStoreError> {
        Ok(())
    }
}

struct CountingStep {
    step_name: &'static str,
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl PipelineStep for CountingStep {
    fn name(&self) -> &str {
        self.step_name
    }

    async fn execute(&self, _input: &StepInput, _config: &serde_json::Value) -> Result<(), StepError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn sample_input() -> StepInput {
    StepInput {
        revision_id: RevisionId(10),
        document_uuid: uuid::Uuid::nil(),
        document_id: "doc-1".to_string(),
        title: "Doc".to_string(),
        status: "active".to_string(),
        content: "body".to_string(),
        doc_number: None,
        doc_type: "PRD".to_string(),
        product: None,
        owners: vec![],
        contributors: vec![],
        approvers: vec![],
        custom_fields: BTreeMap::new(),
        event_type: RevisionEventType::Created,
        metadata: BTreeMap::new(),
    }
}

/// Rulesets = `[{name:"rfc-only", conditions:{document_type:"RFC"}, ...}]`,
/// event carries `document_type:"PRD"`: zero matches, zero executions.
#[tokio::test]
async fn s2_no_match_skip_runs_zero_executions() {
    let mut conditions = BTreeMap::new();
    conditions.insert("doc_type".to_string(), "RFC".to_string());
    let rfc_only = Ruleset {
        name: "rfc-only".to_string(),
        conditions,
        pipeline: vec!["search_index".to_string()],
        config: BTreeMap::new(),
    };

    let known_steps: HashSet<String> = ["search_index".to_string()].into_iter().collect();
    let matcher = RulesetMatcher::new(vec![rfc_only], &known_steps).unwrap();

    let input = sample_input();
    let metadata = BTreeMap::new();
    let mut fields = metadata.clone();
    fields.insert("doc_type".to_string(), input.doc_type.clone());
    let matched = matcher.match_rulesets(&fields);
    assert!(matched.is_empty(), "PRD document must not match an RFC-only ruleset");

    let invocations = Arc::new(AtomicUsize::new(0));
    let executor = PipelineExecutor::new(
        Arc::new(FakeExecutionStore::new()),
        Arc::new(FakeClock),
        vec![Arc::new(CountingStep {
            step_name: "search_index",
            invocations: invocations.clone(),
        })],
    );
    let errors = executor.execute_multiple(&input, OutboxId(1), &matched).await;
    assert!(errors.is_empty());
    assert_eq!(invocations.load(Ordering::SeqCst), 0, "no ruleset matched, no step should run");
}

/// Two rulesets both match; pipelines `["search_index"]` and
/// `["embeddings","llm_summary"]`. Invocation counts: search_index=1,
/// embeddings=1, llm_summary=1; two PipelineExecution rows created.
#[tokio::test]
async fn s4_multi_match_runs_every_pipeline_once() {
    let all_docs = Ruleset {
        name: "all".to_string(),
        conditions: BTreeMap::new(),
        pipeline: vec!["search_index".to_string()],
        config: BTreeMap::new(),
    };
    let enrich = Ruleset {
        name: "enrich".to_string(),
        conditions: BTreeMap::new(),
        pipeline: vec!["embeddings".to_string(), "llm_summary".to_string()],
        config: BTreeMap::new(),
    };

    let known_steps: HashSet<String> = ["search_index", "embeddings", "llm_summary"]
        .into_iter()
        .map(String::from)
        .collect();
    let matcher = RulesetMatcher::new(vec![all_docs, enrich], &known_steps).unwrap();

    let input = sample_input();
    let fields = RulesetMatcher::build_fields(
        &docidx_domain::DocumentRevision {
            id: input.revision_id,
            document_uuid: input.document_uuid,
            document_id: input.document_id.clone(),
            provider_type: "confluence".to_string(),
            content_hash: docidx_domain::ContentHash::new("a".repeat(64)),
            modified_time: Utc::now(),
            title: input.title.clone(),
            status: input.status.clone(),
        },
        &input.metadata,
    );
    let matched = matcher.match_rulesets(&fields);
    assert_eq!(matched.len(), 2, "both unconditioned rulesets must match");

    let search_index_calls = Arc::new(AtomicUsize::new(0));
    let embeddings_calls = Arc::new(AtomicUsize::new(0));
    let llm_summary_calls = Arc::new(AtomicUsize::new(0));

    let executor = PipelineExecutor::new(
        Arc::new(FakeExecutionStore::new()),
        Arc::new(FakeClock),
        vec![
            Arc::new(CountingStep {
                step_name: "search_index",
                invocations: search_index_calls.clone(),
            }),
            Arc::new(CountingStep {
                step_name: "embeddings",
                invocations: embeddings_calls.clone(),
            }),
            Arc::new(CountingStep {
                step_name: "llm_summary",
                invocations: llm_summary_calls.clone(),
            }),
        ],
    );

    let errors = executor.execute_multiple(&input, OutboxId(42), &matched).await;
    assert!(errors.is_empty());
    assert_eq!(search_index_calls.load(Ordering::SeqCst), 1);
    assert_eq!(embeddings_calls.load(Ordering::SeqCst), 1);
    assert_eq!(llm_summary_calls.load(Ordering::SeqCst), 1);
}
