//! S1 basic path end to end: a revision matched by an unconditioned
//! ruleset runs the `search_index` step and lands in the keyword index,
//! against an in-memory Tantivy index (no Postgres/NATS required).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use docidx_adapters::{RulesetMatcher, TantivyKeywordIndex};
use docidx_domain::{
    object_id_for_revision, ContentHash, DocumentRevision, ExecutionId, ExecutionStatus, OutboxId,
    PipelineExecution, RevisionEventType, RevisionId, Ruleset, StepResult,
};
use docidx_pipeline::{PipelineExecutor, SearchIndexStep, StepInput};
use docidx_ports::{Clock, ExecutionStore, ExecutionStoreError};

struct FakeClock;
impl Clock for FakeClock {
    fn now(&self) -> chrono::DateTime<Utc> {
        Utc::now()
    }
}

struct NoopExecutionStore;
impl ExecutionStore for NoopExecutionStore {
    async fn exists_for_outbox(&self, _outbox_id: OutboxId, _ruleset_name: &str) -> Result<bool, ExecutionStoreError> {
        Ok(false)
    }

    async fn create(&self, _execution: &PipelineExecution) -> Result<ExecutionId, ExecutionStoreError> {
        Ok(ExecutionId(1))
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

/// Producer inserts revision {id=10, document_uuid=U, content_hash=H,
/// title="Doc"} + outbox. Rulesets = `[{name:"all", conditions:{},
/// pipeline:["search_index"]}]`; Matcher returns it; Executor runs;
/// step succeeds. Assert: execution completed, keyword index contains
/// the object_id derived from revision id 10.
#[tokio::test]
async fn s1_basic_path_lands_revision_in_keyword_index() {
    let revision = DocumentRevision {
        id: RevisionId(10),
        document_uuid: uuid::Uuid::new_v4(),
        document_id: "doc-10".to_string(),
        provider_type: "confluence".to_string(),
        content_hash: ContentHash::new("b".repeat(64)),
        modified_time: Utc::now(),
        title: "Doc".to_string(),
        status: "active".to_string(),
    };

    let all_docs = Ruleset {
        name: "all".to_string(),
        conditions: BTreeMap::new(),
        pipeline: vec!["search_index".to_string()],
        config: BTreeMap::new(),
    };
    let known_steps: HashSet<String> = ["search_index".to_string()].into_iter().collect();
    let matcher = RulesetMatcher::new(vec![all_docs], &known_steps).unwrap();

    let fields = RulesetMatcher::build_fields(&revision, &BTreeMap::new());
    let matched = matcher.match_rulesets(&fields);
    assert_eq!(matched.len(), 1, "the unconditioned ruleset must match every revision");

    let keyword_index = Arc::new(TantivyKeywordIndex::create_in_ram().unwrap());
    let executor = PipelineExecutor::new(
        Arc::new(NoopExecutionStore),
        Arc::new(FakeClock),
        vec![Arc::new(SearchIndexStep::new(keyword_index.clone()))],
    );

    let input = StepInput {
        revision_id: revision.id,
        document_uuid: revision.document_uuid,
        document_id: revision.document_id.clone(),
        title: revision.title.clone(),
        status: revision.status.clone(),
        content: "the body of the document".to_string(),
        doc_number: None,
        doc_type: "RFC".to_string(),
        product: None,
        owners: vec![],
        contributors: vec![],
        approvers: vec![],
        custom_fields: BTreeMap::new(),
        event_type: RevisionEventType::Created,
        metadata: BTreeMap::new(),
    };

    let errors = executor.execute_multiple(&input, OutboxId(1), &matched).await;
    assert!(errors.is_empty(), "search_index step should succeed against an in-memory index");

    let expected_object_id = object_id_for_revision(RevisionId(10));
    let indexed = keyword_index.get_by_doc_id(&revision.document_id).await.unwrap();
    let document = indexed.expect("revision 10 should be present in the keyword index");
    assert_eq!(document.object_id, expected_object_id);
    assert_eq!(document.title, "Doc");
}
