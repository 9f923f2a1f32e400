//! `search_index` step (§4.7): upserts the revision's denormalized
//! `SearchDocument` into the keyword index, or deletes it on a
//! `revision.deleted` event.

use std::sync::Arc;

use async_trait::async_trait;
use docidx_domain::{object_id_for_revision, RevisionEventType, SearchDocument};
use docidx_ports::{KeywordIndex, SearchIndexError};
use tracing::instrument;

use crate::executor::StepInput;
use crate::steps::{PipelineStep, StepError};

pub struct SearchIndexStep<K: KeywordIndex> {
    index: Arc<K>,
}

impl<K: KeywordIndex> SearchIndexStep<K> {
    pub fn new(index: Arc<K>) -> Self {
        Self { index }
    }
}

fn to_step_error(error: SearchIndexError) -> StepError {
    match error {
        SearchIndexError::QueryParseError { message } => StepError::NonRetryable { message },
        SearchIndexError::IndexError { message } => StepError::Retryable { message },
    }
}

pub fn search_document_for_input(input: &StepInput) -> SearchDocument {
    SearchDocument {
        object_id: object_id_for_revision(input.revision_id),
        doc_id: input.document_id.clone(),
        title: input.title.clone(),
        doc_number: input.doc_number.clone(),
        doc_type: input.doc_type.clone(),
        product: input.product.clone(),
        status: input.status.clone(),
        owners: input.owners.clone(),
        contributors: input.contributors.clone(),
        approvers: input.approvers.clone(),
        summary: None,
        content: input.content.clone(),
        created_time: None,
        modified_time: None,
        custom_fields: input.custom_fields.clone(),
    }
}

#[async_trait]
impl<K: KeywordIndex> PipelineStep for SearchIndexStep<K> {
    fn name(&self) -> &str {
        "search_index"
    }

    #[instrument(skip(self, input, _config), fields(document_id = %input.document_id))]
    async fn execute(&self, input: &StepInput, _config: &serde_json::Value) -> Result<(), StepError> {
        if input.event_type == RevisionEventType::Deleted {
            let object_id = object_id_for_revision(input.revision_id);
            return self.index.delete(&object_id).await.map_err(to_step_error);
        }
        let document = search_document_for_input(input);
        self.index.upsert(&document).await.map_err(to_step_error)
    }

    fn is_retryable(&self, error: &StepError) -> bool {
        matches!(error, StepError::Retryable { .. })
    }
}
