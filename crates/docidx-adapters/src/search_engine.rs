//! Hybrid search engine (§4.9): wires `KeywordIndex`, `VectorStore`, and
//! `EmbeddingProvider` behind the three query modes the API exposes,
//! applying the pure fusion law from `docidx_domain::search` to combine
//! keyword and semantic result lists.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use docidx_domain::{fuse_scores, normalize_to_unit_interval, HybridWeights, ScoredId, SearchHit, SearchResult};
use docidx_ports::{
    EmbeddingProvider, KeywordIndex, KeywordQuery, ProviderError, SearchIndexError, VectorStore, VectorStoreError,
};
use thiserror::Error;
use tracing::{instrument, warn};

/// Default minimum cosine similarity applied to semantic hits (§4.9).
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

/// How many candidates each side of a hybrid query retrieves before
/// fusion and pagination. Large enough that fusing rarely changes which
/// documents land on the requested page, without scanning the whole
/// index on every query.
const DEFAULT_CANDIDATE_POOL: usize = 100;

#[derive(Debug, Error)]
pub enum SearchEngineError {
    #[error("search index error: {0}")]
    Index(#[from] SearchIndexError),
    #[error("vector store error: {0}")]
    Vector(#[from] VectorStoreError),
    #[error("embedding provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("semantic search not available: no embedding provider configured")]
    SemanticSearchUnavailable,
}

/// Structured filters shared by all three query modes (§4.9: "Filters
/// combine with AND across fields and OR within a field" — the OR-within
/// a field is realized by `owners` being a list).
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub doc_type: Option<String>,
    pub product: Option<String>,
    pub status: Option<String>,
    pub owners: Vec<String>,
}

struct SemanticComponents<V, E> {
    vector_store: Arc<V>,
    embedding_provider: Arc<E>,
    embedding_model: String,
}

/// Serves keyword, semantic, and hybrid queries over one document corpus.
/// Generic over the concrete keyword index / vector store / embedding
/// provider so tests can swap in fakes without a database or HTTP calls.
pub struct SearchEngine<K, V, E> {
    keyword_index: Arc<K>,
    semantic: Option<SemanticComponents<V, E>>,
    weights: HybridWeights,
    candidate_pool: usize,
}

impl<K: KeywordIndex, V: VectorStore, E: EmbeddingProvider> SearchEngine<K, V, E> {
    /// Builds an engine with keyword search only; semantic/hybrid modes
    /// return `SemanticSearchUnavailable` until `with_semantic` is added.
    pub fn new(keyword_index: Arc<K>) -> Self {
        Self {
            keyword_index,
            semantic: None,
            weights: HybridWeights::default(),
            candidate_pool: DEFAULT_CANDIDATE_POOL,
        }
    }

    pub fn with_semantic(mut self, vector_store: Arc<V>, embedding_provider: Arc<E>, embedding_model: impl Into<String>) -> Self {
        self.semantic = Some(SemanticComponents {
            vector_store,
            embedding_provider,
            embedding_model: embedding_model.into(),
        });
        self
    }

    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_candidate_pool(mut self, candidate_pool: usize) -> Self {
        self.candidate_pool = candidate_pool.max(1);
        self
    }

    /// Full-text match with structured filters, pagination, and faceting
    /// (§4.9 "Keyword search").
    #[instrument(skip(self))]
    pub async fn keyword_search(
        &self,
        text: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
    ) -> Result<SearchResult, SearchEngineError> {
        let started = Instant::now();
        let results = self
            .keyword_index
            .search(&to_keyword_query(text, filters, page, per_page))
            .await?;

        let hits = results
            .hits
            .into_iter()
            .map(|h| SearchHit {
                object_id: h.object_id,
                document: h.document,
                score: h.score,
                keyword_score: Some(h.score),
                semantic_score: None,
            })
            .collect();

        Ok(SearchResult::paginate(
            hits,
            results.total_hits,
            page,
            per_page,
            results.facets,
            started.elapsed().as_millis() as u64,
        ))
    }

    /// Natural-language query embedded with the indexing model, matched
    /// via kNN, optionally post-filtered by structured fields (§4.9
    /// "Semantic search"). `min_similarity` defaults to 0.5.
    #[instrument(skip(self))]
    pub async fn semantic_search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
        min_similarity: Option<f32>,
    ) -> Result<SearchResult, SearchEngineError> {
        let started = Instant::now();
        let semantic = self.semantic.as_ref().ok_or(SearchEngineError::SemanticSearchUnavailable)?;

        let min_similarity = min_similarity.unwrap_or(DEFAULT_MIN_SIMILARITY);
        let embedding = semantic.embedding_provider.generate_embedding(query_text).await?;
        let knn_hits = semantic
            .vector_store
            .knn(&embedding.vector, self.candidate_pool, Some(&semantic.embedding_model), min_similarity)
            .await?;

        let mut hits = Vec::with_capacity(knn_hits.len());
        for hit in &knn_hits {
            let Some(document) = self.keyword_index.get_by_doc_id(&hit.document_id).await? else {
                continue;
            };
            if !matches_filters(&document, filters) {
                continue;
            }
            hits.push(SearchHit {
                object_id: document.object_id.clone(),
                document,
                score: hit.similarity,
                keyword_score: None,
                semantic_score: Some(hit.similarity),
            });
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let total_hits = hits.len() as u64;
        let page_hits = paginate_slice(hits, page, per_page);

        Ok(SearchResult::paginate(
            page_hits,
            total_hits,
            page,
            per_page,
            empty_facets(),
            started.elapsed().as_millis() as u64,
        ))
    }

    /// Runs keyword and semantic searches, normalizes each list to
    /// `[0,1]` by its own max, fuses with `weights`, de-duplicates by
    /// `object_id`, and paginates the fused, descending-score list
    /// (§4.9 "Hybrid search"). A semantic provider outage (or no
    /// semantic component configured at all) degrades to keyword-only
    /// with `semantic_weight = 0`, per §7's documented fallback, rather
    /// than failing the whole query.
    #[instrument(skip(self))]
    pub async fn hybrid_search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
        weights: Option<HybridWeights>,
    ) -> Result<SearchResult, SearchEngineError> {
        let started = Instant::now();
        let weights = weights.unwrap_or(self.weights);

        let keyword_results = self
            .keyword_index
            .search(&to_keyword_query(query_text, filters, 1, self.candidate_pool as u32))
            .await?;
        let keyword_scored: Vec<ScoredId> = keyword_results
            .hits
            .iter()
            .map(|h| ScoredId {
                object_id: h.object_id.clone(),
                score: h.score,
            })
            .collect();
        let keyword_docs: BTreeMap<String, docidx_domain::SearchDocument> = keyword_results
            .hits
            .into_iter()
            .map(|h| (h.object_id, h.document))
            .collect();

        let semantic_outcome = match self.semantic.as_ref() {
            Some(semantic) => Some(
                self.fetch_semantic_candidates(semantic, query_text, filters)
                    .await,
            ),
            None => None,
        };

        let (semantic_scored, semantic_docs, effective_weights) = match semantic_outcome {
            Some(Ok((scored, docs))) => (scored, docs, weights),
            Some(Err(err)) => {
                warn!(error = %err, "semantic search degraded, falling back to keyword-only");
                (Vec::new(), BTreeMap::new(), HybridWeights { semantic: 0.0, ..weights })
            }
            None => (Vec::new(), BTreeMap::new(), HybridWeights { semantic: 0.0, ..weights }),
        };

        let keyword_normalized = normalize_to_unit_interval(&keyword_scored);
        let semantic_normalized = normalize_to_unit_interval(&semantic_scored);
        let fused = fuse_scores(&keyword_normalized, &semantic_normalized, effective_weights);

        let mut hits = Vec::with_capacity(fused.len());
        for (object_id, score, keyword_score, semantic_score) in fused {
            let Some(document) = keyword_docs.get(&object_id).or_else(|| semantic_docs.get(&object_id)).cloned() else {
                continue;
            };
            hits.push(SearchHit {
                object_id,
                document,
                score,
                keyword_score,
                semantic_score,
            });
        }

        let total_hits = hits.len() as u64;
        let page_hits = paginate_slice(hits, page, per_page);

        Ok(SearchResult::paginate(
            page_hits,
            total_hits,
            page,
            per_page,
            keyword_results.facets,
            started.elapsed().as_millis() as u64,
        ))
    }

    async fn fetch_semantic_candidates(
        &self,
        semantic: &SemanticComponents<V, E>,
        query_text: &str,
        filters: &SearchFilters,
    ) -> Result<(Vec<ScoredId>, BTreeMap<String, docidx_domain::SearchDocument>), SearchEngineError> {
        let embedding = semantic.embedding_provider.generate_embedding(query_text).await?;
        let knn_hits = semantic
            .vector_store
            .knn(&embedding.vector, self.candidate_pool, Some(&semantic.embedding_model), DEFAULT_MIN_SIMILARITY)
            .await?;

        let mut scored = Vec::with_capacity(knn_hits.len());
        let mut docs = BTreeMap::new();
        for hit in &knn_hits {
            let Some(document) = self.keyword_index.get_by_doc_id(&hit.document_id).await? else {
                continue;
            };
            if !matches_filters(&document, filters) {
                continue;
            }
            scored.push(ScoredId {
                object_id: document.object_id.clone(),
                score: hit.similarity,
            });
            docs.insert(document.object_id.clone(), document);
        }
        Ok((scored, docs))
    }
}

/// Object-safe façade over `SearchEngine<K, V, E>` so the API binary can
/// hold one `Arc<dyn SearchService>` chosen at startup from whichever
/// embedding provider backend the deployment configures, rather than
/// monomorphizing the whole HTTP router per provider type.
#[async_trait::async_trait]
pub trait SearchService: Send + Sync {
    async fn keyword_search(
        &self,
        text: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
    ) -> Result<SearchResult, SearchEngineError>;

    async fn semantic_search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
        min_similarity: Option<f32>,
    ) -> Result<SearchResult, SearchEngineError>;

    async fn hybrid_search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
        weights: Option<HybridWeights>,
    ) -> Result<SearchResult, SearchEngineError>;
}

#[async_trait::async_trait]
impl<K: KeywordIndex, V: VectorStore, E: EmbeddingProvider> SearchService for SearchEngine<K, V, E> {
    async fn keyword_search(
        &self,
        text: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
    ) -> Result<SearchResult, SearchEngineError> {
        SearchEngine::keyword_search(self, text, filters, page, per_page).await
    }

    async fn semantic_search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
        min_similarity: Option<f32>,
    ) -> Result<SearchResult, SearchEngineError> {
        SearchEngine::semantic_search(self, query_text, filters, page, per_page, min_similarity).await
    }

    async fn hybrid_search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
        weights: Option<HybridWeights>,
    ) -> Result<SearchResult, SearchEngineError> {
        SearchEngine::hybrid_search(self, query_text, filters, page, per_page, weights).await
    }
}

fn to_keyword_query(text: &str, filters: &SearchFilters, page: u32, per_page: u32) -> KeywordQuery {
    KeywordQuery {
        text: text.to_string(),
        doc_type: filters.doc_type.clone(),
        product: filters.product.clone(),
        status: filters.status.clone(),
        owners: filters.owners.clone(),
        page,
        per_page,
    }
}

fn matches_filters(document: &docidx_domain::SearchDocument, filters: &SearchFilters) -> bool {
    if let Some(doc_type) = &filters.doc_type {
        if &document.doc_type != doc_type {
            return false;
        }
    }
    if let Some(product) = &filters.product {
        if document.product.as_deref() != Some(product.as_str()) {
            return false;
        }
    }
    if let Some(status) = &filters.status {
        if &document.status != status {
            return false;
        }
    }
    if !filters.owners.is_empty() && !filters.owners.iter().any(|o| document.owners.contains(o)) {
        return false;
    }
    true
}

fn paginate_slice(mut hits: Vec<SearchHit>, page: u32, per_page: u32) -> Vec<SearchHit> {
    let per_page = per_page.max(1) as usize;
    let page = page.max(1) as usize;
    let start = (page - 1) * per_page;
    if start >= hits.len() {
        return Vec::new();
    }
    let end = (start + per_page).min(hits.len());
    hits.drain(start..end).collect()
}

fn empty_facets() -> BTreeMap<String, BTreeMap<String, u64>> {
    ["doc_types", "products", "statuses", "owners"]
        .into_iter()
        .map(|k| (k.to_string(), BTreeMap::new()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docidx_domain::SearchDocument;
    use docidx_ports::{KeywordHit, KeywordResults, KnnHit, SearchIndexError};
    use std::sync::Mutex;

    struct FakeKeywordIndex {
        results: KeywordResults,
        by_doc_id: BTreeMap<String, SearchDocument>,
    }

    impl KeywordIndex for FakeKeywordIndex {
        async fn upsert(&self, _document: &SearchDocument) -> Result<(), SearchIndexError> {
            unimplemented!()
        }

        async fn delete(&self, _object_id: &str) -> Result<(), SearchIndexError> {
            unimplemented!()
        }

        async fn search(&self, _query: &KeywordQuery) -> Result<KeywordResults, SearchIndexError> {
            Ok(self.results.clone())
        }

        async fn get_by_doc_id(&self, document_id: &str) -> Result<Option<SearchDocument>, SearchIndexError> {
            Ok(self.by_doc_id.get(document_id).cloned())
        }
    }

    struct FakeVectorStore {
        hits: Vec<KnnHit>,
    }

    impl VectorStore for FakeVectorStore {
        async fn upsert(&self, _embedding: &docidx_domain::Embedding) -> Result<(), VectorStoreError> {
            unimplemented!()
        }

        async fn delete_for_document(&self, _document_uuid: uuid::Uuid) -> Result<u64, VectorStoreError> {
            unimplemented!()
        }

        async fn existing_content_hash(
            &self,
            _document_id: &str,
            _model: &str,
            _chunk_index: i32,
        ) -> Result<Option<String>, VectorStoreError> {
            unimplemented!()
        }

        async fn knn(
            &self,
            _vector: &[f32],
            _k: usize,
            _model_filter: Option<&str>,
            _min_similarity: f32,
        ) -> Result<Vec<KnnHit>, VectorStoreError> {
            Ok(self.hits.clone())
        }
    }

    struct FakeEmbeddingProvider {
        fail: bool,
        calls: Mutex<u32>,
    }

    impl EmbeddingProvider for FakeEmbeddingProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate_embedding(&self, _text: &str) -> Result<docidx_ports::EmbeddingResult, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(ProviderError::Transient {
                    message: "simulated outage".to_string(),
                });
            }
            Ok(docidx_ports::EmbeddingResult {
                vector: vec![0.1, 0.2, 0.3],
                dimensions: 3,
                tokens_used: 4,
            })
        }
    }

    fn doc(object_id: &str, doc_id: &str) -> SearchDocument {
        SearchDocument {
            object_id: object_id.to_string(),
            doc_id: doc_id.to_string(),
            title: format!("Document {doc_id}"),
            doc_type: "guide".to_string(),
            status: "published".to_string(),
            ..Default::default()
        }
    }

    fn keyword_hit(object_id: &str, doc_id: &str, score: f32) -> KeywordHit {
        KeywordHit {
            object_id: object_id.to_string(),
            score,
            document: doc(object_id, doc_id),
        }
    }

    /// §8 S7: keyword top-3 = [A:0.9, B:0.5, C:0.1], semantic top-3 =
    /// [B:0.95, D:0.8, A:0.4], default weights. Expected fused order:
    /// B, A, D, C.
    #[tokio::test]
    async fn s7_hybrid_search_matches_worked_example_order() {
        let keyword_results = KeywordResults {
            hits: vec![
                keyword_hit("doc:A", "A", 0.9),
                keyword_hit("doc:B", "B", 0.5),
                keyword_hit("doc:C", "C", 0.1),
            ],
            total_hits: 3,
            facets: BTreeMap::new(),
        };
        let mut by_doc_id = BTreeMap::new();
        by_doc_id.insert("A".to_string(), doc("doc:A", "A"));
        by_doc_id.insert("B".to_string(), doc("doc:B", "B"));
        by_doc_id.insert("C".to_string(), doc("doc:C", "C"));
        by_doc_id.insert("D".to_string(), doc("doc:D", "D"));

        let keyword_index = Arc::new(FakeKeywordIndex {
            results: keyword_results,
            by_doc_id,
        });
        let vector_store = Arc::new(FakeVectorStore {
            hits: vec![
                KnnHit { document_id: "B".to_string(), similarity: 0.95 },
                KnnHit { document_id: "D".to_string(), similarity: 0.8 },
                KnnHit { document_id: "A".to_string(), similarity: 0.4 },
            ],
        });
        let embedding_provider = Arc::new(FakeEmbeddingProvider { fail: false, calls: Mutex::new(0) });

        let engine = SearchEngine::new(keyword_index).with_semantic(vector_store, embedding_provider, "text-embedding-3-small");

        let result = engine.hybrid_search("widget", &SearchFilters::default(), 1, 10, None).await.unwrap();

        let order: Vec<&str> = result.hits.iter().map(|h| h.object_id.as_str()).collect();
        assert_eq!(order, vec!["doc:B", "doc:A", "doc:D", "doc:C"]);
        assert_eq!(result.total_hits, 4);
    }

    #[tokio::test]
    async fn hybrid_search_falls_back_to_keyword_only_on_provider_outage() {
        let keyword_results = KeywordResults {
            hits: vec![keyword_hit("doc:A", "A", 1.0)],
            total_hits: 1,
            facets: BTreeMap::new(),
        };
        let keyword_index = Arc::new(FakeKeywordIndex {
            results: keyword_results,
            by_doc_id: BTreeMap::new(),
        });
        let vector_store = Arc::new(FakeVectorStore { hits: Vec::new() });
        let embedding_provider = Arc::new(FakeEmbeddingProvider { fail: true, calls: Mutex::new(0) });

        let engine = SearchEngine::new(keyword_index).with_semantic(vector_store, embedding_provider, "text-embedding-3-small");

        let result = engine.hybrid_search("widget", &SearchFilters::default(), 1, 10, None).await.unwrap();

        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].object_id, "doc:A");
        assert!(result.hits[0].semantic_score.is_none());
    }

    #[tokio::test]
    async fn semantic_search_without_configured_provider_is_typed_error() {
        let keyword_index = Arc::new(FakeKeywordIndex {
            results: KeywordResults::default(),
            by_doc_id: BTreeMap::new(),
        });
        let engine: SearchEngine<FakeKeywordIndex, FakeVectorStore, FakeEmbeddingProvider> = SearchEngine::new(keyword_index);

        let err = engine
            .semantic_search("widget", &SearchFilters::default(), 1, 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchEngineError::SemanticSearchUnavailable));
    }
}
