//! Hybrid search result shape and the pure score-fusion arithmetic behind
//! it (§4.9). Kept in the domain crate because the fusion law itself has
//! no I/O: given two already-retrieved score lists it is just arithmetic,
//! and testable property 8 / the worked example in §8 S7 exercise it in
//! isolation from Tantivy or the vector store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::search_document::SearchDocument;

/// A single search hit: the denormalized document plus whichever of the
/// keyword/semantic scores contributed to it. A document retrieved by
/// only one of the two searches carries `None` for the other (§4.9
/// "Semantics for missing documents").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub object_id: String,
    pub document: SearchDocument,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f32>,
}

/// The one result shape shared by keyword, semantic, and hybrid queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub total_hits: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
    pub facets: BTreeMap<String, BTreeMap<String, u64>>,
    pub query_time_ms: u64,
}

impl SearchResult {
    pub fn paginate(
        hits: Vec<SearchHit>,
        total_hits: u64,
        page: u32,
        per_page: u32,
        facets: BTreeMap<String, BTreeMap<String, u64>>,
        query_time_ms: u64,
    ) -> Self {
        let per_page = per_page.max(1);
        let total_pages = ((total_hits as f64 / per_page as f64).ceil() as u32).max(1);
        Self {
            hits,
            total_hits,
            page: page.max(1),
            per_page,
            total_pages,
            facets,
            query_time_ms,
        }
    }
}

/// Hybrid fusion weights (§4.9, §6 `search.hybrid_weights`). The default
/// `(0.4, 0.4, 0.2)` sums to 1 (testable property 8); overridden weights
/// are used as given — the score is linearly scaled into `[0,1]` by
/// construction of `normalize_to_unit_interval`, not by re-normalizing
/// the weights themselves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub keyword: f32,
    pub semantic: f32,
    pub both_boost: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            keyword: 0.4,
            semantic: 0.4,
            both_boost: 0.2,
        }
    }
}

/// One retrieved hit from a single-mode search, ahead of fusion: just an
/// identity key and a raw (un-normalized) score.
#[derive(Debug, Clone)]
pub struct ScoredId {
    pub object_id: String,
    pub score: f32,
}

/// Linearly rescales a score list into `[0,1]` by dividing every score by
/// the list's own maximum (§4.9 "normalizes each result list's scores to
/// [0,1] by linear rescaling"). An empty list or an all-zero list maps
/// every score to 0 rather than dividing by zero.
pub fn normalize_to_unit_interval(scores: &[ScoredId]) -> BTreeMap<String, f32> {
    let max = scores.iter().map(|s| s.score).fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return scores.iter().map(|s| (s.object_id.clone(), 0.0)).collect();
    }
    scores
        .iter()
        .map(|s| (s.object_id.clone(), s.score / max))
        .collect()
}

/// Fuses a normalized keyword list and a normalized semantic list into a
/// single ordered-by-score-descending set of `(object_id, fused_score,
/// keyword_score, semantic_score)` tuples, per §4.9's fusion law:
/// `S = w_k*score_kw + w_s*score_sem + w_b*1[in both]`. A document present
/// in only one list gets `0` for the other's contribution and never the
/// `both_boost` (§4.9 "Semantics for missing documents"), matching the
/// worked arithmetic in §8 S7.
pub fn fuse_scores(
    keyword_normalized: &BTreeMap<String, f32>,
    semantic_normalized: &BTreeMap<String, f32>,
    weights: HybridWeights,
) -> Vec<(String, f32, Option<f32>, Option<f32>)> {
    let mut ids: Vec<&String> = keyword_normalized.keys().chain(semantic_normalized.keys()).collect();
    ids.sort();
    ids.dedup();

    let mut fused: Vec<(String, f32, Option<f32>, Option<f32>)> = ids
        .into_iter()
        .map(|id| {
            let kw = keyword_normalized.get(id).copied();
            let sem = semantic_normalized.get(id).copied();
            let both = kw.is_some() && sem.is_some();
            let score = weights.keyword * kw.unwrap_or(0.0)
                + weights.semantic * sem.unwrap_or(0.0)
                + if both { weights.both_boost } else { 0.0 };
            (id.clone(), score, kw, sem)
        })
        .collect();

    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}
