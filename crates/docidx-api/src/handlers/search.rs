//! Keyword, semantic, and hybrid search endpoints (§4.9).

use axum::{
    extract::{Query, State},
    Json,
};
use docidx_adapters::SearchFilters;
use docidx_domain::{HybridWeights, SearchResult};
use serde::Deserialize;
use tracing::instrument;

use crate::handlers::ApiResult;
use crate::AppState;

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

/// Query parameters shared by all three modes; `owners` is a
/// comma-separated list realizing the "OR within a field" filter rule
/// (§4.9).
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub owners: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Semantic/hybrid only: overrides the default 0.5 similarity floor.
    #[serde(default)]
    pub min_similarity: Option<f32>,
    /// Hybrid only: per-query weight overrides (§6 `search.hybrid_weights`).
    #[serde(default)]
    pub weight_keyword: Option<f32>,
    #[serde(default)]
    pub weight_semantic: Option<f32>,
    #[serde(default)]
    pub weight_both: Option<f32>,
}

impl SearchQuery {
    fn filters(&self) -> SearchFilters {
        SearchFilters {
            doc_type: self.doc_type.clone(),
            product: self.product.clone(),
            status: self.status.clone(),
            owners: self
                .owners
                .as_deref()
                .map(|s| s.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect())
                .unwrap_or_default(),
        }
    }

    fn weight_override(&self) -> Option<HybridWeights> {
        if self.weight_keyword.is_none() && self.weight_semantic.is_none() && self.weight_both.is_none() {
            return None;
        }
        let defaults = HybridWeights::default();
        Some(HybridWeights {
            keyword: self.weight_keyword.unwrap_or(defaults.keyword),
            semantic: self.weight_semantic.unwrap_or(defaults.semantic),
            both_boost: self.weight_both.unwrap_or(defaults.both_boost),
        })
    }
}

/// `GET /api/v1/search/keyword`
#[instrument(skip(state))]
pub async fn keyword_search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> ApiResult<Json<SearchResult>> {
    let result = state
        .search
        .keyword_search(&query.q, &query.filters(), query.page, query.per_page)
        .await?;
    Ok(Json(result))
}

/// `GET /api/v1/search/semantic`
#[instrument(skip(state))]
pub async fn semantic_search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> ApiResult<Json<SearchResult>> {
    let result = state
        .search
        .semantic_search(&query.q, &query.filters(), query.page, query.per_page, query.min_similarity)
        .await?;
    Ok(Json(result))
}

/// `GET /api/v1/search/hybrid`
#[instrument(skip(state))]
pub async fn hybrid_search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> ApiResult<Json<SearchResult>> {
    let weights = query.weight_override();
    let result = state
        .search
        .hybrid_search(&query.q, &query.filters(), query.page, query.per_page, weights)
        .await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owners_query_param_splits_on_comma_and_trims() {
        let query = SearchQuery {
            q: "widget".to_string(),
            doc_type: None,
            product: None,
            status: None,
            owners: Some("alice, bob,,carol ".to_string()),
            page: 1,
            per_page: 20,
            min_similarity: None,
            weight_keyword: None,
            weight_semantic: None,
            weight_both: None,
        };
        assert_eq!(query.filters().owners, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn no_weight_params_means_no_override() {
        let query = SearchQuery {
            q: "widget".to_string(),
            doc_type: None,
            product: None,
            status: None,
            owners: None,
            page: 1,
            per_page: 20,
            min_similarity: None,
            weight_keyword: None,
            weight_semantic: None,
            weight_both: None,
        };
        assert!(query.weight_override().is_none());
    }

    #[test]
    fn partial_weight_override_fills_remaining_from_defaults() {
        let query = SearchQuery {
            q: "widget".to_string(),
            doc_type: None,
            product: None,
            status: None,
            owners: None,
            page: 1,
            per_page: 20,
            min_similarity: None,
            weight_keyword: Some(0.7),
            weight_semantic: None,
            weight_both: None,
        };
        let weights = query.weight_override().unwrap();
        assert!((weights.keyword - 0.7).abs() < 1e-6);
        assert!((weights.semantic - HybridWeights::default().semantic).abs() < 1e-6);
    }
}
