//! HTTP-backed `EmbeddingProvider` / `SummaryProvider` adapters (§4.7, §A.7).
//!
//! Three provider shapes share one daily token/request budget tracker:
//! OpenAI (`/v1/embeddings`, `/v1/chat/completions`), a Bedrock-shaped
//! adapter (invoke-model JSON body), and an Ollama local adapter
//! (`/api/embeddings`, `/api/generate`). Budget accounting is
//! provider-agnostic so a typed "budget exceeded" error is returned the
//! same way regardless of which backend is selected.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use docidx_ports::{
    EmbeddingProvider, EmbeddingResult, ProviderError, SummaryProvider, SummaryRequest,
    SummaryResult,
};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::instrument;

/// Per-process daily usage counters for one provider, reset 24h after the
/// first call in the current window (§5: "no in-process global mutable
/// state other than the per-provider daily-usage counters").
pub struct DailyBudget {
    max_tokens: u64,
    max_requests: u64,
    state: Mutex<BudgetState>,
}

struct BudgetState {
    window_started_at: DateTime<Utc>,
    tokens_used: u64,
    requests_made: u64,
}

impl DailyBudget {
    pub fn new(max_tokens: u64, max_requests: u64) -> Self {
        Self {
            max_tokens,
            max_requests,
            state: Mutex::new(BudgetState {
                window_started_at: Utc::now(),
                tokens_used: 0,
                requests_made: 0,
            }),
        }
    }

    /// Checks and reserves budget for one call. Resets the window if 24h
    /// have elapsed since it started. Returns `Err(BudgetExceeded)` if the
    /// request would exceed either limit; the error is non-retryable for
    /// the remainder of the window (§4.7).
    async fn reserve(&self, estimated_tokens: u64) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        if Utc::now() - state.window_started_at > chrono::Duration::hours(24) {
            state.window_started_at = Utc::now();
            state.tokens_used = 0;
            state.requests_made = 0;
        }
        if state.requests_made + 1 > self.max_requests {
            return Err(ProviderError::BudgetExceeded {
                budget_type: "daily_requests".to_string(),
            });
        }
        if state.tokens_used + estimated_tokens > self.max_tokens {
            return Err(ProviderError::BudgetExceeded {
                budget_type: "daily_tokens".to_string(),
            });
        }
        state.requests_made += 1;
        state.tokens_used += estimated_tokens;
        Ok(())
    }
}

fn map_reqwest_err(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() || e.is_connect() {
        ProviderError::Transient {
            message: e.to_string(),
        }
    } else {
        ProviderError::Rejected {
            message: e.to_string(),
        }
    }
}

fn map_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited {
            retry_after_ms: 1_000,
        }
    } else if status.is_server_error() {
        ProviderError::Transient {
            message: format!("provider returned {status}: {body}"),
        }
    } else {
        ProviderError::Rejected {
            message: format!("provider returned {status}: {body}"),
        }
    }
}

// ---------------------------------------------------------------------
// OpenAI-shaped adapter
// ---------------------------------------------------------------------

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    chat_model: String,
    budget: Arc<DailyBudget>,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
        chat_model: impl Into<String>,
        budget: Arc<DailyBudget>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: embedding_model.into(),
            chat_model: chat_model.into(),
            budget,
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
    usage: OpenAiUsage,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, text), fields(model = %self.embedding_model))]
    async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResult, ProviderError> {
        let estimated_tokens = (text.len() / 4).max(1) as u64;
        self.budget.reserve(estimated_tokens).await?;

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.embedding_model,
                "input": text,
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Rejected {
                message: format!("failed to parse embedding response: {e}"),
            })?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Rejected {
                message: "empty embedding response".to_string(),
            })?
            .embedding;
        Ok(EmbeddingResult {
            dimensions: vector.len(),
            vector,
            tokens_used: parsed.usage.total_tokens,
        })
    }
}

impl SummaryProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, request), fields(document_id = %request.document_id))]
    async fn summarize(&self, request: SummaryRequest) -> Result<SummaryResult, ProviderError> {
        let estimated_tokens = (request.content.len() / 4).max(1) as u64;
        self.budget.reserve(estimated_tokens).await?;

        let prompt = summarization_prompt(&request);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.chat_model,
                "messages": [{"role": "user", "content": prompt}],
                "response_format": {"type": "json_object"},
            }))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Rejected {
                message: format!("failed to parse chat response: {e}"),
            })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Rejected {
                message: "empty chat response".to_string(),
            })?
            .message
            .content;
        let parsed_summary = parse_summary_response(&content)?;
        Ok(SummaryResult {
            tokens_used: parsed.usage.total_tokens,
            ..parsed_summary
        })
    }
}

/// Builds the structured prompt described in §4.7: request an executive
/// summary, key points, topics, tags, suggested status, and confidence.
fn summarization_prompt(request: &SummaryRequest) -> String {
    format!(
        "Summarize the following document titled \"{}\". Respond with a JSON \
         object with keys: executive_summary (string), key_points (array of \
         strings), topics (array of strings), tags (array of strings), \
         suggested_status (string or null), confidence (number 0-1).\n\n{}",
        request.title, request.content
    )
}

#[derive(Deserialize)]
struct PredictableSummaryFormat {
    executive_summary: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    suggested_status: Option<String>,
    #[serde(default)]
    confidence: f32,
}

/// Parses the predictable response format a completion provider returns
/// for the summarization prompt (§4.7). `tokens_used` is filled in by the
/// caller since it comes from the outer response envelope, not the body.
fn parse_summary_response(content: &str) -> Result<SummaryResult, ProviderError> {
    let parsed: PredictableSummaryFormat =
        serde_json::from_str(content).map_err(|e| ProviderError::Rejected {
            message: format!("summary response did not match expected format: {e}"),
        })?;
    Ok(SummaryResult {
        executive_summary: parsed.executive_summary,
        key_points: parsed.key_points,
        topics: parsed.topics,
        tags: parsed.tags,
        suggested_status: parsed.suggested_status,
        confidence: parsed.confidence.clamp(0.0, 1.0),
        tokens_used: 0,
    })
}

// ---------------------------------------------------------------------
// Bedrock-shaped adapter
// ---------------------------------------------------------------------

/// Mirrors the OpenAI adapter's shape against a Bedrock-style
/// invoke-model HTTP endpoint (a full AWS SigV4 client is out of scope
/// here; the adapter assumes a signed-request proxy or a runtime that
/// injects auth, matching how the teacher's other HTTP adapters accept a
/// pre-authenticated base URL).
pub struct BedrockProvider {
    client: Client,
    base_url: String,
    embedding_model: String,
    chat_model: String,
    auth_header: String,
    budget: Arc<DailyBudget>,
}

impl BedrockProvider {
    pub fn new(
        base_url: impl Into<String>,
        auth_header: impl Into<String>,
        embedding_model: impl Into<String>,
        chat_model: impl Into<String>,
        budget: Arc<DailyBudget>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            embedding_model: embedding_model.into(),
            chat_model: chat_model.into(),
            auth_header: auth_header.into(),
            budget,
        }
    }
}

#[derive(Deserialize)]
struct BedrockEmbeddingResponse {
    embedding: Vec<f32>,
    #[serde(rename = "inputTextTokenCount")]
    input_text_token_count: u32,
}

impl EmbeddingProvider for BedrockProvider {
    fn name(&self) -> &str {
        "bedrock"
    }

    #[instrument(skip(self, text), fields(model = %self.embedding_model))]
    async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResult, ProviderError> {
        let estimated_tokens = (text.len() / 4).max(1) as u64;
        self.budget.reserve(estimated_tokens).await?;

        let response = self
            .client
            .post(format!(
                "{}/model/{}/invoke",
                self.base_url, self.embedding_model
            ))
            .header("Authorization", &self.auth_header)
            .json(&serde_json::json!({ "inputText": text }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let parsed: BedrockEmbeddingResponse =
            response.json().await.map_err(|e| ProviderError::Rejected {
                message: format!("failed to parse bedrock response: {e}"),
            })?;
        Ok(EmbeddingResult {
            dimensions: parsed.embedding.len(),
            vector: parsed.embedding,
            tokens_used: parsed.input_text_token_count,
        })
    }
}

impl SummaryProvider for BedrockProvider {
    fn name(&self) -> &str {
        "bedrock"
    }

    #[instrument(skip(self, request), fields(document_id = %request.document_id))]
    async fn summarize(&self, request: SummaryRequest) -> Result<SummaryResult, ProviderError> {
        let estimated_tokens = (request.content.len() / 4).max(1) as u64;
        self.budget.reserve(estimated_tokens).await?;

        let prompt = summarization_prompt(&request);
        let response = self
            .client
            .post(format!("{}/model/{}/invoke", self.base_url, self.chat_model))
            .header("Authorization", &self.auth_header)
            .json(&serde_json::json!({ "prompt": prompt, "max_tokens": 1024 }))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        #[derive(Deserialize)]
        struct BedrockChatResponse {
            completion: String,
        }
        let parsed: BedrockChatResponse =
            response.json().await.map_err(|e| ProviderError::Rejected {
                message: format!("failed to parse bedrock chat response: {e}"),
            })?;
        parse_summary_response(&parsed.completion)
    }
}

// ---------------------------------------------------------------------
// Ollama local adapter
// ---------------------------------------------------------------------

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    embedding_model: String,
    chat_model: String,
    budget: Arc<DailyBudget>,
}

impl OllamaProvider {
    pub fn new(
        base_url: impl Into<String>,
        embedding_model: impl Into<String>,
        chat_model: impl Into<String>,
        budget: Arc<DailyBudget>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            embedding_model: embedding_model.into(),
            chat_model: chat_model.into(),
            budget,
        }
    }
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip(self, text), fields(model = %self.embedding_model))]
    async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResult, ProviderError> {
        let estimated_tokens = (text.len() / 4).max(1) as u64;
        self.budget.reserve(estimated_tokens).await?;

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&serde_json::json!({ "model": self.embedding_model, "prompt": text }))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let parsed: OllamaEmbeddingResponse =
            response.json().await.map_err(|e| ProviderError::Rejected {
                message: format!("failed to parse ollama response: {e}"),
            })?;
        Ok(EmbeddingResult {
            dimensions: parsed.embedding.len(),
            vector: parsed.embedding,
            // Ollama's embeddings endpoint does not report token usage.
            tokens_used: estimated_tokens as u32,
        })
    }
}

impl SummaryProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip(self, request), fields(document_id = %request.document_id))]
    async fn summarize(&self, request: SummaryRequest) -> Result<SummaryResult, ProviderError> {
        let estimated_tokens = (request.content.len() / 4).max(1) as u64;
        self.budget.reserve(estimated_tokens).await?;

        let prompt = summarization_prompt(&request);
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&serde_json::json!({
                "model": self.chat_model,
                "prompt": prompt,
                "stream": false,
                "format": "json",
            }))
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        #[derive(Deserialize)]
        struct OllamaGenerateResponse {
            response: String,
        }
        let parsed: OllamaGenerateResponse =
            response.json().await.map_err(|e| ProviderError::Rejected {
                message: format!("failed to parse ollama generate response: {e}"),
            })?;
        let mut result = parse_summary_response(&parsed.response)?;
        result.tokens_used = estimated_tokens as u32;
        Ok(result)
    }
}

// ---------------------------------------------------------------------
// Runtime-selected provider
// ---------------------------------------------------------------------

/// Wraps whichever provider backend was selected at startup so the API
/// service can hold one concrete `EmbeddingProvider` behind its
/// `SearchEngine` regardless of which backend a deployment configures
/// (the consumer binary instead monomorphizes per-branch since it builds
/// its step list once at startup; the API holds a long-lived search
/// engine shared across requests).
pub enum AnyEmbeddingProvider {
    OpenAi(OpenAiProvider),
    Bedrock(BedrockProvider),
    Ollama(OllamaProvider),
}

impl EmbeddingProvider for AnyEmbeddingProvider {
    fn name(&self) -> &str {
        match self {
            AnyEmbeddingProvider::OpenAi(p) => p.name(),
            AnyEmbeddingProvider::Bedrock(p) => p.name(),
            AnyEmbeddingProvider::Ollama(p) => p.name(),
        }
    }

    async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResult, ProviderError> {
        match self {
            AnyEmbeddingProvider::OpenAi(p) => p.generate_embedding(text).await,
            AnyEmbeddingProvider::Bedrock(p) => p.generate_embedding(text).await,
            AnyEmbeddingProvider::Ollama(p) => p.generate_embedding(text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budget_allows_calls_under_the_limit() {
        let budget = DailyBudget::new(1_000, 10);
        assert!(budget.reserve(100).await.is_ok());
        assert!(budget.reserve(100).await.is_ok());
    }

    #[tokio::test]
    async fn budget_rejects_calls_over_token_limit() {
        let budget = DailyBudget::new(100, 10);
        assert!(budget.reserve(50).await.is_ok());
        let err = budget.reserve(60).await.unwrap_err();
        assert!(matches!(err, ProviderError::BudgetExceeded { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn budget_rejects_calls_over_request_limit() {
        let budget = DailyBudget::new(1_000_000, 1);
        assert!(budget.reserve(1).await.is_ok());
        let err = budget.reserve(1).await.unwrap_err();
        assert!(matches!(err, ProviderError::BudgetExceeded { .. }));
    }

    #[test]
    fn parses_predictable_summary_format() {
        let body = r#"{"executive_summary":"A doc.","key_points":["a","b"],
            "topics":["storage"],"tags":["infra"],"suggested_status":"approved",
            "confidence":0.87}"#;
        let result = parse_summary_response(body).unwrap();
        assert_eq!(result.executive_summary, "A doc.");
        assert_eq!(result.key_points, vec!["a", "b"]);
        assert!((result.confidence - 0.87).abs() < 1e-6);
    }

    #[test]
    fn malformed_summary_response_is_rejected_not_retryable() {
        let err = parse_summary_response("not json").unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
        assert!(!err.is_retryable());
    }
}
