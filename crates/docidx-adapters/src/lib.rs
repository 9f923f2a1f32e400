//! docidx Adapter Implementations
//!
//! Concrete I/O adapters for the ports defined in `docidx-ports`:
//! - Postgres-backed `OutboxStore` / `ExecutionStore`
//! - Postgres + pgvector `VectorStore`
//! - Tantivy `KeywordIndex`
//! - NATS JetStream `LogTransport`
//! - HTTP `EmbeddingProvider` / `SummaryProvider` (OpenAI/Bedrock/Ollama)
//! - The Ruleset Matcher
//! - The hybrid Search Engine

pub mod matcher;
pub mod nats;
pub mod postgres;
pub mod providers;
pub mod search_engine;
pub mod tantivy_index;
pub mod vector_store;

pub use matcher::{MatcherError, RulesetMatcher};
pub use nats::{subject_for_event, NatsConfig, NatsLogTransport};
pub use postgres::{
    load_rulesets_config, PostgresExecutionStore, PostgresOutboxStore, PostgresSummaryStore,
};
pub use providers::{AnyEmbeddingProvider, BedrockProvider, DailyBudget, OllamaProvider, OpenAiProvider};
pub use search_engine::{SearchEngine, SearchEngineError, SearchFilters, SearchService, DEFAULT_MIN_SIMILARITY};
pub use tantivy_index::TantivyKeywordIndex;
pub use vector_store::{cosine_similarity, ivfflat_lists_for_row_estimate, PgVectorStore};
