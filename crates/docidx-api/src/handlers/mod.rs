//! HTTP handlers for the search API: keyword/semantic/hybrid search,
//! outbox administration, and health/readiness.

pub mod admin;
pub mod error;
pub mod health;
pub mod search;

pub use error::{ApiError, ApiResult};
