//! Relay core (§4.2): polls pending outbox rows and publishes them to the
//! event log in `created_at` order, with retry/backoff and the
//! administrative `retry_failed`/`cleanup` operations.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use docidx_domain::{EventEnvelope, OutboxEntry, ENVELOPE_SCHEMA_VERSION};
use docidx_ports::{LogTransport, LogTransportError, OutboxStore, OutboxStoreError};
use thiserror::Error;
use tracing::warn;

pub use config::RelayConfig;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("outbox store error: {0}")]
    Outbox(#[from] OutboxStoreError),
    #[error("log transport error: {0}")]
    Transport(#[from] LogTransportError),
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct Relay<O: OutboxStore, L: LogTransport> {
    outbox_store: Arc<O>,
    transport: Arc<L>,
    publish_retries: u32,
}

impl<O: OutboxStore, L: LogTransport> Relay<O, L> {
    pub fn new(outbox_store: Arc<O>, transport: Arc<L>) -> Self {
        Self {
            outbox_store,
            transport,
            publish_retries: 10,
        }
    }

    pub fn with_publish_retries(mut self, publish_retries: u32) -> Self {
        self.publish_retries = publish_retries;
        self
    }

    /// One poll tick: fetches up to `batch_size` pending entries and
    /// publishes each. A failure publishing one entry does not abort the
    /// rest of the batch. Returns the number of entries processed.
    pub async fn run_once(&self, batch_size: usize) -> Result<usize, RelayError> {
        let pending = self.outbox_store.fetch_pending(batch_size).await?;
        for entry in &pending {
            if let Err(err) = self.publish(entry).await {
                warn!(outbox_id = entry.id.0, error = %err, "failed to publish outbox entry");
            }
        }
        Ok(pending.len())
    }

    /// Synchronous produce-with-ack, with capped exponential backoff
    /// (initial 100ms, cap 60s) across `publish_retries` attempts. On
    /// success the row is marked `published`; once retries are exhausted
    /// it is marked `failed` and left for `retry_failed` to pick up.
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), RelayError> {
        let envelope = EventEnvelope {
            id: entry.id,
            document_uuid: entry.document_uuid,
            document_id: entry.document_id.clone(),
            event_type: entry.event_type,
            provider_type: entry.provider_type.clone(),
            content_hash: entry.content_hash.clone(),
            payload: entry.payload.clone(),
            timestamp: Utc::now(),
            schema_version: ENVELOPE_SCHEMA_VERSION.to_string(),
        };
        let headers = envelope.headers(entry.idempotent_key.clone());
        let key = envelope.record_key();

        let mut delay = INITIAL_BACKOFF;
        let mut last_error = String::new();
        for attempt in 0..self.publish_retries.max(1) {
            match self.transport.produce_sync(&key, &envelope, &headers).await {
                Ok(()) => {
                    self.outbox_store.mark_published(entry.id, Utc::now()).await?;
                    return Ok(());
                }
                Err(err) => {
                    last_error = err.to_string();
                    if attempt + 1 < self.publish_retries {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }
        self.outbox_store.mark_failed(entry.id, &last_error).await?;
        Ok(())
    }

    /// Administrative: flips up to `limit` `failed` rows back to
    /// `pending` and republishes them immediately.
    pub async fn retry_failed(&self, limit: usize) -> Result<usize, RelayError> {
        let entries = self.outbox_store.retry_failed(limit).await?;
        for entry in &entries {
            if let Err(err) = self.publish(entry).await {
                warn!(outbox_id = entry.id.0, error = %err, "retry publish failed");
            }
        }
        Ok(entries.len())
    }

    /// Administrative: deletes `published` rows older than `older_than`.
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, RelayError> {
        Ok(self.outbox_store.cleanup(older_than).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docidx_domain::{ContentHash, IdempotentKey, OutboxId, OutboxStatus, RevisionEventType, RevisionId};
    use docidx_ports::LogRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn sample_entry(id: i64) -> OutboxEntry {
        OutboxEntry {
            id: OutboxId(id),
            revision_id: RevisionId(id),
            document_uuid: Uuid::nil(),
            document_id: "doc-1".to_string(),
            idempotent_key: IdempotentKey::new(&"a".repeat(64)),
            content_hash: ContentHash::new("a".repeat(64)),
            event_type: RevisionEventType::Created,
            provider_type: "confluence".to_string(),
            payload: serde_json::json!({}),
            status: OutboxStatus::Pending,
            published_at: None,
            publish_attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct FakeOutboxStore {
        pending: Mutex<Vec<OutboxEntry>>,
        published: Mutex<Vec<OutboxId>>,
        failed: Mutex<Vec<OutboxId>>,
    }

    impl OutboxStore for FakeOutboxStore {
        async fn append(&self, _entry: &OutboxEntry) -> Result<OutboxId, OutboxStoreError> {
            unimplemented!("not exercised by relay tests")
        }

        async fn fetch_pending(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
            let mut pending = self.pending.lock().unwrap();
            let take = batch_size.min(pending.len());
            Ok(pending.drain(0..take).collect())
        }

        async fn mark_published(&self, id: OutboxId, _published_at: DateTime<Utc>) -> Result<(), OutboxStoreError> {
            self.published.lock().unwrap().push(id);
            Ok(())
        }

        async fn mark_failed(&self, id: OutboxId, _error: &str) -> Result<(), OutboxStoreError> {
            self.failed.lock().unwrap().push(id);
            Ok(())
        }

        async fn retry_failed(&self, _limit: usize) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
            Ok(Vec::new())
        }

        async fn cleanup(&self, _older_than: DateTime<Utc>) -> Result<u64, OutboxStoreError> {
            Ok(0)
        }
    }

    struct AlwaysSucceedsTransport {
        produced: AtomicUsize,
    }

    impl LogTransport for AlwaysSucceedsTransport {
        async fn produce_sync(
            &self,
            _key: &str,
            _envelope: &EventEnvelope,
            _headers: &docidx_domain::EnvelopeHeaders,
        ) -> Result<(), LogTransportError> {
            self.produced.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn poll(&self, _max_records: usize) -> Result<Vec<LogRecord>, LogTransportError> {
            Ok(Vec::new())
        }

        async fn commit_records(&self, _records: &[LogRecord]) -> Result<(), LogTransportError> {
            Ok(())
        }
    }

    struct AlwaysFailsTransport;

    impl LogTransport for AlwaysFailsTransport {
        async fn produce_sync(
            &self,
            _key: &str,
            _envelope: &EventEnvelope,
            _headers: &docidx_domain::EnvelopeHeaders,
        ) -> Result<(), LogTransportError> {
            Err(LogTransportError::PublishError {
                message: "simulated outage".to_string(),
            })
        }

        async fn poll(&self, _max_records: usize) -> Result<Vec<LogRecord>, LogTransportError> {
            Ok(Vec::new())
        }

        async fn commit_records(&self, _records: &[LogRecord]) -> Result<(), LogTransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_once_publishes_pending_entries_in_order() {
        let outbox = Arc::new(FakeOutboxStore {
            pending: Mutex::new(vec![sample_entry(1), sample_entry(2)]),
            published: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        });
        let transport = Arc::new(AlwaysSucceedsTransport {
            produced: AtomicUsize::new(0),
        });
        let relay = Relay::new(outbox.clone(), transport.clone());

        let processed = relay.run_once(10).await.unwrap();

        assert_eq!(processed, 2);
        assert_eq!(transport.produced.load(Ordering::SeqCst), 2);
        assert_eq!(outbox.published.lock().unwrap().len(), 2);
        assert!(outbox.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_marks_failed_after_exhausting_retries() {
        let outbox = Arc::new(FakeOutboxStore {
            pending: Mutex::new(vec![sample_entry(1)]),
            published: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        });
        let transport = Arc::new(AlwaysFailsTransport);
        let relay = Relay::new(outbox.clone(), transport).with_publish_retries(2);

        relay.run_once(10).await.unwrap();

        assert!(outbox.published.lock().unwrap().is_empty());
        assert_eq!(outbox.failed.lock().unwrap(), vec![OutboxId(1)]);
    }
}
