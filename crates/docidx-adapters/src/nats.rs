//! NATS JetStream `LogTransport` adapter (§4.3, §A.10).
//!
//! Realizes the partitioned, ordered-per-key log on top of JetStream: one
//! durable stream carrying all revision events, keyed by `document_uuid`
//! so per-document order is preserved, with a durable pull consumer per
//! consumer group and manual ack matching the spec's "commit only after
//! successful processing" contract.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_nats::jetstream::{
    self,
    consumer::{pull::Config as PullConsumerConfig, AckPolicy, DeliverPolicy},
    stream::Config as StreamConfig,
    Context as JetStreamContext,
};
use async_nats::Client as NatsClient;
use docidx_domain::{EnvelopeHeaders, EventEnvelope};
use docidx_ports::{LogRecord, LogTransport, LogTransportError};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

/// Connection and topology configuration, realizing the abstract
/// `brokers[]` / `sasl_*` / `enable_tls` schema in spec §6 on top of NATS.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Comma-joined server list (`log.brokers`).
    pub brokers: Vec<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub enable_tls: bool,
    /// JetStream stream name carrying all revision events.
    pub stream_name: String,
    /// Durable pull-consumer name (`log.consumer_group`).
    pub consumer_group: String,
    /// Subject prefix; per-event-type buckets are appended beneath it.
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["nats://localhost:4222".to_string()],
            sasl_username: None,
            sasl_password: None,
            enable_tls: false,
            stream_name: "docidx-events".to_string(),
            consumer_group: "docidx-consumer".to_string(),
            subject_prefix: "docidx.events".to_string(),
        }
    }
}

impl NatsConfig {
    pub fn from_env() -> Self {
        let brokers = std::env::var("DOCIDX_LOG_BROKERS")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            brokers,
            sasl_username: std::env::var("DOCIDX_LOG_SASL_USERNAME").ok(),
            sasl_password: std::env::var("DOCIDX_LOG_SASL_PASSWORD").ok(),
            enable_tls: std::env::var("DOCIDX_LOG_ENABLE_TLS")
                .map(|v| v == "true")
                .unwrap_or(false),
            stream_name: std::env::var("DOCIDX_LOG_STREAM")
                .unwrap_or_else(|_| "docidx-events".to_string()),
            consumer_group: std::env::var("DOCIDX_LOG_CONSUMER_GROUP")
                .unwrap_or_else(|_| "docidx-consumer".to_string()),
            subject_prefix: std::env::var("DOCIDX_LOG_SUBJECT_PREFIX")
                .unwrap_or_else(|_| "docidx.events".to_string()),
        }
    }

    fn connect_url(&self) -> String {
        let scheme = if self.enable_tls { "tls" } else { "nats" };
        self.brokers
            .iter()
            .map(|b| {
                if b.contains("://") {
                    b.clone()
                } else {
                    format!("{scheme}://{b}")
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Maps an event type to its JetStream subject bucket, mirroring the
/// teacher's `topic_for_event`.
pub fn subject_for_event(prefix: &str, event_type: &str) -> String {
    let bucket = match event_type {
        "revision.created" | "revision.updated" => "revisions",
        "revision.deleted" => "deletions",
        _ => "other",
    };
    format!("{prefix}.{bucket}")
}

pub struct NatsLogTransport {
    jetstream: JetStreamContext,
    config: NatsConfig,
    consumer: Mutex<Option<jetstream::consumer::Consumer<jetstream::consumer::pull::Config>>>,
    /// Pending (unacked) messages keyed by the opaque ack token handed out
    /// in `LogRecord::ack_token`, so `commit_records` can ack them later.
    pending: Mutex<HashMap<String, jetstream::Message>>,
}

impl NatsLogTransport {
    #[instrument(skip(config))]
    pub async fn connect(config: NatsConfig) -> Result<Self, LogTransportError> {
        let url = config.connect_url();
        info!(url = %url, "connecting to NATS JetStream");

        let mut connect_options = async_nats::ConnectOptions::new();
        if let (Some(user), Some(pass)) = (&config.sasl_username, &config.sasl_password) {
            connect_options = connect_options.user_and_password(user.clone(), pass.clone());
        }

        let client: NatsClient = connect_options.connect(&url).await.map_err(|e| {
            LogTransportError::ConnectionError {
                message: format!("failed to connect to NATS: {e}"),
            }
        })?;

        let jetstream = jetstream::new(client);
        let transport = Self {
            jetstream,
            config,
            consumer: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
        };
        transport.ensure_stream().await?;
        Ok(transport)
    }

    async fn ensure_stream(&self) -> Result<(), LogTransportError> {
        let subjects = vec![format!("{}.>", self.config.subject_prefix)];
        let cfg = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects,
            ..Default::default()
        };
        match self.jetstream.get_stream(&self.config.stream_name).await {
            Ok(_) => {
                self.jetstream
                    .update_stream(cfg)
                    .await
                    .map_err(|e| LogTransportError::ConnectionError {
                        message: format!("failed to update stream: {e}"),
                    })?;
            }
            Err(_) => {
                self.jetstream
                    .create_stream(cfg)
                    .await
                    .map_err(|e| LogTransportError::ConnectionError {
                        message: format!("failed to create stream: {e}"),
                    })?;
            }
        }
        Ok(())
    }

    async fn consumer(
        &self,
    ) -> Result<jetstream::consumer::Consumer<jetstream::consumer::pull::Config>, LogTransportError>
    {
        let mut guard = self.consumer.lock().await;
        if let Some(c) = guard.as_ref() {
            return Ok(c.clone());
        }
        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| LogTransportError::ConnectionError {
                message: format!("failed to get stream: {e}"),
            })?;
        let pull_config = PullConsumerConfig {
            durable_name: Some(self.config.consumer_group.clone()),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::All,
            filter_subject: format!("{}.>", self.config.subject_prefix),
            ..Default::default()
        };
        let consumer = stream
            .get_or_create_consumer(&self.config.consumer_group, pull_config)
            .await
            .map_err(|e| LogTransportError::ConnectionError {
                message: format!("failed to create consumer: {e}"),
            })?;
        *guard = Some(consumer.clone());
        Ok(consumer)
    }
}

impl LogTransport for NatsLogTransport {
    #[instrument(skip(self, envelope, headers), fields(key = %key))]
    async fn produce_sync(
        &self,
        key: &str,
        envelope: &EventEnvelope,
        headers: &EnvelopeHeaders,
    ) -> Result<(), LogTransportError> {
        let subject = subject_for_event(&self.config.subject_prefix, &headers.event_type);
        let payload =
            serde_json::to_vec(envelope).map_err(|e| LogTransportError::PublishError {
                message: format!("failed to serialize envelope: {e}"),
            })?;

        let mut header_map = async_nats::HeaderMap::new();
        header_map.insert("event_type", headers.event_type.as_str());
        header_map.insert("provider_type", headers.provider_type.as_str());
        header_map.insert("idempotent_key", headers.idempotent_key.as_str());
        header_map.insert("Nats-Msg-Id", headers.idempotent_key.as_str());
        // The partition key: NATS subjects don't carry an explicit key, so
        // the document_uuid rides in a header; ordering is still per
        // subject, which is per event-type bucket here. A stricter
        // per-document ordering guarantee would key the subject itself
        // (e.g. `docidx.events.revisions.<document_uuid>`), trading
        // consumer fan-out for ordering; the current bucket-per-type
        // layout matches the spec's single logical topic.
        header_map.insert("document_uuid", key);

        let ack = self
            .jetstream
            .publish_with_headers(subject, header_map, payload.into())
            .await
            .map_err(|e| LogTransportError::PublishError {
                message: format!("publish failed: {e}"),
            })?;

        ack.await.map_err(|e| LogTransportError::PublishError {
            message: format!("publish ack failed: {e}"),
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn poll(&self, max_records: usize) -> Result<Vec<LogRecord>, LogTransportError> {
        let consumer = self.consumer().await?;
        let messages = consumer
            .fetch()
            .max_messages(max_records)
            .messages()
            .await
            .map_err(|e| LogTransportError::ConnectionError {
                message: format!("fetch failed: {e}"),
            })?;

        use futures::StreamExt;
        let collected: Vec<_> = messages.take(max_records).collect().await;

        let mut records = Vec::new();
        let mut pending = self.pending.lock().await;
        for item in collected {
            let msg = match item {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "failed to receive message from JetStream");
                    continue;
                }
            };
            let mut headers = BTreeMap::new();
            if let Some(h) = &msg.headers {
                for (name, values) in h.iter() {
                    if let Some(v) = values.iter().next() {
                        headers.insert(name.to_string(), v.to_string());
                    }
                }
            }
            let ack_token = format!("ack_{}", Ulid::new());
            let key = headers
                .get("document_uuid")
                .cloned()
                .unwrap_or_default();
            records.push(LogRecord {
                key,
                value: msg.payload.to_vec(),
                headers,
                ack_token: ack_token.clone(),
            });
            pending.insert(ack_token, msg);
        }
        debug!(count = records.len(), "polled records from JetStream");
        Ok(records)
    }

    #[instrument(skip(self, records))]
    async fn commit_records(&self, records: &[LogRecord]) -> Result<(), LogTransportError> {
        let mut pending = self.pending.lock().await;
        for record in records {
            if let Some(msg) = pending.remove(&record.ack_token) {
                msg.ack()
                    .await
                    .map_err(|e| LogTransportError::CommitError {
                        message: format!("ack failed: {e}"),
                    })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_points_at_localhost() {
        let config = NatsConfig::default();
        assert_eq!(config.brokers, vec!["nats://localhost:4222".to_string()]);
        assert_eq!(config.stream_name, "docidx-events");
    }

    #[test]
    fn subject_buckets_by_event_type() {
        assert_eq!(
            subject_for_event("docidx.events", "revision.created"),
            "docidx.events.revisions"
        );
        assert_eq!(
            subject_for_event("docidx.events", "revision.deleted"),
            "docidx.events.deletions"
        );
    }

    #[test]
    fn connect_url_joins_brokers_with_scheme() {
        let config = NatsConfig {
            brokers: vec!["host1:4222".to_string(), "host2:4222".to_string()],
            enable_tls: true,
            ..NatsConfig::default()
        };
        assert_eq!(config.connect_url(), "tls://host1:4222,tls://host2:4222");
    }
}
