//! Event bus client.
//!
//! Publishes typed events by logical topic to the external broker. Emission
//! is best-effort: a failed publish is logged and counted, never raised past
//! the caller. Redelivery from the broker is the only retry mechanism.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use seab_common::config::BrokerConfig;
use seab_common::events::Topic;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Bus client errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Broker error {0}: {1}")]
    Broker(u16, String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Transport seam between the client and the broker wire protocol.
///
/// The production transport posts to the broker's REST publish endpoint;
/// tests substitute a channel transport to capture published events.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Publish a payload to a wire topic, returning the broker message id.
    async fn publish(&self, wire_topic: &str, payload: &Value) -> Result<String, BusError>;
}

/// HTTP transport: POST {base}/topics/{topic}:publish with the payload
/// base64-encoded in the standard publish body.
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, BusError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BusError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            token,
        })
    }
}

#[async_trait]
impl BusTransport for HttpTransport {
    async fn publish(&self, wire_topic: &str, payload: &Value) -> Result<String, BusError> {
        let url = format!("{}/topics/{}:publish", self.base_url, wire_topic);
        let body = serde_json::json!({
            "messages": [{ "data": BASE64.encode(payload.to_string()) }]
        });

        let mut request = self.http_client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BusError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BusError::Broker(status.as_u16(), text));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        let message_id = parsed
            .get("messageIds")
            .and_then(|ids| ids.get(0))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(message_id)
    }
}

/// Transport used when no broker is configured: logs and drops. Local
/// development only.
pub struct NullTransport;

#[async_trait]
impl BusTransport for NullTransport {
    async fn publish(&self, wire_topic: &str, _payload: &Value) -> Result<String, BusError> {
        debug!(topic = %wire_topic, "No broker configured, dropping publish");
        Ok(String::new())
    }
}

/// Process-wide bus client. Cheap to clone via `Arc`.
pub struct BusClient {
    transport: Arc<dyn BusTransport>,
    broker: BrokerConfig,
    publish_failures: AtomicU64,
}

impl BusClient {
    /// Build the client from configuration, loading the bearer credential
    /// at init so request paths never touch the filesystem.
    pub fn new(broker: BrokerConfig) -> Self {
        let token = broker.credentials_path.as_ref().and_then(|path| {
            match std::fs::read_to_string(path) {
                Ok(token) => Some(token.trim().to_string()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read broker credential");
                    None
                }
            }
        });

        let transport: Arc<dyn BusTransport> = match &broker.publish_base_url {
            Some(base_url) => match HttpTransport::new(base_url.clone(), token) {
                Ok(transport) => {
                    info!(base_url = %base_url, "Event bus client initialized");
                    Arc::new(transport)
                }
                Err(e) => {
                    error!(error = %e, "Cannot build broker transport, publishes will be dropped");
                    Arc::new(NullTransport)
                }
            },
            None => Arc::new(NullTransport),
        };

        Self {
            transport,
            broker,
            publish_failures: AtomicU64::new(0),
        }
    }

    /// Build the client over an explicit transport (tests, embedding).
    pub fn with_transport(broker: BrokerConfig, transport: Arc<dyn BusTransport>) -> Self {
        Self {
            transport,
            broker,
            publish_failures: AtomicU64::new(0),
        }
    }

    /// Publish a typed event. Best-effort: failures are logged and counted
    /// but never propagated.
    pub async fn publish<T: Serialize>(&self, topic: Topic, payload: &T) {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(topic = %topic, error = %e, "Cannot serialize event payload");
                return;
            }
        };

        let wire_topic = self.broker.wire_id(topic);
        match self.transport.publish(&wire_topic, &value).await {
            Ok(message_id) => {
                debug!(topic = %topic, wire_topic = %wire_topic, message_id = %message_id, "Published event");
            }
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(topic = %topic, wire_topic = %wire_topic, error = %e, "Publish failed");
            }
        }
    }

    /// Total failed publishes since startup.
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Teardown hook. The HTTP transport has nothing buffered; this exists
    /// so shutdown paths have a single place to flush.
    pub async fn shutdown(&self) {
        info!(
            publish_failures = self.publish_failures(),
            "Event bus client shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct RecordingTransport {
        tx: mpsc::UnboundedSender<(String, Value)>,
        fail: bool,
    }

    #[async_trait]
    impl BusTransport for RecordingTransport {
        async fn publish(&self, wire_topic: &str, payload: &Value) -> Result<String, BusError> {
            if self.fail {
                return Err(BusError::Network("connection refused".into()));
            }
            let _ = self.tx.send((wire_topic.to_string(), payload.clone()));
            Ok("m-1".into())
        }
    }

    #[tokio::test]
    async fn test_publish_uses_configured_wire_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut broker = BrokerConfig::default();
        broker
            .topics
            .insert("GRAMMAR_DONE".into(), "grammer-done-topic".into());

        let bus = BusClient::with_transport(
            broker,
            Arc::new(RecordingTransport { tx, fail: false }),
        );
        bus.publish(Topic::GrammarDone, &serde_json::json!({"x": 1}))
            .await;

        let (wire_topic, payload) = rx.recv().await.unwrap();
        assert_eq!(wire_topic, "grammer-done-topic");
        assert_eq!(payload, serde_json::json!({"x": 1}));
        assert_eq!(bus.publish_failures(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed_and_counted() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let bus = BusClient::with_transport(
            BrokerConfig::default(),
            Arc::new(RecordingTransport { tx, fail: true }),
        );

        bus.publish(Topic::AnalysisComplete, &serde_json::json!({}))
            .await;
        bus.publish(Topic::AnalysisComplete, &serde_json::json!({}))
            .await;
        assert_eq!(bus.publish_failures(), 2);
    }
}
