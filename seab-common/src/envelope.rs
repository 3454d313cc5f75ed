//! Push-envelope decoding for webhook routes.
//!
//! Every webhook route accepts two invocation shapes: a direct JSON payload
//! (the event's fields at the top level) and a broker push envelope (the
//! payload base64-encoded inside `message.data`). The two are disambiguated
//! by the presence of the `message` field and surfaced as a tagged variant
//! so handlers never touch the raw shapes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Envelope decode failures. `MalformedEnvelope` means the broker sent a
/// push wrapper the service cannot read; the webhook answers 4xx so the
/// broker does not redeliver.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// The broker's push wrapper around an application payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    /// Base64 of the UTF-8 JSON payload
    pub data: Option<String>,
    #[serde(rename = "messageId", default)]
    pub message_id: Option<String>,
    #[serde(rename = "publishTime", default)]
    pub publish_time: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// One inbound webhook body, classified at the decode boundary.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Broker push delivery
    Push {
        payload: Value,
        message_id: Option<String>,
        publish_time: Option<String>,
        attributes: HashMap<String, String>,
    },
    /// Direct invocation with the payload at the top level
    Direct { payload: Value },
}

impl Inbound {
    /// The decoded application payload, regardless of invocation shape.
    pub fn payload(&self) -> &Value {
        match self {
            Inbound::Push { payload, .. } => payload,
            Inbound::Direct { payload } => payload,
        }
    }

    /// Consume the envelope, yielding the payload.
    pub fn into_payload(self) -> Value {
        match self {
            Inbound::Push { payload, .. } => payload,
            Inbound::Direct { payload } => payload,
        }
    }

    /// Broker message id, when delivered by push. Used for log correlation.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Inbound::Push { message_id, .. } => message_id.as_deref(),
            Inbound::Direct { .. } => None,
        }
    }
}

/// Decode a raw webhook body into an [`Inbound`].
///
/// A body with a `message` field is a push envelope and must carry valid
/// base64 JSON in `message.data`; anything else is treated as a direct
/// payload. Decoding never mutates state.
pub fn decode(body: &[u8]) -> Result<Inbound, EnvelopeError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| EnvelopeError::MalformedEnvelope(format!("body is not JSON: {e}")))?;

    let Some(message) = value.get("message") else {
        return Ok(Inbound::Direct { payload: value });
    };

    let message: PushMessage = serde_json::from_value(message.clone())
        .map_err(|e| EnvelopeError::MalformedEnvelope(format!("unreadable message field: {e}")))?;

    let data = message
        .data
        .ok_or_else(|| EnvelopeError::MalformedEnvelope("missing data field".into()))?;

    let bytes = BASE64
        .decode(data.as_bytes())
        .map_err(|e| EnvelopeError::MalformedEnvelope(format!("data is not base64: {e}")))?;

    let payload: Value = serde_json::from_slice(&bytes)
        .map_err(|e| EnvelopeError::MalformedEnvelope(format!("decoded data is not JSON: {e}")))?;

    Ok(Inbound::Push {
        payload,
        message_id: message.message_id,
        publish_time: message.publish_time,
        attributes: message.attributes,
    })
}

/// Wrap a payload in a push envelope. The publishing side of the same wire
/// format [`decode`] accepts; also used by tests to drive webhook routes.
pub fn encode_push(payload: &Value, message_id: &str) -> Value {
    serde_json::json!({
        "message": {
            "data": BASE64.encode(payload.to_string()),
            "messageId": message_id,
            "publishTime": chrono::Utc::now().to_rfc3339(),
            "attributes": {},
        }
    })
}

/// A direct invocation body is the payload itself.
pub fn encode_direct(payload: &Value) -> Value {
    payload.clone()
}

/// Extract a required string field from a decoded payload.
pub fn require_str<'a>(
    payload: &'a Value,
    field: &'static str,
) -> Result<&'a str, EnvelopeError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or(EnvelopeError::MissingField(field))
}

/// Extract a required unsigned integer field from a decoded payload.
pub fn require_u64(payload: &Value, field: &'static str) -> Result<u64, EnvelopeError> {
    payload
        .get(field)
        .and_then(Value::as_u64)
        .ok_or(EnvelopeError::MissingField(field))
}

/// Extract a required floating-point field from a decoded payload.
pub fn require_f64(payload: &Value, field: &'static str) -> Result<f64, EnvelopeError> {
    payload
        .get(field)
        .and_then(Value::as_f64)
        .ok_or(EnvelopeError::MissingField(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_payload_passthrough() {
        let payload = json!({"submission_url": "sub-1", "question_number": 2});
        let body = serde_json::to_vec(&payload).unwrap();

        let inbound = decode(&body).unwrap();
        assert!(matches!(inbound, Inbound::Direct { .. }));
        assert_eq!(inbound.payload(), &payload);
        assert_eq!(inbound.message_id(), None);
    }

    #[test]
    fn test_push_round_trip() {
        let payload = json!({
            "submission_url": "sub-1",
            "audio_urls": ["https://a/1.webm"],
            "total_questions": 1,
        });
        let envelope = encode_push(&payload, "msg-42");
        let body = serde_json::to_vec(&envelope).unwrap();

        let inbound = decode(&body).unwrap();
        assert_eq!(inbound.payload(), &payload);
        assert_eq!(inbound.message_id(), Some("msg-42"));
    }

    #[test]
    fn test_message_without_data_is_malformed() {
        let body = serde_json::to_vec(&json!({"message": {"messageId": "m1"}})).unwrap();
        let err = decode(&body).unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_bad_base64_is_malformed() {
        let body =
            serde_json::to_vec(&json!({"message": {"data": "not-base64!!!"}})).unwrap();
        let err = decode(&body).unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_base64_of_non_json_is_malformed() {
        let data = BASE64.encode("definitely not json");
        let body = serde_json::to_vec(&json!({"message": {"data": data}})).unwrap();
        let err = decode(&body).unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_require_helpers() {
        let payload = json!({"submission_url": "s", "question_number": 3, "audio_duration": 12.5});
        assert_eq!(require_str(&payload, "submission_url").unwrap(), "s");
        assert_eq!(require_u64(&payload, "question_number").unwrap(), 3);
        assert_eq!(require_f64(&payload, "audio_duration").unwrap(), 12.5);

        let err = require_str(&payload, "wav_path").unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingField("wav_path")));
    }
}
