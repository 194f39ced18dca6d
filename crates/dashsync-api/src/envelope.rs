// ── Live-update envelopes ──
//
// Inbound frames on a live channel are JSON envelopes describing a
// create/update/delete of one tracked record. Anything that does not parse
// into a well-formed envelope for the subscribed topic is rejected here and
// never reaches reconciliation.

use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Version / ordering marker carried by every envelope and stored record.
///
/// The wire form is either an integer (monotonic counter or epoch millis) or
/// an RFC3339 timestamp, which is normalized to epoch millis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct OrderingMarker(i64);

impl OrderingMarker {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for OrderingMarker {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderingMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for OrderingMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Counter(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Counter(n) => Ok(Self(n)),
            Raw::Text(s) => {
                if let Ok(n) = s.trim().parse::<i64>() {
                    return Ok(Self(n));
                }
                DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| Self(dt.timestamp_millis()))
                    .map_err(|e| {
                        serde::de::Error::custom(format!("invalid timestamp '{s}': {e}"))
                    })
            }
        }
    }
}

/// What happened to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateKind {
    Created,
    Updated,
    Deleted,
}

/// One parsed live-update message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveEnvelope {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub timestamp: OrderingMarker,
    pub record_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Why an inbound frame was discarded.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope for topic '{found}' arrived on '{expected}'")]
    TopicMismatch { expected: String, found: String },

    #[error("{kind} envelope for '{record_id}' has no object payload")]
    MissingPayload { kind: UpdateKind, record_id: String },

    #[error("envelope has an empty record_id")]
    EmptyRecordId,
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    topic: Option<String>,
    #[serde(rename = "type")]
    kind: UpdateKind,
    timestamp: OrderingMarker,
    #[serde(alias = "recordId")]
    record_id: String,
    #[serde(default)]
    payload: Option<Value>,
}

impl LiveEnvelope {
    /// Parse one text frame received on `topic`.
    ///
    /// A missing `topic` field defaults to the subscription's topic.
    pub fn parse(text: &str, topic: &str) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_str(text)?;

        let found = wire.topic.unwrap_or_else(|| topic.to_owned());
        if found != topic {
            return Err(EnvelopeError::TopicMismatch {
                expected: topic.to_owned(),
                found,
            });
        }

        if wire.record_id.trim().is_empty() {
            return Err(EnvelopeError::EmptyRecordId);
        }

        let payload = match (wire.kind, wire.payload) {
            (UpdateKind::Deleted, payload) => payload,
            (_, Some(payload @ Value::Object(_))) => Some(payload),
            (kind, _) => {
                return Err(EnvelopeError::MissingPayload {
                    kind,
                    record_id: wire.record_id,
                });
            }
        };

        Ok(Self {
            topic: found,
            kind: wire.kind,
            timestamp: wire.timestamp,
            record_id: wire.record_id,
            payload,
        })
    }
}
