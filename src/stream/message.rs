use serde_json::Value;

use crate::error::MessageParseError;
use crate::metrics::StreamMetrics;

const DEFAULT_SERVER_ERROR: &str = "Unknown server error";

/// Application message decoded from a frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// In-band confirmation that the stream is ready
    Connected,
    /// Business payload for subscribers
    Data {
        /// Inner `data` field, or the whole message when absent
        payload: Value,
        /// Optional `eventType` discriminator for layered routing
        event_type: Option<String>,
    },
    /// Keep-alive, never delivered to listeners
    Heartbeat,
    /// Server-reported failure
    Error { message: String },
}

impl StreamMessage {
    /// Wire name of this message's type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Data { .. } => "data",
            Self::Heartbeat => "heartbeat",
            Self::Error { .. } => "error",
        }
    }
}

/// Parse a raw frame payload into a [`StreamMessage`].
///
/// A payload whose top level has a string `data` field and no `type` field is
/// treated as double-encoded and `data` is parsed once more.
pub fn parse_message(raw: &str) -> Result<StreamMessage, MessageParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(MessageParseError::Empty);
    }

    let mut value: Value =
        serde_json::from_str(raw).map_err(|e| MessageParseError::InvalidJson(e.to_string()))?;

    let unwrapped = match (value.get("type"), value.get("data")) {
        (None, Some(Value::String(inner))) => Some(
            serde_json::from_str::<Value>(inner)
                .map_err(|e| MessageParseError::InvalidJson(e.to_string()))?,
        ),
        _ => None,
    };
    if let Some(inner) = unwrapped {
        value = inner;
    }

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(other) => return Err(MessageParseError::UnknownType(other.to_string())),
        None => return Err(MessageParseError::MissingType),
    };

    match kind {
        "connected" => Ok(StreamMessage::Connected),
        "heartbeat" => Ok(StreamMessage::Heartbeat),
        "data" => {
            let event_type = value
                .get("eventType")
                .and_then(Value::as_str)
                .map(str::to_string);
            let payload = match value.get("data") {
                Some(data) if !data.is_null() => data.clone(),
                _ => value.clone(),
            };
            Ok(StreamMessage::Data {
                payload,
                event_type,
            })
        }
        "error" => Ok(StreamMessage::Error {
            message: error_text(&value),
        }),
        other => Err(MessageParseError::UnknownType(other.to_string())),
    }
}

/// Parse a payload, logging and counting anything that produced no message.
pub fn decode(raw: &str) -> Option<StreamMessage> {
    match parse_message(raw) {
        Ok(message) => Some(message),
        Err(MessageParseError::Empty) => None,
        Err(e) => {
            StreamMetrics::record_malformed();
            tracing::warn!(error = %e, payload_len = raw.len(), "Dropping malformed stream message");
            None
        }
    }
}

fn error_text(value: &Value) -> String {
    let text = match value.get("error") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };

    text.or_else(|| {
        value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    })
    .unwrap_or_else(|| DEFAULT_SERVER_ERROR.to_string())
}
