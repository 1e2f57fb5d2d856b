//! Connection configuration, status and snapshot types

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, StreamError};

/// Listener invoked with a decoded payload and its synthetic event wrapper.
pub type EventListener = Arc<dyn Fn(&Value, &StreamEvent) + Send + Sync>;

/// Listener invoked on every status transition.
pub type StatusListener = Arc<dyn Fn(ConnectionStatus, Option<&StreamError>) + Send + Sync>;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Statuses from which a new `connect` or header update restarts the transport.
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection configuration. Only `headers` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Stream endpoint
    pub url: String,
    /// Extra request headers, commonly the authorization credential.
    /// Names are kept lowercased so a merge overwrites regardless of case.
    #[serde(default, skip_serializing, deserialize_with = "deserialize_headers")]
    pub headers: HashMap<String, String>,
    /// Timeout for opening the stream, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base backoff delay in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    /// Keep and send cookies for this stream
    #[serde(default)]
    pub with_credentials: bool,
    /// Jitter factor applied to backoff delays (0.0 to 1.0)
    #[serde(default)]
    pub reconnect_jitter: f64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout_ms: default_timeout_ms(),
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            with_credentials: false,
            reconnect_jitter: 0.0,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.merge_headers([(name.into(), value.into())]);
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.merge_headers(headers);
        self
    }

    /// Insert or overwrite headers, matching names case-insensitively.
    pub fn merge_headers(&mut self, headers: impl IntoIterator<Item = (String, String)>) {
        for (name, value) in headers {
            self.headers.insert(name.to_ascii_lowercase(), value);
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_credentials(mut self, enabled: bool) -> Self {
        self.with_credentials = enabled;
        self
    }

    pub fn reconnect_jitter(mut self, factor: f64) -> Self {
        self.reconnect_jitter = factor;
        self
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the configuration before a connection is built from it.
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.url)
            .map_err(|e| StreamError::InvalidConfig(format!("invalid url '{}': {}", self.url, e)))?;

        if self.timeout_ms == 0 {
            return Err(StreamError::InvalidConfig("timeout_ms must be > 0".into()));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(StreamError::InvalidConfig(
                "reconnect_delay_ms must be > 0".into(),
            ));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(StreamError::InvalidConfig(
                "max_reconnect_delay_ms must be >= reconnect_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err(StreamError::InvalidConfig(
                "reconnect_jitter must be within 0.0..=1.0".into(),
            ));
        }

        validate_headers(&self.headers)
    }

    /// Request headers for one attempt: stream defaults, then configured headers.
    pub(crate) fn request_headers(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        map.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        map.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            map.insert(name, value);
        }

        Ok(map)
    }
}

fn deserialize_headers<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect())
}

/// Reject header names or values that cannot go on the wire.
pub(crate) fn validate_headers(headers: &HashMap<String, String>) -> Result<()> {
    for (name, value) in headers {
        parse_header(name, value)?;
    }
    Ok(())
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let invalid = || StreamError::InvalidHeader {
        name: name.to_string(),
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    Ok((header_name, header_value))
}

/// Synthetic event passed to data listeners alongside the payload.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Logical connection id
    pub connection_id: String,
    /// Listener key this delivery was made under (`"data"` or an `eventType`)
    pub listener_key: String,
    /// `eventType` discriminator carried by the message, if any
    pub event_type: Option<String>,
    /// Value of the frame's `event:` line
    pub sse_event: Option<String>,
    /// Value of the frame's `id:` line
    pub last_event_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Point-in-time view of a registered connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    /// Distinguishes successive connections created under the same id
    pub instance_id: Uuid,
    pub status: ConnectionStatus,
    pub ref_count: usize,
    pub reconnect_attempts: u32,
    pub config: ConnectionConfig,
    pub listener_count: usize,
    pub status_listener_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_error")]
    pub last_error: Option<StreamError>,
}

fn serialize_error<S>(error: &Option<StreamError>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}
