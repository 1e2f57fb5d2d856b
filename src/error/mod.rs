use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by a stream connection.
///
/// Transport and protocol failures never escape the read loop as `Err`; they
/// are reported to status listeners alongside the status they caused. The
/// enum is `Clone` because one failure fans out to every listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Unauthorized: credentials were rejected by the stream endpoint")]
    Unauthorized,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response status: {0}")]
    InvalidStatus(u16),

    #[error("Response has no body to stream")]
    MissingBody,

    #[error("Stream closed by server")]
    StreamClosed,

    #[error("Timed out opening stream after {0:?}")]
    Timeout(Duration),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Max reconnect attempts reached ({attempts})")]
    MaxAttemptsReached { attempts: u32 },

    #[error("Invalid header: {name}")]
    InvalidHeader { name: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StreamError {
    /// Returns true for a 401 on open, which must not be retried automatically.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns true if the reconnection policy applies to this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::InvalidStatus(_)
                | Self::MissingBody
                | Self::StreamClosed
                | Self::Timeout(_)
                | Self::Server(_)
        )
    }

    /// Short machine-readable code for structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::InvalidStatus(_) => "INVALID_STATUS",
            Self::MissingBody => "MISSING_BODY",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Server(_) => "SERVER_ERROR",
            Self::MaxAttemptsReached { .. } => "MAX_ATTEMPTS_REACHED",
            Self::InvalidHeader { .. } => "INVALID_HEADER",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
            return Self::Unauthorized;
        }
        Self::Transport(err.to_string())
    }
}

/// Reasons a raw payload produced no message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageParseError {
    #[error("Empty payload")]
    Empty,

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload has no type field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
