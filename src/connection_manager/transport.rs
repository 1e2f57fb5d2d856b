//! Per-attempt transport loop: open the stream, read frames, hand off to dispatch.

use std::sync::Arc;

use futures::StreamExt;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StreamError};
use crate::metrics::StreamMetrics;
use crate::stream::{decode, FrameDecoder};

use super::connection::{AttemptPhase, Connection};
use super::types::ConnectionStatus;

/// How a read loop ended.
enum ReadOutcome {
    /// Superseded or torn down; nothing further to do
    Cancelled,
    /// Hand to the reconnection policy
    Failed(StreamError),
}

/// Run one transport attempt for `connection` under `generation`.
pub(crate) async fn run(connection: Arc<Connection>, token: CancellationToken, generation: u64) {
    if !connection.transition(generation, ConnectionStatus::Connecting) {
        return;
    }
    StreamMetrics::record_attempt();

    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        result = open_stream(&connection, generation) => result,
    };

    let response = match opened {
        Ok(Some(response)) => response,
        Ok(None) => return,
        Err(err) if err.is_unauthorized() => {
            connection.mark_unauthorized(generation);
            return;
        }
        Err(err) => {
            tracing::warn!(connection_id = %connection.id(), code = err.code(), error = %err, "Failed to open stream");
            connection.schedule_reconnect(generation, AttemptPhase::Open, err);
            return;
        }
    };

    if !connection.transition(generation, ConnectionStatus::Connected) {
        return;
    }

    match read_stream(&connection, response, &token, generation).await {
        ReadOutcome::Cancelled => {
            tracing::debug!(connection_id = %connection.id(), "Stream read loop cancelled");
        }
        ReadOutcome::Failed(err) => {
            connection.schedule_reconnect(generation, AttemptPhase::Read, err)
        }
    }
}

/// Open the streaming request. `Ok(None)` means the attempt was superseded
/// before it could send.
async fn open_stream(connection: &Connection, generation: u64) -> Result<Option<reqwest::Response>> {
    let Some(config) = connection.request_config(generation) else {
        return Ok(None);
    };
    let headers = config.request_headers()?;
    let timeout = config.open_timeout();

    tracing::info!(connection_id = %connection.id(), url = %config.url, "Opening event stream");

    let request = connection.client().get(&config.url).headers(headers);
    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| StreamError::Timeout(timeout))??;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(StreamError::Unauthorized);
    }
    if !status.is_success() {
        return Err(StreamError::InvalidStatus(status.as_u16()));
    }
    if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
        return Err(StreamError::MissingBody);
    }

    Ok(Some(response))
}

async fn read_stream(
    connection: &Connection,
    response: reqwest::Response,
    token: &CancellationToken,
    generation: u64,
) -> ReadOutcome {
    let mut decoder = FrameDecoder::new();
    let mut body = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => return ReadOutcome::Cancelled,
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for frame in decoder.push(&bytes) {
                    let Some(message) = decode(&frame.data) else {
                        continue;
                    };
                    if let Some(err) = connection.dispatch(generation, message, &frame) {
                        return ReadOutcome::Failed(err);
                    }
                    // A listener may have disconnected or restarted the stream
                    if token.is_cancelled() {
                        return ReadOutcome::Cancelled;
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!(connection_id = %connection.id(), error = %e, "Stream read failed");
                return ReadOutcome::Failed(StreamError::Transport(e.to_string()));
            }
            None => {
                tracing::warn!(connection_id = %connection.id(), "Stream closed by server");
                return ReadOutcome::Failed(StreamError::StreamClosed);
            }
        }
    }
}
