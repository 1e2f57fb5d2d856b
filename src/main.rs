use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use dashboard_stream::auth::{CredentialProvider, StaticTokenProvider};
use dashboard_stream::config::Settings;
use dashboard_stream::connection_manager::{StreamManager, Subscription, DATA_EVENT};
use dashboard_stream::server::{create_app, AppState};
use dashboard_stream::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Arc::new(Settings::new()?);

    // Initialize tracing
    init_telemetry(&settings.telemetry)?;
    tracing::info!(streams = settings.streams.len(), "Configuration loaded");

    let manager = Arc::new(StreamManager::new());
    let credentials = resolve_credentials(&settings);

    // Open every configured stream
    let mut subscriptions: Vec<Subscription> = Vec::new();
    for stream in &settings.streams {
        let config = stream.connection.clone().headers(credentials.clone());
        manager.connect(stream.id.clone(), config)?;
        subscriptions.extend(watch_stream(&manager, &stream.id));
    }

    let shutdown = CancellationToken::new();

    #[cfg(unix)]
    let reload_handle = tokio::spawn(reload_credentials_on_sighup(
        Arc::clone(&manager),
        shutdown.clone(),
    ));

    if settings.server.enabled {
        let state = AppState::new(Arc::clone(&settings), Arc::clone(&manager));
        let app = create_app(state);

        let addr = settings.server_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Status API listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal_handler(shutdown.clone()))
            .await?;
    } else {
        shutdown_signal_handler(shutdown.clone()).await;
    }

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    manager.disconnect_all();

    #[cfg(unix)]
    let _ = reload_handle.await;

    tracing::info!("Monitor shutdown complete");
    Ok(())
}

/// Credential headers from the configured provider, empty when none is set
fn resolve_credentials(settings: &Settings) -> HashMap<String, String> {
    match StaticTokenProvider::from_config(&settings.auth).headers() {
        Some(headers) => headers,
        None => {
            tracing::warn!("No credential configured; streams will be opened without one");
            HashMap::new()
        }
    }
}

/// Log status changes and data payloads for one stream
fn watch_stream(manager: &StreamManager, id: &str) -> [Subscription; 2] {
    let stream_id = id.to_string();
    let status = manager.on_status_change(
        id,
        Arc::new(move |status, error| match error {
            Some(err) => {
                tracing::warn!(stream = %stream_id, status = %status, error = %err, "Stream status")
            }
            None => tracing::info!(stream = %stream_id, status = %status, "Stream status"),
        }),
    );

    let data = manager.subscribe(
        id,
        DATA_EVENT,
        Arc::new(|payload, event| {
            tracing::info!(
                stream = %event.connection_id,
                event_type = event.event_type.as_deref().unwrap_or("-"),
                payload = %payload,
                "Stream data"
            );
        }),
    );

    [status, data]
}

/// Re-read settings on SIGHUP and push fresh credentials to every stream
#[cfg(unix)]
async fn reload_credentials_on_sighup(manager: Arc<StreamManager>, shutdown: CancellationToken) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    return;
                }
            }
        }

        tracing::info!("Received SIGHUP, refreshing credentials");
        let settings = match Settings::new() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload configuration");
                continue;
            }
        };

        let credentials = resolve_credentials(&settings);
        if credentials.is_empty() {
            continue;
        }
        match manager.update_all_headers(&credentials, true) {
            Ok(restarted) => tracing::info!(restarted, "Credentials refreshed"),
            Err(e) => tracing::error!(error = %e, "Failed to apply refreshed credentials"),
        }
    }
}

async fn shutdown_signal_handler(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    shutdown.cancel();
}
