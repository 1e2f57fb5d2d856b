//! Reconnection policy, 401 handling and credential refresh

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use common::{wait_for, Frame, MockServer, Reply, StatusLog};
use dashboard_stream::{ConnectionStatus, StreamError, StreamManager, DATA_EVENT};

fn bearer(token: &str) -> HashMap<String, String> {
    HashMap::from([("Authorization".to_string(), format!("Bearer {token}"))])
}

fn requires_token(_: usize, authorization: Option<&str>) -> Reply {
    if authorization == Some("Bearer good") {
        Reply::open(vec![Frame::connected()])
    } else {
        Reply::Unauthorized
    }
}

#[tokio::test]
async fn test_unauthorized_parks_until_headers_update() {
    let server = MockServer::start(requires_token).await;
    let manager = StreamManager::new();
    manager
        .connect("health", server.config().headers(bearer("stale")))
        .unwrap();
    let log = StatusLog::default();
    manager.on_status_change("health", log.listener());

    wait_for("error status", || {
        manager.status("health") == Some(ConnectionStatus::Error)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // No automatic retry after a 401
    assert_eq!(server.requests(), 1);
    assert_eq!(log.count(ConnectionStatus::Reconnecting), 0);
    let info = manager.connection("health").unwrap();
    assert_eq!(info.last_error, Some(StreamError::Unauthorized));

    let restarted = assert_ok!(manager.update_headers("health", &bearer("good"), true));
    assert!(restarted);
    wait_for("connected", || {
        manager.status("health") == Some(ConnectionStatus::Connected)
    })
    .await;

    assert_eq!(server.requests(), 2);
    assert_eq!(
        server.authorization_seen(),
        vec![
            Some("Bearer stale".to_string()),
            Some("Bearer good".to_string())
        ]
    );
    assert_eq!(manager.connection("health").unwrap().reconnect_attempts, 0);
}

#[tokio::test]
async fn test_update_headers_without_reconnect_keeps_error() {
    let server = MockServer::start(requires_token).await;
    let manager = StreamManager::new();
    manager.connect("health", server.config()).unwrap();

    wait_for("error status", || {
        manager.status("health") == Some(ConnectionStatus::Error)
    })
    .await;

    let restarted = assert_ok!(manager.update_headers("health", &bearer("good"), false));
    assert!(!restarted);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.requests(), 1);

    // The merged header is used by the next connect
    manager.connect("health", server.config()).unwrap();
    wait_for("connected", || {
        manager.status("health") == Some(ConnectionStatus::Connected)
    })
    .await;
    assert_eq!(manager.connection("health").unwrap().ref_count, 2);
}

#[tokio::test]
async fn test_update_all_headers_restarts_every_errored_stream() {
    let server = MockServer::start(requires_token).await;
    let manager = StreamManager::new();
    manager.connect("health", server.config()).unwrap();
    manager.connect("metrics", server.config()).unwrap();

    wait_for("both errored", || {
        manager.stats().by_status.get("error").copied() == Some(2)
    })
    .await;

    let restarted = assert_ok!(manager.update_all_headers(&bearer("good"), true));
    assert_eq!(restarted, 2);
    wait_for("both connected", || {
        manager.stats().by_status.get("connected").copied() == Some(2)
    })
    .await;
}

#[tokio::test]
async fn test_invalid_header_update_rejected() {
    let server = MockServer::start(requires_token).await;
    let manager = StreamManager::new();
    manager.connect("health", server.config()).unwrap();

    let bad = HashMap::from([("Authorization".to_string(), "line\nbreak".to_string())]);
    let err = assert_err!(manager.update_headers("health", &bad, true));
    assert!(matches!(err, StreamError::InvalidHeader { .. }));
}

#[tokio::test]
async fn test_max_attempts_reached() {
    let server =
        MockServer::start(|_, _| Reply::Status(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let manager = StreamManager::new();
    manager
        .connect("health", server.config().max_reconnect_attempts(3))
        .unwrap();
    let log = StatusLog::default();
    manager.on_status_change("health", log.listener());

    wait_for("terminal error", || {
        log.errors()
            .contains(&StreamError::MaxAttemptsReached { attempts: 3 })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(manager.status("health"), Some(ConnectionStatus::Error));
    assert_eq!(server.requests(), 4);
    assert_eq!(log.count(ConnectionStatus::Reconnecting), 3);
    assert!(log.errors().contains(&StreamError::InvalidStatus(500)));
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let server = MockServer::start(|n, _| match n {
        0 => Reply::close_after(vec![Frame::connected(), Frame::data(json!(1))]),
        _ => Reply::open(vec![Frame::connected(), Frame::data(json!(2))]),
    })
    .await;
    let manager = StreamManager::new();
    manager.connect("metrics", server.config()).unwrap();
    let log = StatusLog::default();
    manager.on_status_change("metrics", log.listener());

    let count = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&count);
    manager.subscribe(
        "metrics",
        DATA_EVENT,
        Arc::new(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
        }),
    );

    wait_for("both payloads", || count.load(Ordering::SeqCst) == 2).await;

    assert_eq!(server.requests(), 2);
    assert_eq!(manager.status("metrics"), Some(ConnectionStatus::Connected));
    assert_eq!(manager.connection("metrics").unwrap().reconnect_attempts, 0);
    assert!(log.errors().contains(&StreamError::StreamClosed));
    assert_eq!(log.count(ConnectionStatus::Reconnecting), 1);
}

#[tokio::test]
async fn test_in_band_error_triggers_reconnect() {
    let server = MockServer::start(|n, _| match n {
        0 => Reply::open(vec![Frame::connected(), Frame::error("database unavailable")]),
        _ => Reply::open(vec![Frame::connected()]),
    })
    .await;
    let manager = StreamManager::new();
    manager.connect("system", server.config()).unwrap();
    let log = StatusLog::default();
    manager.on_status_change("system", log.listener());

    wait_for("second request", || server.requests() == 2).await;
    wait_for("connected", || {
        manager.status("system") == Some(ConnectionStatus::Connected)
    })
    .await;

    assert!(log
        .errors()
        .contains(&StreamError::Server("database unavailable".to_string())));
    assert_eq!(log.count(ConnectionStatus::Reconnecting), 1);
}

#[tokio::test]
async fn test_auto_reconnect_disabled_then_reconnect_on_connect() {
    let server =
        MockServer::start(|_, _| Reply::close_after(vec![Frame::connected()])).await;
    let manager = StreamManager::new();
    manager
        .connect("health", server.config().auto_reconnect(false))
        .unwrap();
    let log = StatusLog::default();
    manager.on_status_change("health", log.listener());

    wait_for("disconnected", || {
        manager.status("health") == Some(ConnectionStatus::Disconnected)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.requests(), 1);
    assert!(manager.has_connection("health"));
    assert_eq!(log.count(ConnectionStatus::Reconnecting), 0);
    assert!(log.errors().contains(&StreamError::StreamClosed));

    // A new reference restarts an idle stream
    manager
        .connect("health", server.config().auto_reconnect(false))
        .unwrap();
    wait_for("second request", || server.requests() == 2).await;
    assert_eq!(manager.connection("health").unwrap().ref_count, 2);
}

#[tokio::test]
async fn test_open_failures_back_off_with_auto_reconnect_disabled() {
    let server =
        MockServer::start(|_, _| Reply::Status(StatusCode::SERVICE_UNAVAILABLE)).await;
    let manager = StreamManager::new();
    manager
        .connect(
            "health",
            server
                .config()
                .auto_reconnect(false)
                .max_reconnect_attempts(2),
        )
        .unwrap();
    let log = StatusLog::default();
    manager.on_status_change("health", log.listener());

    wait_for("terminal error", || {
        log.errors()
            .contains(&StreamError::MaxAttemptsReached { attempts: 2 })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(server.requests(), 3);
    assert_eq!(log.count(ConnectionStatus::Reconnecting), 2);
    assert!(log.errors().contains(&StreamError::InvalidStatus(503)));
    assert_eq!(manager.status("health"), Some(ConnectionStatus::Error));
}

#[tokio::test]
async fn test_stalled_open_times_out_and_reconnects() {
    let server = MockServer::start(|_, _| Reply::Stall).await;
    let manager = StreamManager::new();
    let timeout = Duration::from_millis(100);
    manager
        .connect(
            "health",
            server.config().timeout(timeout).max_reconnect_attempts(1),
        )
        .unwrap();
    let log = StatusLog::default();
    manager.on_status_change("health", log.listener());

    wait_for("terminal error", || {
        log.errors()
            .contains(&StreamError::MaxAttemptsReached { attempts: 1 })
    })
    .await;

    let errors = log.errors();
    let timed_out = errors
        .iter()
        .position(|e| *e == StreamError::Timeout(timeout))
        .expect("timeout reported");
    assert!(timed_out < errors.len() - 1);
    assert_eq!(log.count(ConnectionStatus::Reconnecting), 1);
    assert_eq!(server.requests(), 2);
}

#[tokio::test]
async fn test_empty_success_response_reconnects() {
    let server = MockServer::start(|n, _| match n {
        0 => Reply::Status(StatusCode::NO_CONTENT),
        _ => Reply::open(vec![Frame::connected()]),
    })
    .await;
    let manager = StreamManager::new();
    manager.connect("health", server.config()).unwrap();
    let log = StatusLog::default();
    manager.on_status_change("health", log.listener());

    wait_for("connected", || {
        manager.status("health") == Some(ConnectionStatus::Connected)
    })
    .await;

    assert_eq!(server.requests(), 2);
    assert!(log.errors().contains(&StreamError::MissingBody));
    assert_eq!(log.count(ConnectionStatus::Reconnecting), 1);
    assert_eq!(manager.connection("health").unwrap().reconnect_attempts, 0);
}

#[tokio::test]
async fn test_refresh_with_lowercase_header_replaces_stale_token() {
    let server = MockServer::start(requires_token).await;
    let manager = StreamManager::new();
    let refreshed =
        HashMap::from([("authorization".to_string(), "Bearer good".to_string())]);

    for round in 0..5 {
        let id = format!("health-{round}");
        manager
            .connect(&id, server.config().headers(bearer("stale")))
            .unwrap();
        wait_for("error status", || {
            manager.status(&id) == Some(ConnectionStatus::Error)
        })
        .await;

        assert!(assert_ok!(manager.update_headers(&id, &refreshed, true)));
        wait_for("connected", || {
            manager.status(&id) == Some(ConnectionStatus::Connected)
        })
        .await;

        let info = manager.connection(&id).unwrap();
        assert_eq!(info.config.headers.len(), 1);
        assert_eq!(
            server.authorization_seen().last().cloned().flatten(),
            Some("Bearer good".to_string())
        );
    }
    assert_eq!(server.requests(), 10);
}

#[tokio::test]
async fn test_disconnect_during_backoff_cancels_retry() {
    let server =
        MockServer::start(|_, _| Reply::Status(StatusCode::SERVICE_UNAVAILABLE)).await;
    let manager = StreamManager::new();
    manager
        .connect(
            "health",
            server
                .config()
                .reconnect_delay(Duration::from_millis(200))
                .max_reconnect_delay(Duration::from_millis(200)),
        )
        .unwrap();

    wait_for("reconnecting", || {
        manager.status("health") == Some(ConnectionStatus::Reconnecting)
    })
    .await;
    assert!(manager.disconnect("health", true));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn test_reconnect_after_teardown_creates_fresh_connection() {
    let server = MockServer::start(|_, _| Reply::open(vec![Frame::connected()])).await;
    let manager = StreamManager::new();

    let first = manager.connect("health", server.config()).unwrap();
    assert!(manager.disconnect("health", false));
    let second = manager.connect("health", server.config()).unwrap();

    assert_ne!(first.instance_id, second.instance_id);
    assert_eq!(second.ref_count, 1);
    wait_for("connected", || {
        manager.status("health") == Some(ConnectionStatus::Connected)
    })
    .await;
}
