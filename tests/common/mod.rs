//! In-process SSE server and recorders shared by the integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use dashboard_stream::{ConnectionConfig, ConnectionStatus, StatusListener, StreamError};

/// One SSE event sent by the mock server
#[derive(Debug, Clone)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

impl Frame {
    pub fn raw(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn json(value: Value) -> Self {
        Self::raw(value.to_string())
    }

    pub fn named(mut self, event: &str) -> Self {
        self.event = Some(event.to_string());
        self
    }

    pub fn connected() -> Self {
        Self::json(json!({ "type": "connected" }))
    }

    pub fn heartbeat() -> Self {
        Self::json(json!({ "type": "heartbeat" }))
    }

    pub fn data(payload: Value) -> Self {
        Self::json(json!({ "type": "data", "data": payload }))
    }

    pub fn error(message: &str) -> Self {
        Self::json(json!({ "type": "error", "error": message }))
    }
}

/// How the mock server answers one stream request
pub enum Reply {
    Unauthorized,
    Status(StatusCode),
    /// Never send response headers
    Stall,
    /// Send `frames`, then either hold the response open or end it
    Events { frames: Vec<Frame>, hold_open: bool },
}

impl Reply {
    pub fn open(frames: Vec<Frame>) -> Self {
        Self::Events {
            frames,
            hold_open: true,
        }
    }

    pub fn close_after(frames: Vec<Frame>) -> Self {
        Self::Events {
            frames,
            hold_open: false,
        }
    }
}

type Behavior = dyn Fn(usize, Option<&str>) -> Reply + Send + Sync;

struct MockState {
    requests: AtomicUsize,
    authorization: Mutex<Vec<Option<String>>>,
    behavior: Box<Behavior>,
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Serve `/stream`, answering request `n` (0-based) with `behavior(n, authorization)`.
    pub async fn start<F>(behavior: F) -> Self
    where
        F: Fn(usize, Option<&str>) -> Reply + Send + Sync + 'static,
    {
        let state = Arc::new(MockState {
            requests: AtomicUsize::new(0),
            authorization: Mutex::new(Vec::new()),
            behavior: Box::new(behavior),
        });

        let app = Router::new()
            .route("/stream", get(stream_handler))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/stream", self.addr)
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn authorization_seen(&self) -> Vec<Option<String>> {
        self.state.authorization.lock().unwrap().clone()
    }

    /// Config pointing at this server with short backoff delays
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.url())
            .timeout(Duration::from_secs(2))
            .reconnect_delay(Duration::from_millis(20))
            .max_reconnect_delay(Duration::from_millis(100))
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn stream_handler(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let index = state.requests.fetch_add(1, Ordering::SeqCst);
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state
        .authorization
        .lock()
        .unwrap()
        .push(authorization.clone());

    match (state.behavior)(index, authorization.as_deref()) {
        Reply::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
        Reply::Status(code) => code.into_response(),
        Reply::Stall => std::future::pending::<Response>().await,
        Reply::Events { frames, hold_open } => {
            let stream = async_stream::stream! {
                for frame in frames {
                    let mut event = Event::default().data(frame.data);
                    if let Some(name) = frame.event {
                        event = event.event(name);
                    }
                    yield Ok::<Event, Infallible>(event);
                }
                if hold_open {
                    std::future::pending::<()>().await;
                }
            };
            Sse::new(stream).into_response()
        }
    }
}

/// Records every status notification in order
#[derive(Clone, Default)]
pub struct StatusLog {
    entries: Arc<Mutex<Vec<(ConnectionStatus, Option<StreamError>)>>>,
}

impl StatusLog {
    pub fn listener(&self) -> StatusListener {
        let entries = Arc::clone(&self.entries);
        Arc::new(move |status, error| {
            entries.lock().unwrap().push((status, error.cloned()));
        })
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.entries.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub fn errors(&self) -> Vec<StreamError> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, e)| e.clone())
            .collect()
    }

    pub fn count(&self, status: ConnectionStatus) -> usize {
        self.statuses().into_iter().filter(|s| *s == status).count()
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}
