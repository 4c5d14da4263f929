//! In-process mock of the ComfyUI HTTP and WebSocket API.
//!
//! Each test builds a [`MockComfy`], scripts its responses, and points a
//! [`WorkerConfig`] at the ephemeral port it listens on.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;

use genpod_comfyui::probe::ProbeConfig;
use genpod_worker::config::WorkerConfig;

/// A reference image received by `/upload/image`.
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub filename: String,
    pub overwrite: String,
    pub bytes: Vec<u8>,
}

/// Scripted behaviour and recorded traffic of the mock server.
pub struct MockState {
    pub healthy: AtomicBool,
    /// Status and JSON body returned by `POST /prompt`.
    pub submit_response: Mutex<(StatusCode, Value)>,
    /// Text frames sent on `/ws` once a prompt has been submitted.
    pub events: Mutex<Vec<String>>,
    /// When false the socket is closed right after `events` are sent.
    pub hold_open: AtomicBool,
    /// Body returned by `GET /history/{prompt_id}`.
    pub history: Mutex<Value>,
    /// Files served by `GET /view`, keyed by filename.
    pub artifacts: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_uploads: AtomicBool,

    pub submissions: Mutex<Vec<Value>>,
    pub uploads: Mutex<Vec<ReceivedUpload>>,
    pub ws_client_ids: Mutex<Vec<String>>,
    pub fetched: Mutex<Vec<String>>,
    submitted: Notify,
}

#[derive(Clone)]
pub struct MockComfy {
    pub state: Arc<MockState>,
    pub port: u16,
}

impl MockComfy {
    /// Start a healthy server that accepts prompts as `prompt_id`.
    pub async fn start(prompt_id: &str) -> Self {
        let state = Arc::new(MockState {
            healthy: AtomicBool::new(true),
            submit_response: Mutex::new((
                StatusCode::OK,
                json!({"prompt_id": prompt_id, "number": 1, "node_errors": {}}),
            )),
            events: Mutex::new(Vec::new()),
            hold_open: AtomicBool::new(true),
            history: Mutex::new(json!({})),
            artifacts: Mutex::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
            submissions: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            ws_client_ids: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
            submitted: Notify::new(),
        });

        let app = Router::new()
            .route("/", get(health))
            .route("/prompt", post(submit))
            .route("/upload/image", post(upload))
            .route("/history/{prompt_id}", get(history))
            .route("/view", get(view))
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, port }
    }

    /// Worker configuration pointing at this server with short budgets.
    pub fn config(&self) -> WorkerConfig {
        test_config(self.port)
    }

    pub fn set_events(&self, events: &[Value]) {
        *self.state.events.lock().unwrap() = events.iter().map(Value::to_string).collect();
    }

    pub fn set_history(&self, history: Value) {
        *self.state.history.lock().unwrap() = history;
    }

    pub fn set_submit_response(&self, status: StatusCode, body: Value) {
        *self.state.submit_response.lock().unwrap() = (status, body);
    }

    pub fn add_artifact(&self, filename: &str, bytes: &[u8]) {
        self.state
            .artifacts
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.state.submissions.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn ws_client_ids(&self) -> Vec<String> {
        self.state.ws_client_ids.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.fetched.lock().unwrap().clone()
    }
}

/// Worker configuration for a ComfyUI on `127.0.0.1:port`.
pub fn test_config(port: u16) -> WorkerConfig {
    WorkerConfig {
        comfy_host: "127.0.0.1".to_string(),
        comfy_port: port,
        probe: ProbeConfig {
            max_attempts: 2,
            interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(2),
        },
        receive_timeout: Duration::from_millis(200),
        ..WorkerConfig::default()
    }
}

/// `executing` message with `node: null`, signalling completion.
pub fn executing_done(prompt_id: &str) -> Value {
    json!({"type": "executing", "data": {"node": null, "prompt_id": prompt_id}})
}

pub fn executing_node(prompt_id: &str, node: &str) -> Value {
    json!({"type": "executing", "data": {"node": node, "prompt_id": prompt_id}})
}

pub fn status(queue_remaining: i32) -> Value {
    json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": queue_remaining}}}})
}

// ---- handlers ----

async fn health(State(state): State<Arc<MockState>>) -> StatusCode {
    if state.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn submit(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.submissions.lock().unwrap().push(body);
    let (status, response) = state.submit_response.lock().unwrap().clone();
    if status.is_success() {
        state.submitted.notify_one();
    }
    (status, Json(response))
}

async fn upload(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> impl IntoResponse {
    let mut received = ReceivedUpload {
        filename: String::new(),
        overwrite: String::new(),
        bytes: Vec::new(),
    };

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("image") => {
                received.filename = field.file_name().unwrap_or_default().to_string();
                received.bytes = field.bytes().await.unwrap().to_vec();
            }
            Some("overwrite") => {
                received.overwrite = field.text().await.unwrap();
            }
            _ => {}
        }
    }

    if state.fail_uploads.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "disk full"})));
    }

    let name = received.filename.clone();
    state.uploads.lock().unwrap().push(received);
    (
        StatusCode::OK,
        Json(json!({"name": name, "subfolder": "", "type": "input"})),
    )
}

async fn history(
    State(state): State<Arc<MockState>>,
    Path(_prompt_id): Path<String>,
) -> Json<Value> {
    Json(state.history.lock().unwrap().clone())
}

async fn view(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let filename = params.get("filename").cloned().unwrap_or_default();
    state.fetched.lock().unwrap().push(filename.clone());
    match state.artifacts.lock().unwrap().get(&filename) {
        Some(bytes) => (StatusCode::OK, bytes.clone()),
        None => (StatusCode::NOT_FOUND, b"404: Not Found".to_vec()),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if let Some(client_id) = params.get("clientId") {
        state.ws_client_ids.lock().unwrap().push(client_id.clone());
    }
    ws.on_upgrade(move |socket| drive_socket(socket, state))
}

/// Send the scripted events once a prompt is submitted, then either hang
/// up or wait for the client to close.
async fn drive_socket(mut socket: WebSocket, state: Arc<MockState>) {
    tokio::select! {
        _ = state.submitted.notified() => {}
        _ = socket.recv() => return,
    }

    let events = state.events.lock().unwrap().clone();
    for event in events {
        if socket.send(Message::Text(event.into())).await.is_err() {
            return;
        }
    }

    if !state.hold_open.load(Ordering::SeqCst) {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Close(_) = message {
            break;
        }
    }
}
