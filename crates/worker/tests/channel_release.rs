//! The event channel is opened once per job and closed exactly once on
//! every exit path after it was opened.
//!
//! Uses a scripted [`ChannelConnector`] so the channel's lifecycle can be
//! counted precisely; HTTP traffic still goes to the mock ComfyUI server.

mod common;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::json;

use common::{executing_done, MockComfy};
use genpod_comfyui::client::{ChannelConnector, ComfyUIClientError};
use genpod_comfyui::monitor::{EventSource, MonitorError, Received};
use genpod_worker::handler::{JobHandler, JobOutput};

type Script = fn() -> Vec<Result<Received, MonitorError>>;

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

struct ScriptedConnector {
    script: Script,
    counters: Arc<Counters>,
}

struct ScriptedSource {
    frames: VecDeque<Result<Received, MonitorError>>,
    counters: Arc<Counters>,
}

#[async_trait]
impl ChannelConnector for ScriptedConnector {
    type Source = ScriptedSource;

    async fn open(&self, _client_id: &str) -> Result<ScriptedSource, ComfyUIClientError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSource {
            frames: (self.script)().into(),
            counters: Arc::clone(&self.counters),
        })
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn receive(&mut self) -> Result<Received, MonitorError> {
        self.frames.pop_front().unwrap_or(Ok(Received::Closed))
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn handler_with(mock: &MockComfy, script: Script) -> (JobHandler<ScriptedConnector>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let connector = ScriptedConnector {
        script,
        counters: Arc::clone(&counters),
    };
    (JobHandler::new(&mock.config(), connector), counters)
}

fn completes() -> Vec<Result<Received, MonitorError>> {
    vec![
        Ok(Received::Timeout),
        Ok(Received::Text(executing_done("abc").to_string())),
    ]
}

fn drops_connection() -> Vec<Result<Received, MonitorError>> {
    vec![
        Ok(Received::Timeout),
        Err(MonitorError::Channel("connection reset by peer".into())),
    ]
}

fn input() -> serde_json::Value {
    json!({"workflow": {"1": {"inputs": {}, "class_type": "SaveImage"}}})
}

#[tokio::test]
async fn closed_once_after_success() {
    let mock = MockComfy::start("abc").await;
    mock.set_history(json!({"abc": {"outputs": {}}}));
    let (handler, counters) = handler_with(&mock, completes);

    let output = handler.run(&input()).await;

    assert_matches!(output, JobOutput::Completed { .. });
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closed_once_after_submission_failure() {
    let mock = MockComfy::start("abc").await;
    mock.set_submit_response(StatusCode::BAD_REQUEST, json!({"error": "invalid prompt"}));
    let (handler, counters) = handler_with(&mock, completes);

    let output = handler.run(&input()).await;

    assert_matches!(output, JobOutput::Failed { error } if error.contains("invalid prompt"));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closed_once_after_channel_failure() {
    let mock = MockComfy::start("abc").await;
    let (handler, counters) = handler_with(&mock, drops_connection);

    let output = handler.run(&input()).await;

    assert_matches!(output, JobOutput::Failed { error } if error.contains("connection reset"));
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closed_once_after_collection_failure() {
    let mock = MockComfy::start("abc").await;
    mock.set_history(json!({}));
    let (handler, counters) = handler_with(&mock, completes);

    let output = handler.run(&input()).await;

    assert_matches!(output, JobOutput::Failed { .. });
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn never_opened_when_validation_fails() {
    let mock = MockComfy::start("abc").await;
    let (handler, counters) = handler_with(&mock, completes);

    let output = handler.run(&json!({"images": []})).await;

    assert_matches!(output, JobOutput::Failed { .. });
    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
}
