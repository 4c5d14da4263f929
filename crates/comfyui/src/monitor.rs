//! Completion tracking for a single submitted prompt.
//!
//! [`CompletionMonitor`] is a small state machine
//! (`Waiting -> Done | Failed`) driven by [`ComfyUIMessage`]s. It only
//! reacts to messages tagged with its own prompt ID, so several jobs can
//! share one ComfyUI instance. [`CompletionMonitor::wait`] pulls frames
//! from any [`EventSource`] until a terminal state is reached.

use std::fmt;

use async_trait::async_trait;

use crate::messages::{parse_frame, ComfyUIMessage, Frame};

/// Result of a single receive on an event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A text frame carrying a JSON message.
    Text(String),
    /// Nothing arrived within the per-receive timeout.
    Timeout,
    /// A frame with no monitoring value (binary preview, ping, pong).
    Other,
    /// The peer closed the channel or the stream ended.
    Closed,
}

/// A source of raw event frames, such as a ComfyUI WebSocket.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next frame, bounded by the source's per-receive
    /// timeout. Errors are fatal to the channel.
    async fn receive(&mut self) -> Result<Received, MonitorError>;

    /// Release the channel. Calling it more than once is a no-op.
    async fn close(&mut self);
}

/// Errors that end monitoring without a terminal execution state.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The channel failed (connection reset, protocol violation, etc.).
    #[error("Event channel error: {0}")]
    Channel(String),

    /// The stream ended before the prompt completed or failed.
    #[error("Event channel closed before prompt {prompt_id} finished executing")]
    ClosedBeforeCompletion { prompt_id: String },
}

/// Diagnostic captured from an `execution_error` or
/// `execution_interrupted` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub prompt_id: String,
    pub node_id: Option<String>,
    pub node_type: Option<String>,
    pub exception_type: String,
    pub exception_message: String,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Workflow execution error")?;
        match (&self.node_type, &self.node_id) {
            (Some(node_type), Some(node_id)) => write!(f, " in node {node_id} ({node_type})")?,
            (None, Some(node_id)) => write!(f, " in node {node_id}")?,
            _ => {}
        }
        if self.exception_type.is_empty() {
            write!(f, ": {}", self.exception_message)
        } else {
            write!(f, ": {}: {}", self.exception_type, self.exception_message)
        }
    }
}

/// Monitor state for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Waiting,
    Done,
    Failed(ExecutionFailure),
}

/// Terminal result of [`CompletionMonitor::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The graph finished executing.
    Completed,
    /// ComfyUI reported an error for the prompt.
    Failed(ExecutionFailure),
}

/// Tracks completion of a single prompt.
#[derive(Debug)]
pub struct CompletionMonitor {
    prompt_id: String,
    state: MonitorState,
}

impl CompletionMonitor {
    pub fn new(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            state: MonitorState::Waiting,
        }
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Apply one message to the state machine.
    ///
    /// Terminal states are sticky: once `Done` or `Failed`, further
    /// messages are ignored.
    pub fn observe(&mut self, message: &ComfyUIMessage) -> &MonitorState {
        if self.state != MonitorState::Waiting {
            return &self.state;
        }

        if let ComfyUIMessage::Status(data) = message {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
            return &self.state;
        }

        if message.prompt_id().is_some_and(|id| id != self.prompt_id) {
            tracing::trace!(
                prompt_id = %self.prompt_id,
                other_prompt_id = message.prompt_id().unwrap_or_default(),
                "Ignoring message for another prompt",
            );
            return &self.state;
        }

        match message {
            ComfyUIMessage::Executing(data) => match &data.node {
                Some(node) => {
                    tracing::debug!(prompt_id = %self.prompt_id, node = %node, "Executing node");
                }
                None => {
                    tracing::info!(
                        prompt_id = %self.prompt_id,
                        "Execution completed (all nodes done)",
                    );
                    self.state = MonitorState::Done;
                }
            },
            ComfyUIMessage::ExecutionError(data) => {
                tracing::error!(
                    prompt_id = %self.prompt_id,
                    node_id = %data.node_id,
                    node_type = %data.node_type,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                self.state = MonitorState::Failed(ExecutionFailure {
                    prompt_id: data.prompt_id.clone(),
                    node_id: Some(data.node_id.clone()),
                    node_type: Some(data.node_type.clone()).filter(|t| !t.is_empty()),
                    exception_type: data.exception_type.clone(),
                    exception_message: data.exception_message.clone(),
                });
            }
            ComfyUIMessage::ExecutionInterrupted(data) => {
                tracing::warn!(
                    prompt_id = %self.prompt_id,
                    node_id = ?data.node_id,
                    "Execution interrupted",
                );
                self.state = MonitorState::Failed(ExecutionFailure {
                    prompt_id: data.prompt_id.clone(),
                    node_id: data.node_id.clone(),
                    node_type: data.node_type.clone(),
                    exception_type: "Interrupted".to_string(),
                    exception_message: "Execution was interrupted".to_string(),
                });
            }
            ComfyUIMessage::Progress(data) => {
                tracing::debug!(
                    prompt_id = %self.prompt_id,
                    value = data.value,
                    max = data.max,
                    percent = data.percent(),
                    "Generation progress",
                );
            }
            ComfyUIMessage::ExecutionStart(_) => {
                tracing::info!(prompt_id = %self.prompt_id, "Execution started");
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(
                    prompt_id = %self.prompt_id,
                    cached_nodes = data.nodes.len(),
                    "Execution used cache",
                );
            }
            ComfyUIMessage::Executed(data) => {
                tracing::debug!(
                    prompt_id = %self.prompt_id,
                    node = %data.node,
                    "Node executed with output",
                );
            }
            ComfyUIMessage::Status(_) => {}
        }

        &self.state
    }

    /// Apply a frame whose payload did not match its declared `type`.
    ///
    /// A failure report for this prompt still fails it, with whatever
    /// fields could be read and the raw payload as the message otherwise.
    /// Anything else is ignored.
    pub fn observe_malformed(&mut self, text: &str) -> &MonitorState {
        if self.state != MonitorState::Waiting {
            return &self.state;
        }

        let Ok(raw) = serde_json::from_str::<serde_json::Value>(text) else {
            return &self.state;
        };
        let kind = raw.get("type").and_then(serde_json::Value::as_str).unwrap_or_default();
        if !matches!(kind, "execution_error" | "execution_interrupted") {
            return &self.state;
        }

        let data = raw.get("data").cloned().unwrap_or(serde_json::Value::Null);
        if data.get("prompt_id").and_then(serde_json::Value::as_str) != Some(self.prompt_id.as_str()) {
            return &self.state;
        }

        let field = |name: &str| match data.get(name) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let failure = ExecutionFailure {
            prompt_id: self.prompt_id.clone(),
            node_id: field("node_id"),
            node_type: field("node_type").filter(|t| !t.is_empty()),
            exception_type: field("exception_type").unwrap_or_else(|| {
                if kind == "execution_interrupted" {
                    "Interrupted".to_string()
                } else {
                    String::new()
                }
            }),
            exception_message: field("exception_message").unwrap_or_else(|| data.to_string()),
        };

        tracing::error!(
            prompt_id = %self.prompt_id,
            kind = %kind,
            failure = %failure,
            "Malformed failure report for tracked prompt",
        );
        self.state = MonitorState::Failed(failure);
        &self.state
    }

    /// Pull frames from `source` until the prompt completes or fails.
    ///
    /// Receive timeouts are retried indefinitely. A closed stream before a
    /// terminal state is an error, as is any fatal channel error.
    pub async fn wait<S>(mut self, source: &mut S) -> Result<CompletionOutcome, MonitorError>
    where
        S: EventSource + ?Sized,
    {
        loop {
            match source.receive().await? {
                Received::Text(text) => match parse_frame(&text) {
                    Ok(Frame::Message(message)) => match self.observe(&message) {
                        MonitorState::Waiting => {}
                        MonitorState::Done => return Ok(CompletionOutcome::Completed),
                        MonitorState::Failed(failure) => {
                            return Ok(CompletionOutcome::Failed(failure.clone()))
                        }
                    },
                    Ok(Frame::Unrecognized { kind }) => {
                        tracing::trace!(kind = %kind, "Ignoring unmodelled ComfyUI message");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            raw_message = %text,
                            "Failed to parse ComfyUI message",
                        );
                        if let MonitorState::Failed(failure) = self.observe_malformed(&text) {
                            return Ok(CompletionOutcome::Failed(failure.clone()));
                        }
                    }
                },
                Received::Timeout => {
                    tracing::debug!(prompt_id = %self.prompt_id, "No event yet, still waiting");
                }
                Received::Other => {}
                Received::Closed => {
                    return Err(MonitorError::ClosedBeforeCompletion {
                        prompt_id: self.prompt_id,
                    });
                }
            }
        }
    }
}
