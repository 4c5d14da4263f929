//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance. Call [`ComfyUIClient::connect`] to establish a
//! live [`ComfyUIConnection`], which implements [`EventSource`] so it can
//! drive a [`CompletionMonitor`](crate::monitor::CompletionMonitor).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::monitor::{EventSource, MonitorError, Received};

/// Default bound on a single receive before the monitor re-issues the wait.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens event channels scoped to a client ID.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    type Source: EventSource;

    /// Open a channel that receives events addressed to `client_id`.
    async fn open(&self, client_id: &str) -> Result<Self::Source, ComfyUIClientError>;
}

/// Configuration handle for a ComfyUI instance's event channel.
pub struct ComfyUIClient {
    ws_url: String,
    receive_timeout: Duration,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    ws_stream: tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    receive_timeout: Duration,
    closed: bool,
}

impl std::fmt::Debug for ComfyUIConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComfyUIConnection")
            .field("client_id", &self.client_id)
            .field("receive_timeout", &self.receive_timeout)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ComfyUIClient {
    /// Create a new client targeting a specific ComfyUI instance.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }

    /// Bound each receive on connections opened by this client.
    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// `client_id` is appended as a query parameter so that ComfyUI
    /// addresses execution events for prompts submitted with the same ID
    /// to this connection.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
            receive_timeout: self.receive_timeout,
            closed: false,
        })
    }
}

#[async_trait]
impl ChannelConnector for ComfyUIClient {
    type Source = ComfyUIConnection;

    async fn open(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        self.connect(client_id).await
    }
}

#[async_trait]
impl EventSource for ComfyUIConnection {
    async fn receive(&mut self) -> Result<Received, MonitorError> {
        if self.closed {
            return Ok(Received::Closed);
        }

        let next = match tokio::time::timeout(self.receive_timeout, self.ws_stream.next()).await {
            Ok(next) => next,
            Err(_elapsed) => return Ok(Received::Timeout),
        };

        match next {
            Some(Ok(Message::Text(text))) => Ok(Received::Text(text.to_string())),
            Some(Ok(Message::Binary(_))) => {
                // ComfyUI sends binary messages for preview images.
                tracing::trace!(client_id = %self.client_id, "Ignoring binary message (preview image)");
                Ok(Received::Other)
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                // Ping/pong are answered by tungstenite.
                Ok(Received::Other)
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(client_id = %self.client_id, ?frame, "ComfyUI WebSocket closed");
                Ok(Received::Closed)
            }
            Some(Err(e)) => {
                tracing::error!(client_id = %self.client_id, error = %e, "WebSocket receive error");
                Err(MonitorError::Channel(e.to_string()))
            }
            None => Ok(Received::Closed),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.ws_stream.close(None).await {
            tracing::debug!(client_id = %self.client_id, error = %e, "WebSocket close handshake failed");
        } else {
            tracing::debug!(client_id = %self.client_id, "WebSocket closed");
        }
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
