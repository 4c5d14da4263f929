//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, reference image
//! upload, history retrieval, artifact download) using [`reqwest`].

use std::time::Duration;

use serde::Deserialize;

use crate::history::{ArtifactRef, History};

/// Per-endpoint request timeouts.
#[derive(Debug, Clone)]
pub struct RequestTimeouts {
    /// `POST /upload/image`, applied per image.
    pub upload: Duration,
    /// `POST /prompt`.
    pub submit: Duration,
    /// `GET /history/{prompt_id}`.
    pub history: Duration,
    /// `GET /view`, applied per artifact.
    pub fetch: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            upload: Duration::from_secs(30),
            submit: Duration::from_secs(30),
            history: Duration::from_secs(30),
            fetch: Duration::from_secs(60),
        }
    }
}

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    timeouts: RequestTimeouts,
}

/// Response returned by the ComfyUI `/prompt` endpoint.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
    /// Per-node validation errors; empty object when the graph is valid.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Response returned by `/upload/image`.
#[derive(Debug, Deserialize)]
pub struct UploadedImage {
    /// Name the server stored the file under.
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Errors from submitting a workflow to `/prompt`.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// ComfyUI rejected the workflow, typically a 400 from graph validation.
    #[error("Workflow rejected by ComfyUI ({status}): {diagnostic}")]
    Rejected { status: u16, diagnostic: String },

    /// A success response that carried no `prompt_id`.
    #[error("ComfyUI accepted the workflow but returned no prompt_id")]
    MissingPromptId,

    #[error(transparent)]
    Request(#[from] ComfyUIApiError),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            timeouts: RequestTimeouts::default(),
        }
    }

    /// Replace the default per-endpoint timeouts.
    pub fn with_timeouts(mut self, timeouts: RequestTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution and return its `prompt_id`.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. The client ID binds the prompt to the event channel
    /// opened under the same ID.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, SubmissionError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .timeout(self.timeouts.submit)
            .json(&body)
            .send()
            .await
            .map_err(ComfyUIApiError::from)?;

        let submitted: SubmitResponse = match Self::parse_response(response).await {
            Ok(submitted) => submitted,
            Err(ComfyUIApiError::ApiError { status, body }) => {
                return Err(SubmissionError::Rejected {
                    status,
                    diagnostic: engine_diagnostic(&body),
                });
            }
            Err(e) => return Err(e.into()),
        };

        match submitted.prompt_id {
            Some(prompt_id) if !prompt_id.is_empty() => {
                tracing::info!(
                    prompt_id = %prompt_id,
                    queue_number = submitted.number,
                    "Workflow submitted to ComfyUI",
                );
                Ok(prompt_id)
            }
            _ => Err(SubmissionError::MissingPromptId),
        }
    }

    /// Upload a reference image to the server's input directory.
    ///
    /// Sends a multipart `POST /upload/image` with the raw bytes under
    /// `image` and an `overwrite` flag.
    pub async fn upload_image(
        &self,
        name: &str,
        bytes: Vec<u8>,
        overwrite: bool,
    ) -> Result<UploadedImage, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str(image_mime_type(name))?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", overwrite.to_string());

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .timeout(self.timeouts.upload)
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. ComfyUI answers with an
    /// empty object when it has no record of the prompt.
    pub async fn get_history(&self, prompt_id: &str) -> Result<History, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(self.timeouts.history)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the raw bytes of a generated artifact via `GET /view`.
    pub async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .timeout(self.timeouts.fetch)
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.kind.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Extract a readable diagnostic from a ComfyUI `/prompt` error body.
///
/// ComfyUI reports validation failures as
/// `{"error": {"message", "details"}, "node_errors": {id: {"class_type", "errors": [...]}}}`.
/// Falls back to the raw body when it is not in that shape.
pub fn engine_diagnostic(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };

    let mut parts = Vec::new();

    match value.get("error") {
        Some(serde_json::Value::String(message)) => parts.push(message.clone()),
        Some(error) => {
            if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
                parts.push(with_details(message, error.get("details")));
            }
        }
        None => {}
    }

    if let Some(nodes) = value.get("node_errors").and_then(|n| n.as_object()) {
        for (node_id, node) in nodes {
            let class_type = node
                .get("class_type")
                .and_then(|c| c.as_str())
                .unwrap_or("unknown");
            let errors = node.get("errors").and_then(|e| e.as_array());
            for error in errors.into_iter().flatten() {
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("invalid node");
                parts.push(format!(
                    "node {node_id} ({class_type}): {}",
                    with_details(message, error.get("details"))
                ));
            }
        }
    }

    if parts.is_empty() {
        body.trim().to_string()
    } else {
        parts.join("; ")
    }
}

fn with_details(message: &str, details: Option<&serde_json::Value>) -> String {
    match details.and_then(|d| d.as_str()) {
        Some(details) if !details.is_empty() => format!("{message}: {details}"),
        _ => message.to_string(),
    }
}

/// Content type for an uploaded image, guessed from its file extension.
fn image_mime_type(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_mime_type_follows_extension() {
        assert_eq!(image_mime_type("ref.png"), "image/png");
        assert_eq!(image_mime_type("photo.JPG"), "image/jpeg");
        assert_eq!(image_mime_type("mask.webp"), "image/webp");
        assert_eq!(image_mime_type("noext"), "application/octet-stream");
        assert_eq!(image_mime_type("archive.tar.gz"), "application/octet-stream");
    }

    #[test]
    fn diagnostic_includes_error_and_node_errors() {
        let body = r#"{
            "error": {"type": "prompt_outputs_failed_validation", "message": "Prompt outputs failed validation", "details": "", "extra_info": {}},
            "node_errors": {
                "9": {
                    "errors": [{"type": "required_input_missing", "message": "Required input is missing", "details": "images", "extra_info": {}}],
                    "dependent_outputs": ["9"],
                    "class_type": "SaveImage"
                }
            }
        }"#;

        assert_eq!(
            engine_diagnostic(body),
            "Prompt outputs failed validation; node 9 (SaveImage): Required input is missing: images"
        );
    }

    #[test]
    fn diagnostic_accepts_plain_string_error() {
        let body = r#"{"error": "no prompt", "node_errors": []}"#;
        assert_eq!(engine_diagnostic(body), "no prompt");
    }

    #[test]
    fn diagnostic_falls_back_to_raw_body() {
        assert_eq!(engine_diagnostic("  Bad Request\n"), "Bad Request");
        assert_eq!(engine_diagnostic(r#"{"unexpected": true}"#), r#"{"unexpected": true}"#);
    }

    #[test]
    fn submit_response_tolerates_missing_fields() {
        let parsed: SubmitResponse = serde_json::from_str(r#"{"number": 2}"#).unwrap();
        assert!(parsed.prompt_id.is_none());
        assert_eq!(parsed.number, Some(2));

        let parsed: SubmitResponse =
            serde_json::from_str(r#"{"prompt_id": "abc", "number": 0, "node_errors": {}}"#)
                .unwrap();
        assert_eq!(parsed.prompt_id.as_deref(), Some("abc"));
    }

    #[test]
    fn api_url_drops_trailing_slash() {
        let api = ComfyUIApi::new("http://127.0.0.1:3001/".into());
        assert_eq!(api.api_url(), "http://127.0.0.1:3001");
    }
}
