//! Result collection.
//!
//! After a prompt finishes, its history record lists every file the
//! output nodes wrote. [`collect`] downloads the deliverable ones and
//! base64-encodes them for the job response.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use genpod_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use serde::Serialize;

/// A generated image ready to return to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedImage {
    pub filename: String,
    /// Base64-encoded file contents.
    pub data: String,
}

/// Images collected for a prompt plus per-artifact failures.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultSet {
    pub images: Vec<EncodedImage>,
    pub errors: Vec<String>,
}

/// Errors that prevent collection altogether.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// ComfyUI reported completion but has no history for the prompt.
    #[error("Prompt {prompt_id} not found in ComfyUI history after completion")]
    Missing { prompt_id: String },

    #[error("Failed to fetch history: {0}")]
    Fetch(#[from] ComfyUIApiError),
}

/// Fetch and encode every non-temporary artifact produced by `prompt_id`.
///
/// A malformed history entry or a failed download is recorded in
/// [`ResultSet::errors`] and collection continues with the next artifact.
pub async fn collect(api: &ComfyUIApi, prompt_id: &str) -> Result<ResultSet, HistoryError> {
    let mut history = api.get_history(prompt_id).await?;
    let entry = history
        .remove(prompt_id)
        .ok_or_else(|| HistoryError::Missing {
            prompt_id: prompt_id.to_string(),
        })?;

    let mut results = ResultSet::default();

    for (node_id, artifact) in entry.artifacts() {
        let artifact = match artifact {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(
                    prompt_id = %prompt_id,
                    node_id = %node_id,
                    error = %e,
                    "Malformed artifact entry in history",
                );
                results
                    .errors
                    .push(format!("Malformed artifact entry from node {node_id}: {e}"));
                continue;
            }
        };

        if artifact.is_temporary() {
            tracing::debug!(
                prompt_id = %prompt_id,
                node_id = %node_id,
                filename = %artifact.filename,
                "Skipping temporary artifact",
            );
            continue;
        }

        match api.fetch_artifact(&artifact).await {
            Ok(bytes) => {
                tracing::debug!(
                    prompt_id = %prompt_id,
                    filename = %artifact.filename,
                    bytes = bytes.len(),
                    "Fetched artifact",
                );
                results.images.push(EncodedImage {
                    filename: artifact.filename.clone(),
                    data: STANDARD.encode(&bytes),
                });
            }
            Err(e) => {
                tracing::warn!(
                    prompt_id = %prompt_id,
                    node_id = %node_id,
                    filename = %artifact.filename,
                    error = %e,
                    "Failed to fetch artifact",
                );
                results.errors.push(format!(
                    "Failed to fetch {} from node {node_id}: {e}",
                    artifact.filename
                ));
            }
        }
    }

    tracing::info!(
        prompt_id = %prompt_id,
        images = results.images.len(),
        errors = results.errors.len(),
        "Collected outputs",
    );

    Ok(results)
}
