use genpod_comfyui::api::SubmissionError;
use genpod_comfyui::client::ComfyUIClientError;
use genpod_comfyui::monitor::MonitorError;

use crate::collector::HistoryError;
use crate::input::ValidationError;

/// Terminal failures of a job. Each is reported to the caller as
/// `{"error": "<message>"}`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("ComfyUI API unavailable at {url} after {attempts} attempts")]
    Unavailable { url: String, attempts: u32 },

    #[error("Failed to upload input images: {}", .0.join("; "))]
    Upload(Vec<String>),

    #[error("Failed to open event channel: {0}")]
    Channel(#[from] ComfyUIClientError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    History(#[from] HistoryError),
}
