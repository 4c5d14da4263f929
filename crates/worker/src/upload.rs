//! Reference image upload.
//!
//! Images referenced by `LoadImage` nodes must exist in ComfyUI's input
//! directory before the workflow is queued.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use genpod_comfyui::api::ComfyUIApi;

use crate::input::InputImage;

/// Outcome of uploading a batch of reference images.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Names of images stored successfully.
    pub uploaded: Vec<String>,
    /// One message per image that could not be decoded or stored.
    pub errors: Vec<String>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Decode inline image data, stripping a `data:<mime>;base64,` prefix if
/// present.
pub fn decode_image_data(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, payload)| payload),
        None => data,
    };

    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD.decode(compact)
}

/// Upload every image, continuing past individual failures.
///
/// Existing files with the same name are overwritten.
pub async fn upload_images(api: &ComfyUIApi, images: &[InputImage]) -> UploadReport {
    let mut report = UploadReport::default();

    for image in images {
        let bytes = match decode_image_data(&image.image) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(name = %image.name, error = %e, "Failed to decode image");
                report
                    .errors
                    .push(format!("Error decoding base64 for {}: {e}", image.name));
                continue;
            }
        };

        let size = bytes.len();
        match api.upload_image(&image.name, bytes, true).await {
            Ok(stored) => {
                tracing::info!(name = %stored.name, bytes = size, "Uploaded reference image");
                report.uploaded.push(image.name.clone());
            }
            Err(e) => {
                tracing::warn!(name = %image.name, error = %e, "Failed to upload image");
                report
                    .errors
                    .push(format!("Error uploading {}: {e}", image.name));
            }
        }
    }

    tracing::info!(
        uploaded = report.uploaded.len(),
        failed = report.errors.len(),
        "Image upload finished",
    );

    report
}
