//! Job input validation.
//!
//! A job input is `{"workflow": {...}, "images": [{"name", "image"}]}`,
//! either as structured JSON or as a JSON-encoded string. [`validate`]
//! checks the shape only; whether the node graph actually makes sense is
//! left to ComfyUI at submission time.

use serde::Deserialize;
use serde_json::Value;

/// A reference image supplied with the job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InputImage {
    /// File name the image is stored under in ComfyUI's input directory.
    pub name: String,
    /// Base64 data, optionally prefixed with a `data:<mime>;base64,` marker.
    pub image: String,
}

/// A ComfyUI node graph in API format: node ID to node descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowGraph(Value);

impl WorkflowGraph {
    /// The graph as submitted to `/prompt`.
    pub fn as_json(&self) -> &Value {
        &self.0
    }

    pub fn node_count(&self) -> usize {
        self.0.as_object().map_or(0, |nodes| nodes.len())
    }
}

/// Job input that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedJob {
    pub workflow: WorkflowGraph,
    pub images: Vec<InputImage>,
}

/// Reasons a job input is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Missing 'workflow' parameter")]
    MissingWorkflow,

    #[error("Invalid 'workflow': {0}")]
    InvalidWorkflow(String),

    #[error("Malformed 'images': {0}")]
    MalformedImages(String),
}

/// Validate a raw job input.
pub fn validate(raw: &Value) -> Result<ValidatedJob, ValidationError> {
    let parsed;
    let input = match raw {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text)
                .map_err(|e| ValidationError::Malformed(format!("invalid JSON: {e}")))?;
            &parsed
        }
        other => other,
    };

    let fields = input
        .as_object()
        .ok_or_else(|| ValidationError::Malformed("input must be a JSON object".into()))?;

    let workflow = match fields.get("workflow") {
        None | Some(Value::Null) => return Err(ValidationError::MissingWorkflow),
        Some(workflow) => validate_workflow(workflow)?,
    };

    let images = match fields.get("images") {
        None | Some(Value::Null) => Vec::new(),
        Some(images) => validate_images(images)?,
    };

    Ok(ValidatedJob { workflow, images })
}

fn validate_workflow(workflow: &Value) -> Result<WorkflowGraph, ValidationError> {
    // Some callers send the API-format graph as an encoded string.
    let graph = match workflow {
        Value::String(text) => serde_json::from_str::<Value>(text)
            .map_err(|e| ValidationError::InvalidWorkflow(format!("invalid JSON: {e}")))?,
        other => other.clone(),
    };

    let nodes = graph.as_object().ok_or_else(|| {
        ValidationError::InvalidWorkflow("expected an object of node ID to node".into())
    })?;

    if nodes.is_empty() {
        return Err(ValidationError::InvalidWorkflow("workflow has no nodes".into()));
    }

    for (node_id, node) in nodes {
        let well_formed = node
            .get("class_type")
            .is_some_and(|class_type| class_type.is_string());
        if !well_formed {
            return Err(ValidationError::InvalidWorkflow(format!(
                "node {node_id} must be an object with a string 'class_type'"
            )));
        }
    }

    Ok(WorkflowGraph(graph))
}

fn validate_images(images: &Value) -> Result<Vec<InputImage>, ValidationError> {
    let entries = images
        .as_array()
        .ok_or_else(|| ValidationError::MalformedImages("expected a list".into()))?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let name = entry.get("name").and_then(Value::as_str);
            let image = entry.get("image").and_then(Value::as_str);
            match (name, image) {
                (Some(name), Some(image)) if !name.is_empty() && !image.is_empty() => {
                    Ok(InputImage {
                        name: name.to_string(),
                        image: image.to_string(),
                    })
                }
                _ => Err(ValidationError::MalformedImages(format!(
                    "entry {index} must have non-empty 'name' and 'image' strings"
                ))),
            }
        })
        .collect()
}
