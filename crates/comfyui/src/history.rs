//! Typed view of the ComfyUI `/history/{prompt_id}` response.
//!
//! The history endpoint returns `{prompt_id: {"outputs": {node_id: {"images": [...]}}, ...}}`.
//! Only the parts needed to locate generated artifacts are modelled.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// History records keyed by prompt ID.
pub type History = BTreeMap<String, HistoryEntry>;

/// Execution record for one prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Output node ID to produced outputs. Ordered by node ID so that
    /// artifacts are always visited in the same sequence.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
}

/// Outputs produced by a single node.
///
/// Image entries are kept raw so that one malformed entry does not hide
/// the rest; [`HistoryEntry::artifacts`] decodes them one at a time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<Value>,
}

/// Reference to a file the server can serve through `/view`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage class: `output`, `temp` or `input`.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

impl ArtifactRef {
    /// Whether this is an intermediate or preview file rather than a
    /// deliverable.
    pub fn is_temporary(&self) -> bool {
        matches!(self.kind.as_str(), "temp" | "temporary")
    }
}

impl HistoryEntry {
    /// All artifacts across output nodes, in node-ID order.
    ///
    /// Entries that do not describe a file yield an error in place.
    pub fn artifacts(
        &self,
    ) -> impl Iterator<Item = (&str, Result<ArtifactRef, serde_json::Error>)> + '_ {
        self.outputs.iter().flat_map(|(node_id, output)| {
            output
                .images
                .iter()
                .map(move |image| (node_id.as_str(), ArtifactRef::deserialize(image)))
        })
    }
}
