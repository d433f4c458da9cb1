use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timewindow::TimeWindowConfig;

/// A primitive property value. The editor only persists strings, booleans and
/// numbers on a block, so structured settings travel as JSON strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) => s.parse().ok(),
            Self::Number(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::String(s) => s.parse().ok(),
            Self::Bool(_) => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for PropValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

/// Block property bag. Sorted so that serialization is deterministic and can
/// be compared byte for byte.
pub type Props = BTreeMap<String, PropValue>;

/// A unit of notebook content as the editor hands it over.
///
/// The sync engine only looks at `id` (identity) and compares everything
/// else structurally; `content` and `children` are opaque to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub props: Props,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub children: Vec<Block>,
}

impl Block {
    pub fn new(id: impl Into<String>, block_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_type: block_type.into(),
            ..Default::default()
        }
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<PropValue>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    /// Raw string form of a property, if it is stored as a string.
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(PropValue::as_str)
    }

    /// Full structural serialization used for change detection.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A block together with its index in the current document, as sent to the
/// backend on create and batch update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionedBlock {
    #[serde(flatten)]
    pub block: Block,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub locked: bool,
    pub time_window: TimeWindowConfig,
    #[serde(default)]
    pub block_note_id: String,
}

impl Notebook {
    pub fn new(title: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description: String::new(),
            locked: false,
            time_window: TimeWindowConfig::default(),
            block_note_id: Uuid::new_v4().to_string(),
        }
    }

    /// Apply a partial update the way the backend does.
    pub fn apply(&mut self, patch: &NotebookPatch) {
        if let Some(ref title) = patch.title {
            self.title = title.clone();
        }
        if let Some(ref description) = patch.description {
            self.description = description.clone();
        }
        if let Some(locked) = patch.locked {
            self.locked = locked;
        }
        if let Some(ref time_window) = patch.time_window {
            self.time_window = time_window.clone();
        }
    }
}

/// Partial notebook update. Absent fields are left untouched by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotebookPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindowConfig>,
}

impl NotebookPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.locked.is_none()
            && self.time_window.is_none()
    }
}

/// A label known to the telemetry backend, with the values seen for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_fingerprint_ignores_prop_insertion_order() {
        let a = Block::new("a", "metric").with_prop("x", 1i64).with_prop("y", "two");
        let b = Block::new("a", "metric").with_prop("y", "two").with_prop("x", 1i64);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_block_deserializes_editor_shape() {
        let block: Block = serde_json::from_value(json!({
            "id": "b1",
            "type": "heatmap",
            "props": { "filters": "[]", "open": false, "limit": 10 },
            "content": [{ "type": "text", "text": "hi" }]
        }))
        .unwrap();

        assert_eq!(block.block_type, "heatmap");
        assert_eq!(block.props.get("open"), Some(&PropValue::Bool(false)));
        assert_eq!(block.props.get("limit").and_then(PropValue::as_f64), Some(10.0));
        assert!(block.children.is_empty());
    }

    #[test]
    fn test_positioned_block_flattens() {
        let positioned = PositionedBlock {
            block: Block::new("c", "paragraph"),
            position: 3,
        };
        let value = serde_json::to_value(&positioned).unwrap();
        assert_eq!(value["id"], "c");
        assert_eq!(value["type"], "paragraph");
        assert_eq!(value["position"], 3);
    }

    #[test]
    fn test_patch_skips_absent_fields() {
        let patch = NotebookPatch {
            title: Some("Latency".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({ "title": "Latency" }));
        assert!(NotebookPatch::default().is_empty());
    }

    #[test]
    fn test_notebook_apply_patch() {
        let mut notebook = Notebook::new("Old".to_string());
        notebook.apply(&NotebookPatch {
            description: Some("desc".to_string()),
            locked: Some(true),
            ..Default::default()
        });
        assert_eq!(notebook.title, "Old");
        assert_eq!(notebook.description, "desc");
        assert!(notebook.locked);
    }
}
