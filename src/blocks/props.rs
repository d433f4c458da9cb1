//! Block property conventions.
//!
//! The editor only persists primitive property values, so structured block
//! settings (filter lists, metric selections, group-by labels) are stored as
//! JSON strings and parsed on every read with a fallback.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{Block, PropValue, Props};

/// Parse a JSON-encoded property. Missing, empty or malformed input yields
/// `fallback`.
pub fn parse_prop<T: DeserializeOwned>(raw: Option<&str>, fallback: T) -> T {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return fallback;
    };
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Props: ignoring malformed property value: {}", e);
            fallback
        }
    }
}

/// Read and parse a JSON-encoded property of `block`.
pub fn read_json_prop<T: DeserializeOwned>(block: &Block, key: &str, fallback: T) -> T {
    parse_prop(block.prop_str(key), fallback)
}

/// Read a plain string property; empty strings count as absent.
pub fn read_str_prop<'a>(block: &'a Block, key: &str) -> Option<&'a str> {
    block.prop_str(key).filter(|value| !value.is_empty())
}

/// Read a numeric property. Accepts numbers and numeric strings.
pub fn read_number_prop(block: &Block, key: &str) -> Option<f64> {
    match block.props.get(key)? {
        PropValue::String(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

/// Merge-patch of a block's properties: only the keys being changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropsPatch {
    changes: Props,
}

impl PropsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<PropValue>) -> Self {
        self.changes.insert(key.to_string(), value.into());
        self
    }

    /// Set a structured value, stored as its JSON encoding.
    pub fn set_json<T: Serialize>(self, key: &str, value: &T) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_string(value)?;
        Ok(self.set(key, encoded))
    }

    pub fn changes(&self) -> &Props {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Merge `patch` into `props`. Keys not in the patch are preserved.
/// Returns whether anything changed.
pub fn apply_patch(props: &mut Props, patch: &PropsPatch) -> bool {
    let mut changed = false;
    for (key, value) in &patch.changes {
        if props.get(key) != Some(value) {
            props.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// A change a block asks the editor to make to the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EditorMutation {
    #[serde(rename_all = "camelCase")]
    UpdateProps { block_id: String, patch: PropsPatch },
}

impl EditorMutation {
    pub fn update_props(block_id: impl Into<String>, patch: PropsPatch) -> Self {
        Self::UpdateProps {
            block_id: block_id.into(),
            patch,
        }
    }

    /// Apply to an editor document, searching nested children too.
    /// Returns whether the document changed.
    pub fn apply(&self, blocks: &mut [Block]) -> bool {
        match self {
            Self::UpdateProps { block_id, patch } => match find_block_mut(blocks, block_id) {
                Some(block) => apply_patch(&mut block.props, patch),
                None => {
                    log::warn!("Props: update for unknown block {} dropped", block_id);
                    false
                }
            },
        }
    }
}

fn find_block_mut<'a>(blocks: &'a mut [Block], block_id: &str) -> Option<&'a mut Block> {
    for block in blocks.iter_mut() {
        if block.id == block_id {
            return Some(block);
        }
        if let Some(found) = find_block_mut(&mut block.children, block_id) {
            return Some(found);
        }
    }
    None
}

/// Declared property defaults of one block type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropSchema {
    defaults: Props,
}

impl PropSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prop(mut self, key: &str, default: impl Into<PropValue>) -> Self {
        self.defaults.insert(key.to_string(), default.into());
        self
    }

    pub fn defaults(&self) -> &Props {
        &self.defaults
    }

    pub fn default_of(&self, key: &str) -> Option<&PropValue> {
        self.defaults.get(key)
    }

    /// Stored props overlaid on the defaults.
    pub fn resolve(&self, stored: &Props) -> Props {
        let mut resolved = self.defaults.clone();
        resolved.extend(stored.iter().map(|(k, v)| (k.clone(), v.clone())));
        resolved
    }

    /// Fill in defaults missing from `block`. Returns whether any were added.
    pub fn fill_defaults(&self, block: &mut Block) -> bool {
        let mut added = false;
        for (key, value) in &self.defaults {
            if !block.props.contains_key(key) {
                block.props.insert(key.clone(), value.clone());
                added = true;
            }
        }
        added
    }
}
