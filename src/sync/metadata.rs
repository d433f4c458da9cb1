use crate::models::{Notebook, NotebookPatch};

use super::scheduler::SyncKey;

/// Notebook text fields edited inline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    Title,
    Description,
}

impl MetadataField {
    pub const ALL: [MetadataField; 2] = [Self::Title, Self::Description];

    pub fn key(&self) -> SyncKey {
        match self {
            Self::Title => SyncKey::Title,
            Self::Description => SyncKey::Description,
        }
    }

    pub fn from_key(key: SyncKey) -> Option<Self> {
        match key {
            SyncKey::Title => Some(Self::Title),
            SyncKey::Description => Some(Self::Description),
            SyncKey::Blocks => None,
        }
    }

    /// Patch carrying only this field
    pub fn patch(&self, value: String) -> NotebookPatch {
        match self {
            Self::Title => NotebookPatch {
                title: Some(value),
                ..Default::default()
            },
            Self::Description => NotebookPatch {
                description: Some(value),
                ..Default::default()
            },
        }
    }

    pub fn read<'a>(&self, notebook: &'a Notebook) -> &'a str {
        match self {
            Self::Title => &notebook.title,
            Self::Description => &notebook.description,
        }
    }
}

impl std::fmt::Display for MetadataField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Optimistic local value of one field next to its last persisted value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSync {
    local: String,
    persisted: String,
}

impl FieldSync {
    pub fn new(value: &str) -> Self {
        Self {
            local: value.to_string(),
            persisted: value.to_string(),
        }
    }

    /// Keystroke path: never waits on the network.
    pub fn set_local(&mut self, value: String) {
        self.local = value;
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn persisted(&self) -> &str {
        &self.persisted
    }

    pub fn is_dirty(&self) -> bool {
        self.local != self.persisted
    }

    /// The value to send, if it differs from what the backend has.
    pub fn pending_write(&self) -> Option<String> {
        self.is_dirty().then(|| self.local.clone())
    }

    pub fn mark_persisted(&mut self, value: &str) {
        self.persisted = value.to_string();
    }

    /// Adopt a canonical value, dropping any local edit.
    pub fn resync(&mut self, canonical: &str) {
        *self = Self::new(canonical);
    }
}

/// Title and description pipelines of one session
#[derive(Debug, Clone, Default)]
pub struct MetadataState {
    title: FieldSync,
    description: FieldSync,
}

impl MetadataState {
    pub fn from_notebook(notebook: &Notebook) -> Self {
        Self {
            title: FieldSync::new(&notebook.title),
            description: FieldSync::new(&notebook.description),
        }
    }

    pub fn field(&self, field: MetadataField) -> &FieldSync {
        match field {
            MetadataField::Title => &self.title,
            MetadataField::Description => &self.description,
        }
    }

    pub fn field_mut(&mut self, field: MetadataField) -> &mut FieldSync {
        match field {
            MetadataField::Title => &mut self.title,
            MetadataField::Description => &mut self.description,
        }
    }

    pub fn resync(&mut self, notebook: &Notebook) {
        for field in MetadataField::ALL {
            self.field_mut(field).resync(field.read(notebook));
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.title.is_dirty() || self.description.is_dirty()
    }
}
