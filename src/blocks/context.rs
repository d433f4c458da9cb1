use chrono::{DateTime, Utc};

use crate::api::{ApiError, NotebookBackend};
use crate::filters::{merge_filters, Filter};
use crate::models::{Label, Notebook};
use crate::timewindow::ResolvedWindow;

/// Labels known to the backend, used to suggest and validate filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelCatalog {
    labels: Vec<Label>,
}

impl LabelCatalog {
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Self { labels }
    }

    pub async fn fetch(backend: &dyn NotebookBackend) -> Result<Self, ApiError> {
        let labels = backend.list_labels().await?;
        log::debug!("Labels: fetched {} label(s)", labels.len());
        Ok(Self::new(labels))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|l| l.name.as_str())
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Notebook-level state every block reads: the resolved time window, the
/// notebook's filters and the label catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookContext {
    pub window: ResolvedWindow,
    pub filters: Vec<Filter>,
    pub labels: LabelCatalog,
}

impl NotebookContext {
    pub fn new(window: ResolvedWindow, filters: Vec<Filter>, labels: LabelCatalog) -> Self {
        Self {
            window,
            filters,
            labels,
        }
    }

    /// Context for `notebook` with its window resolved at `now`.
    pub fn for_notebook(
        notebook: &Notebook,
        filters: Vec<Filter>,
        labels: LabelCatalog,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(notebook.time_window.resolve_at(now), filters, labels)
    }

    /// Notebook filters followed by the block's own. Both scopes apply, so
    /// duplicates are harmless and kept.
    pub fn effective_filters(&self, block_filters: &[Filter]) -> Vec<Filter> {
        merge_filters(&self.filters, block_filters)
    }

    /// Filter labels the catalog does not know. Empty when the catalog was
    /// never loaded.
    pub fn unknown_labels<'a>(&self, filters: &'a [Filter]) -> Vec<&'a str> {
        if self.labels.is_empty() {
            return Vec::new();
        }
        filters
            .iter()
            .map(|f| f.label.as_str())
            .filter(|label| !self.labels.contains(label))
            .collect()
    }

    pub fn set_window(&mut self, window: ResolvedWindow) {
        self.window = window;
    }
}
