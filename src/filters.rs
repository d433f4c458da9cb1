//! Label filters shared by the notebook and individual blocks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    #[error("Filter label is empty")]
    EmptyLabel,
    #[error("Invalid regex for label {label}: {message}")]
    InvalidRegex { label: String, message: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "regex")]
    Regex,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Contains => "contains",
            Self::Regex => "regex",
        }
    }
}

impl Default for FilterOperator {
    fn default() -> Self {
        Self::Equal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Filter {
    pub label: String,
    #[serde(default)]
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: String,
}

impl Filter {
    pub fn new(label: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, FilterOperator::Equal, value)
    }

    /// A filter without a value is still being composed. Whitespace is a
    /// value.
    pub fn is_draft(&self) -> bool {
        self.value.is_empty()
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.label.trim().is_empty() {
            return Err(FilterError::EmptyLabel);
        }
        if self.operator == FilterOperator::Regex {
            Regex::new(&self.value).map_err(|e| FilterError::InvalidRegex {
                label: self.label.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Evaluate against a label set. A missing label reads as the empty
    /// string; an invalid regex never matches.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let actual = labels.get(&self.label).map(String::as_str).unwrap_or("");
        match self.operator {
            FilterOperator::Equal => actual == self.value,
            FilterOperator::NotEqual => actual != self.value,
            FilterOperator::Contains => actual.contains(&self.value),
            FilterOperator::Regex => Regex::new(&self.value)
                .map(|re| re.is_match(actual))
                .unwrap_or(false),
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {:?}", self.label, self.operator.as_str(), self.value)
    }
}

/// Notebook filters followed by block filters. No deduplication: a label in
/// both scopes yields both filters, which the backend ANDs together.
pub fn merge_filters(notebook: &[Filter], block: &[Filter]) -> Vec<Filter> {
    notebook.iter().chain(block.iter()).cloned().collect()
}

/// True when every filter matches.
pub fn matches_all(filters: &[Filter], labels: &BTreeMap<String, String>) -> bool {
    filters.iter().all(|f| f.matches(labels))
}

#[derive(Debug, Clone)]
struct FilterEntry {
    filter: Filter,
    draft_since: Option<DateTime<Utc>>,
}

/// Editable filter list with automatic pruning of abandoned drafts.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    entries: Vec<FilterEntry>,
    editing: Option<usize>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_filters(filters: Vec<Filter>, now: DateTime<Utc>) -> Self {
        let mut set = Self::new();
        for filter in filters {
            set.push(filter, now);
        }
        set
    }

    pub fn push(&mut self, filter: Filter, now: DateTime<Utc>) -> usize {
        let draft_since = filter.is_draft().then_some(now);
        self.entries.push(FilterEntry { filter, draft_since });
        self.entries.len() - 1
    }

    pub fn update(&mut self, index: usize, filter: Filter, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        entry.draft_since = match (filter.is_draft(), entry.draft_since) {
            (true, Some(since)) => Some(since),
            (true, None) => Some(now),
            (false, _) => None,
        };
        entry.filter = filter;
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<Filter> {
        if index >= self.entries.len() {
            return None;
        }
        self.editing = match self.editing {
            Some(i) if i == index => None,
            Some(i) if i > index => Some(i - 1),
            other => other,
        };
        Some(self.entries.remove(index).filter)
    }

    /// Mark which filter (if any) currently has input focus.
    pub fn set_editing(&mut self, index: Option<usize>) {
        self.editing = index;
    }

    /// Drop drafts older than `grace`, except the one being edited.
    /// Returns how many were removed.
    pub fn prune_drafts(&mut self, now: DateTime<Utc>, grace: chrono::Duration) -> usize {
        let before = self.entries.len();
        let mut kept = Vec::with_capacity(before);
        let mut new_editing = None;

        for (i, entry) in self.entries.drain(..).enumerate() {
            let is_editing = self.editing == Some(i);
            let expired = entry
                .draft_since
                .map(|since| now - since >= grace)
                .unwrap_or(false);
            if expired && !is_editing {
                continue;
            }
            if is_editing {
                new_editing = Some(kept.len());
            }
            kept.push(entry);
        }

        self.entries = kept;
        self.editing = new_editing;
        let removed = before - self.entries.len();
        if removed > 0 {
            log::debug!("Filters: pruned {} abandoned draft filter(s)", removed);
        }
        removed
    }

    /// Filters that take part in queries (drafts excluded).
    pub fn active(&self) -> Vec<Filter> {
        self.entries
            .iter()
            .filter(|e| !e.filter.is_draft())
            .map(|e| e.filter.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Filter> {
        self.entries.iter().map(|e| e.filter.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
