use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timing knobs for a notebook session
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Idle window shared by block, title and description edits
    pub debounce: Duration,
    /// How long "saved" stays visible after a force-save
    pub saved_indicator: Duration,
    pub retry: RetryPolicy,
    /// How often a rolling time window is re-resolved
    pub time_window_poll: Duration,
    /// Age at which an untouched draft filter is dropped
    pub draft_grace: chrono::Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(10_000),
            saved_indicator: Duration::from_millis(2_000),
            retry: RetryPolicy::default(),
            time_window_poll: Duration::from_secs(30),
            draft_grace: chrono::Duration::milliseconds(5_000),
        }
    }
}

/// Backoff for retrying a failed debounced flush
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 0 disables automatic retries
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// attempts are used up.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.initial_backoff.saturating_mul(factor).min(self.max_backoff))
    }
}

/// Current sync state of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No notebook loaded
    Detached,
    /// Nothing in flight
    Idle,
    /// A flush is running
    Saving,
    /// The last flush failed
    Error,
}

/// Snapshot of a session's sync status, published on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notebook_id: Option<Uuid>,
    pub state: SyncState,
    pub has_unsaved_changes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// When the last force-save completed successfully
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Automatic retries scheduled since the last success
    pub retry_attempt: u32,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            notebook_id: None,
            state: SyncState::Detached,
            has_unsaved_changes: false,
            last_sync: None,
            saved_at: None,
            last_error: None,
            retry_attempt: 0,
        }
    }
}

/// The "saving…" / "saved" indicator pair. Never both at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SaveIndicator {
    Hidden,
    Saving,
    Saved,
}

impl SaveIndicator {
    pub fn at(status: &SyncStatus, now: DateTime<Utc>, visible_for: Duration) -> Self {
        if status.state == SyncState::Saving {
            return Self::Saving;
        }
        let visible_for = chrono::Duration::from_std(visible_for).unwrap_or_default();
        match status.saved_at {
            Some(saved_at) if now - saved_at < visible_for && !status.has_unsaved_changes => {
                Self::Saved
            }
            _ => Self::Hidden,
        }
    }
}

/// Outcome of one flush cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Metadata fields (title, description) written
    pub fields_written: usize,
    pub duration_ms: u64,
}

impl FlushReport {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0 && self.fields_written == 0
    }

    pub fn merge(&mut self, other: &FlushReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.fields_written += other.fields_written;
        self.duration_ms += other.duration_ms;
    }
}
