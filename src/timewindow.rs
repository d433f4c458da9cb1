//! Notebook time window.
//!
//! A notebook scopes every data block to one time window, either a rolling
//! preset ("last hour") or a fixed range. Rolling windows drift with the
//! clock, so [`TimeWindowStore`] re-resolves them on a fixed poll interval
//! and publishes the concrete range to subscribers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug, PartialEq)]
pub enum TimeWindowError {
    #[error("Unknown relative window: {0}")]
    UnknownPreset(String),
    #[error("Window start {start} is not before end {end}")]
    EmptyRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Rolling window presets offered by the time picker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RelativeWindow {
    #[serde(rename = "5m")]
    Minutes5,
    #[serde(rename = "15m")]
    Minutes15,
    #[serde(rename = "30m")]
    Minutes30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "3h")]
    Hours3,
    #[serde(rename = "6h")]
    Hours6,
    #[serde(rename = "12h")]
    Hours12,
    #[serde(rename = "24h")]
    Hours24,
    #[serde(rename = "2d")]
    Days2,
    #[serde(rename = "7d")]
    Days7,
    #[serde(rename = "30d")]
    Days30,
}

impl RelativeWindow {
    pub const ALL: [RelativeWindow; 11] = [
        Self::Minutes5,
        Self::Minutes15,
        Self::Minutes30,
        Self::Hour1,
        Self::Hours3,
        Self::Hours6,
        Self::Hours12,
        Self::Hours24,
        Self::Days2,
        Self::Days7,
        Self::Days30,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutes5 => "5m",
            Self::Minutes15 => "15m",
            Self::Minutes30 => "30m",
            Self::Hour1 => "1h",
            Self::Hours3 => "3h",
            Self::Hours6 => "6h",
            Self::Hours12 => "12h",
            Self::Hours24 => "24h",
            Self::Days2 => "2d",
            Self::Days7 => "7d",
            Self::Days30 => "30d",
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        match self {
            Self::Minutes5 => chrono::Duration::minutes(5),
            Self::Minutes15 => chrono::Duration::minutes(15),
            Self::Minutes30 => chrono::Duration::minutes(30),
            Self::Hour1 => chrono::Duration::hours(1),
            Self::Hours3 => chrono::Duration::hours(3),
            Self::Hours6 => chrono::Duration::hours(6),
            Self::Hours12 => chrono::Duration::hours(12),
            Self::Hours24 => chrono::Duration::hours(24),
            Self::Days2 => chrono::Duration::days(2),
            Self::Days7 => chrono::Duration::days(7),
            Self::Days30 => chrono::Duration::days(30),
        }
    }
}

impl std::str::FromStr for RelativeWindow {
    type Err = TimeWindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|preset| preset.as_str() == s)
            .ok_or_else(|| TimeWindowError::UnknownPreset(s.to_string()))
    }
}

/// Persisted time window of a notebook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "metadata", rename_all = "lowercase")]
pub enum TimeWindowConfig {
    Relative {
        value: RelativeWindow,
    },
    Absolute {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Default for TimeWindowConfig {
    fn default() -> Self {
        Self::Relative {
            value: RelativeWindow::Hour1,
        }
    }
}

impl TimeWindowConfig {
    pub fn relative(value: RelativeWindow) -> Self {
        Self::Relative { value }
    }

    pub fn absolute(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, TimeWindowError> {
        if start >= end {
            return Err(TimeWindowError::EmptyRange { start, end });
        }
        Ok(Self::Absolute { start, end })
    }

    pub fn is_relative(&self) -> bool {
        matches!(self, Self::Relative { .. })
    }

    /// Resolve to a concrete range as of `now`.
    pub fn resolve_at(&self, now: DateTime<Utc>) -> ResolvedWindow {
        match self {
            Self::Relative { value } => ResolvedWindow {
                start: now - value.duration(),
                end: now,
            },
            Self::Absolute { start, end } => ResolvedWindow {
                start: *start,
                end: *end,
            },
        }
    }

    pub fn resolve(&self) -> ResolvedWindow {
        self.resolve_at(Utc::now())
    }
}

/// Concrete range handed to data queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ResolvedWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn span(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Holds a notebook's window config and publishes the resolved range.
pub struct TimeWindowStore {
    config: Mutex<TimeWindowConfig>,
    resolved: watch::Sender<ResolvedWindow>,
}

impl TimeWindowStore {
    pub fn new(config: TimeWindowConfig) -> Arc<Self> {
        let (resolved, _) = watch::channel(config.resolve());
        Arc::new(Self {
            config: Mutex::new(config),
            resolved,
        })
    }

    pub fn config(&self) -> TimeWindowConfig {
        self.config.lock().clone()
    }

    /// Replace the config and publish the new range immediately.
    pub fn set(&self, config: TimeWindowConfig) {
        let resolved = config.resolve();
        *self.config.lock() = config;
        self.resolved.send_replace(resolved);
    }

    pub fn current(&self) -> ResolvedWindow {
        *self.resolved.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResolvedWindow> {
        self.resolved.subscribe()
    }

    /// Re-resolve a rolling window against the clock. Fixed ranges never
    /// change, so subscribers are not woken for them.
    pub fn refresh(&self) -> bool {
        let config = self.config();
        if !config.is_relative() {
            return false;
        }
        self.resolved.send_replace(config.resolve());
        true
    }
}

/// Handle for a running time window poller
pub struct TimeWindowPoller {
    shutdown_tx: mpsc::Sender<()>,
}

impl TimeWindowPoller {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

/// Spawn a task that refreshes `store` every `interval` until shut down.
pub fn start_time_window_poller(
    store: Arc<TimeWindowStore>,
    interval: Duration,
) -> TimeWindowPoller {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        log::debug!("Time window poller started (every {:?})", interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if store.refresh() {
                        log::trace!("Time window poller: re-resolved rolling window");
                    }
                }
                _ = shutdown_rx.recv() => {
                    log::debug!("Time window poller: shutting down");
                    break;
                }
            }
        }
    });

    TimeWindowPoller { shutdown_tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_relative_serialization_shape() {
        let config = TimeWindowConfig::relative(RelativeWindow::Hours24);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value, json!({ "type": "relative", "metadata": { "value": "24h" } }));

        let back: TimeWindowConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_absolute_deserialization() {
        let config: TimeWindowConfig = serde_json::from_value(json!({
            "type": "absolute",
            "metadata": { "start": "2026-01-01T00:00:00Z", "end": "2026-01-02T00:00:00Z" }
        }))
        .unwrap();
        let resolved = config.resolve();
        assert_eq!(resolved.span(), chrono::Duration::days(1));
    }

    #[test]
    fn test_resolve_relative_at() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let resolved = TimeWindowConfig::relative(RelativeWindow::Minutes15).resolve_at(now);
        assert_eq!(resolved.end, now);
        assert_eq!(resolved.start, Utc.with_ymd_and_hms(2026, 3, 1, 11, 45, 0).unwrap());
        assert!(resolved.contains(Utc.with_ymd_and_hms(2026, 3, 1, 11, 50, 0).unwrap()));
    }

    #[test]
    fn test_absolute_rejects_empty_range() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(matches!(
            TimeWindowConfig::absolute(t, t),
            Err(TimeWindowError::EmptyRange { .. })
        ));
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("7d".parse::<RelativeWindow>(), Ok(RelativeWindow::Days7));
        assert!("1y".parse::<RelativeWindow>().is_err());
    }

    #[test]
    fn test_refresh_skips_absolute() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let store = TimeWindowStore::new(TimeWindowConfig::absolute(start, end).unwrap());
        assert!(!store.refresh());
        assert_eq!(store.current().start, start);

        store.set(TimeWindowConfig::relative(RelativeWindow::Hour1));
        assert!(store.refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_republishes_rolling_window() {
        let store = TimeWindowStore::new(TimeWindowConfig::relative(RelativeWindow::Hour1));
        let mut rx = store.subscribe();

        let poller = start_time_window_poller(Arc::clone(&store), Duration::from_secs(30));
        tokio::time::timeout(Duration::from_secs(31), rx.changed())
            .await
            .expect("poller should publish within one interval")
            .unwrap();
        poller.shutdown();
    }
}
