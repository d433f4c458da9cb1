//! Settings panel open state.
//!
//! Opening a block's settings from outside the block (a drag-handle menu,
//! a toolbar) is a command, not a level: each request bumps a counter and
//! the panel opens when it sees the counter advance. Closing is purely local
//! and never has to reset anything shared.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Sending side of open requests for one block.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for OpenRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenRequest {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the panel to open. Safe to call while it is already open.
    pub fn request_open(&self) {
        self.tx.send_modify(|count| *count += 1);
    }

    /// Number of requests issued so far
    pub fn count(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Panel that reacts to requests issued from now on.
    pub fn panel(&self) -> SettingsPanel {
        SettingsPanel {
            rx: self.tx.subscribe(),
            open: false,
        }
    }
}

/// Local open state of a block's settings panel.
#[derive(Debug)]
pub struct SettingsPanel {
    rx: watch::Receiver<u64>,
    open: bool,
}

impl SettingsPanel {
    /// Pick up requests issued since the last poll. Returns whether the panel
    /// is open afterwards.
    pub fn poll(&mut self) -> bool {
        if self.rx.has_changed().unwrap_or(false) {
            self.rx.borrow_and_update();
            self.open = true;
        }
        self.open
    }

    /// Wait for the next request and open. Returns `false` if the request
    /// side was dropped.
    pub async fn next_request(&mut self) -> bool {
        match self.rx.changed().await {
            Ok(()) => {
                self.rx.borrow_and_update();
                self.open = true;
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Opened from inside the block (its own settings button).
    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
    }
}

/// Open requests of all blocks in a notebook session, keyed by block id.
#[derive(Debug, Default)]
pub struct OpenRequests {
    requests: Mutex<HashMap<String, OpenRequest>>,
}

impl OpenRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_open(&self, block_id: &str) {
        log::debug!("Settings: open requested for block {}", block_id);
        self.handle(block_id).request_open();
    }

    /// Request handle of `block_id`, created on first use.
    pub fn handle(&self, block_id: &str) -> OpenRequest {
        self.requests
            .lock()
            .entry(block_id.to_string())
            .or_default()
            .clone()
    }

    pub fn panel(&self, block_id: &str) -> SettingsPanel {
        self.handle(block_id).panel()
    }

    /// Drop handles of blocks no longer in the document.
    pub fn retain(&self, live_ids: &[&str]) {
        self.requests
            .lock()
            .retain(|id, _| live_ids.contains(&id.as_str()));
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }
}
