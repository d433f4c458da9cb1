//! Unsaved-changes guard: navigation interception, unload warning and the
//! save keyboard shortcut. Read-only (view) sessions never intercept.

use serde::{Deserialize, Serialize};

/// What the host should do with a navigation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Proceed,
    /// Ask the user; the target is kept so `Leave` can resume it
    Confirm { target: String },
}

/// User answer to the confirmation dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmChoice {
    Stay,
    Leave,
}

#[derive(Debug, Clone, Default)]
pub struct UnsavedChangesGuard {
    is_view: bool,
    blocked_target: Option<String>,
}

impl UnsavedChangesGuard {
    pub fn new(is_view: bool) -> Self {
        Self {
            is_view,
            blocked_target: None,
        }
    }

    pub fn is_view(&self) -> bool {
        self.is_view
    }

    pub fn set_view(&mut self, is_view: bool) {
        self.is_view = is_view;
        if is_view {
            self.blocked_target = None;
        }
    }

    /// Called before a client-side route change.
    pub fn on_navigate(&mut self, target: &str, dirty: bool) -> NavigationDecision {
        if self.is_view || !dirty {
            return NavigationDecision::Proceed;
        }
        log::debug!("Guard: holding navigation to {} (unsaved changes)", target);
        self.blocked_target = Some(target.to_string());
        NavigationDecision::Confirm {
            target: target.to_string(),
        }
    }

    /// Resolve a pending confirmation; returns the target to navigate to.
    pub fn resolve(&mut self, choice: ConfirmChoice) -> Option<String> {
        let target = self.blocked_target.take();
        match choice {
            ConfirmChoice::Stay => None,
            ConfirmChoice::Leave => target,
        }
    }

    pub fn blocked_target(&self) -> Option<&str> {
        self.blocked_target.as_deref()
    }

    /// Whether closing or reloading the tab should prompt.
    pub fn should_warn_before_unload(&self, dirty: bool) -> bool {
        !self.is_view && dirty
    }
}

/// A key press as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChord {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
}

impl KeyChord {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Ctrl+S or Cmd+S. When true the host must suppress the native save
    /// dialog and force-save instead.
    pub fn is_save(&self) -> bool {
        (self.ctrl || self.meta) && !self.shift && !self.alt && self.key.eq_ignore_ascii_case("s")
    }
}
