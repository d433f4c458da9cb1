pub mod config;
pub mod diff;
pub mod guard;
pub mod metadata;
pub mod scheduler;
pub mod tracker;

mod manager;

pub use config::{FlushReport, RetryPolicy, SaveIndicator, SyncConfig, SyncState, SyncStatus};
pub use diff::{block_ids, diff_blocks, BlockDiff};
pub use guard::{ConfirmChoice, KeyChord, NavigationDecision, UnsavedChangesGuard};
pub use manager::{NotebookSession, SharedBackend, SyncError};
pub use metadata::{FieldSync, MetadataField, MetadataState};
pub use scheduler::{DebounceScheduler, SyncKey};
pub use tracker::{BlockTracker, FlushSnapshot};
