use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::api::{ApiError, NotebookBackend};
use crate::blocks::{LabelCatalog, NotebookContext};
use crate::filters::{Filter, FilterSet};
use crate::models::{Block, Notebook, NotebookPatch};
use crate::timewindow::{
    start_time_window_poller, ResolvedWindow, TimeWindowConfig, TimeWindowPoller, TimeWindowStore,
};

use super::config::{FlushReport, SaveIndicator, SyncConfig, SyncState, SyncStatus};
use super::guard::{ConfirmChoice, KeyChord, NavigationDecision, UnsavedChangesGuard};
use super::metadata::{MetadataField, MetadataState};
use super::scheduler::{DebounceScheduler, SyncKey};
use super::tracker::{BlockTracker, FlushSnapshot};

/// Type alias for a shared backend
pub type SharedBackend = Arc<dyn NotebookBackend>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
    #[error("No notebook is open")]
    NotLoaded,
    #[error("Notebook is read-only")]
    ReadOnly,
    #[error("Notebook {0} was closed or switched during the flush")]
    Superseded(Uuid),
}

/// Per-notebook state. Replaced wholesale when the session switches
/// notebooks; `generation` tells in-flight work which notebook it belongs to.
#[derive(Default)]
struct SessionState {
    generation: u64,
    /// Canonical record as last confirmed by the backend
    notebook: Option<Notebook>,
    tracker: BlockTracker,
    metadata: MetadataState,
    has_unsaved_changes: bool,
    retries: HashMap<SyncKey, u32>,
    /// Notebook-level filters; local to the session
    filters: FilterSet,
}

impl SessionState {
    fn notebook_id(&self) -> Result<Uuid, SyncError> {
        self.notebook.as_ref().map(|n| n.id).ok_or(SyncError::NotLoaded)
    }

    fn is_clean(&self) -> bool {
        !self.tracker.has_pending() && !self.metadata.is_dirty()
    }
}

struct Shared {
    backend: SharedBackend,
    config: SyncConfig,
    state: Mutex<SessionState>,
    guard: Mutex<UnsavedChangesGuard>,
    /// Serializes flush cycles; held across the network calls of one cycle
    in_flight: tokio::sync::Mutex<()>,
    scheduler: DebounceScheduler,
    status: watch::Sender<SyncStatus>,
    time_window: Arc<TimeWindowStore>,
    /// Re-resolves the open notebook's rolling window
    poller: Mutex<Option<TimeWindowPoller>>,
    labels: Mutex<LabelCatalog>,
}

/// Editing session for one notebook at a time.
///
/// The host feeds every editor change in (`blocks_changed`,
/// `title_changed`, `description_changed`); the session keeps the last
/// synced snapshot, debounces writes, and reconciles with the backend by
/// diffing. Status is published on a watch channel.
///
/// Must be created inside a tokio runtime.
pub struct NotebookSession {
    shared: Arc<Shared>,
}

impl NotebookSession {
    pub fn new(backend: SharedBackend, config: SyncConfig) -> Self {
        Self::with_view_mode(backend, config, false)
    }

    /// Create a session; `is_view` makes it read-only.
    pub fn with_view_mode(backend: SharedBackend, config: SyncConfig, is_view: bool) -> Self {
        let (scheduler, fired_rx) = DebounceScheduler::new(config.debounce);
        let (status, _) = watch::channel(SyncStatus::default());

        let shared = Arc::new(Shared {
            backend,
            config,
            state: Mutex::new(SessionState::default()),
            guard: Mutex::new(UnsavedChangesGuard::new(is_view)),
            in_flight: tokio::sync::Mutex::new(()),
            scheduler,
            status,
            time_window: TimeWindowStore::new(TimeWindowConfig::default()),
            poller: Mutex::new(None),
            labels: Mutex::new(LabelCatalog::default()),
        });

        tokio::spawn(flush_loop(Arc::downgrade(&shared), fired_rx));

        Self { shared }
    }

    /// Open `notebook_id`, replacing whatever was open. Unflushed edits of
    /// the previous notebook are discarded; call `force_save` first to keep
    /// them. Returns the fetched blocks to seed the editor with.
    pub async fn open(&self, notebook_id: Uuid) -> Result<Vec<Block>, SyncError> {
        let shared = &self.shared;
        let generation = shared.reset();

        let notebook = shared.backend.get_notebook(notebook_id).await?;
        let blocks = match shared.backend.list_blocks(notebook_id).await {
            Ok(blocks) => blocks,
            Err(e) => {
                log::error!(
                    "Sync: failed to fetch blocks for notebook {}: {}, starting empty",
                    notebook_id,
                    e
                );
                Vec::new()
            }
        };

        {
            let mut state = shared.state.lock();
            if state.generation != generation {
                return Err(SyncError::Superseded(notebook_id));
            }
            state.tracker.reset(&blocks);
            state.metadata.resync(&notebook);
            shared.time_window.set(notebook.time_window.clone());
            // A zero interval disables polling
            if !shared.config.time_window_poll.is_zero() {
                let poller = start_time_window_poller(
                    shared.time_window.clone(),
                    shared.config.time_window_poll,
                );
                if let Some(old) = shared.poller.lock().replace(poller) {
                    old.shutdown();
                }
            }
            state.notebook = Some(notebook);
        }

        shared.status.send_modify(|status| {
            *status = SyncStatus {
                notebook_id: Some(notebook_id),
                state: SyncState::Idle,
                ..Default::default()
            };
        });
        log::info!(
            "Sync: opened notebook {} with {} block(s)",
            notebook_id,
            blocks.len()
        );
        Ok(blocks)
    }

    /// Forget the open notebook and cancel its timers.
    pub fn close(&self) {
        self.shared.reset();
    }

    /// Editor document changed. The new state is captured immediately and a
    /// flush is armed for when edits go idle.
    pub fn blocks_changed(&self, blocks: Vec<Block>) -> Result<(), SyncError> {
        let shared = &self.shared;
        shared.ensure_editable()?;
        {
            let mut state = shared.state.lock();
            state.notebook_id()?;
            state.tracker.record_edit(blocks);
            state.has_unsaved_changes = true;
            state.retries.remove(&SyncKey::Blocks);
        }
        shared.mark_dirty();
        shared.scheduler.schedule(SyncKey::Blocks);
        Ok(())
    }

    pub fn title_changed(&self, title: String) -> Result<(), SyncError> {
        self.field_changed(MetadataField::Title, title)
    }

    pub fn description_changed(&self, description: String) -> Result<(), SyncError> {
        self.field_changed(MetadataField::Description, description)
    }

    fn field_changed(&self, field: MetadataField, value: String) -> Result<(), SyncError> {
        let shared = &self.shared;
        shared.ensure_editable()?;
        {
            let mut state = shared.state.lock();
            state.notebook_id()?;
            state.metadata.field_mut(field).set_local(value);
            state.has_unsaved_changes = true;
            state.retries.remove(&field.key());
        }
        shared.mark_dirty();
        shared.scheduler.schedule(field.key());
        Ok(())
    }

    /// Flush everything now. `live` is the editor's current document, used
    /// when no edit has been captured since the last sync.
    ///
    /// Allowed on a locked notebook: the lock rejects new edits, but edits
    /// captured before it are still written, as the debounce timer would.
    pub async fn force_save(&self, live: Option<Vec<Block>>) -> Result<FlushReport, SyncError> {
        let shared = &self.shared;
        shared.ensure_not_view()?;
        shared.scheduler.cancel_all();

        let mut report = FlushReport::default();
        let mut first_error = None;

        match shared.flush_blocks(live.as_deref()).await {
            Ok(r) => report.merge(&r),
            Err(e) => first_error = Some(e),
        }
        for field in MetadataField::ALL {
            match shared.flush_field(field).await {
                Ok(r) => report.merge(&r),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            if !matches!(e, SyncError::Superseded(_)) {
                log::error!("Sync: force-save failed: {}", e);
            }
            return Err(e);
        }

        let clean = shared.state.lock().is_clean();
        if clean {
            shared.status.send_modify(|status| status.saved_at = Some(Utc::now()));
        }
        log::info!(
            "Sync: force-save done (created={}, updated={}, deleted={}, fields={})",
            report.created,
            report.updated,
            report.deleted,
            report.fields_written
        );
        Ok(report)
    }

    /// Lock or unlock the notebook. Applied locally at once; a failed write
    /// is logged and not rolled back.
    pub async fn set_locked(&self, locked: bool) -> Result<(), SyncError> {
        self.update_notebook_now(NotebookPatch {
            locked: Some(locked),
            ..Default::default()
        })
        .await
    }

    /// Change the notebook's time window. Subscribers see the new range
    /// before the backend write completes.
    pub async fn set_time_window(&self, time_window: TimeWindowConfig) -> Result<(), SyncError> {
        self.update_notebook_now(NotebookPatch {
            time_window: Some(time_window),
            ..Default::default()
        })
        .await
    }

    async fn update_notebook_now(&self, patch: NotebookPatch) -> Result<(), SyncError> {
        let shared = &self.shared;
        shared.ensure_not_view()?;
        let notebook_id = {
            let mut state = shared.state.lock();
            let notebook = state.notebook.as_mut().ok_or(SyncError::NotLoaded)?;
            notebook.apply(&patch);
            if let Some(ref time_window) = patch.time_window {
                shared.time_window.set(time_window.clone());
            }
            notebook.id
        };

        if let Err(e) = shared.backend.update_notebook(notebook_id, &patch).await {
            log::error!("Sync: failed to update notebook {}: {}", notebook_id, e);
            shared.status.send_modify(|status| status.last_error = Some(e.to_string()));
            return Err(e.into());
        }
        Ok(())
    }

    // ===== Time window, filters and labels =====

    pub fn resolved_window(&self) -> ResolvedWindow {
        self.shared.time_window.current()
    }

    /// Resolved range of the open notebook, updated on `set_time_window`
    /// and re-resolved by the poller while the window is rolling.
    pub fn subscribe_time_window(&self) -> watch::Receiver<ResolvedWindow> {
        self.shared.time_window.subscribe()
    }

    pub fn add_filter(&self, filter: Filter, now: DateTime<Utc>) -> Result<usize, SyncError> {
        let mut state = self.shared.state.lock();
        state.notebook_id()?;
        Ok(state.filters.push(filter, now))
    }

    pub fn update_filter(&self, index: usize, filter: Filter, now: DateTime<Utc>) -> bool {
        self.shared.state.lock().filters.update(index, filter, now)
    }

    pub fn remove_filter(&self, index: usize) -> Option<Filter> {
        self.shared.state.lock().filters.remove(index)
    }

    pub fn set_editing_filter(&self, index: Option<usize>) {
        self.shared.state.lock().filters.set_editing(index);
    }

    /// Drop draft filters left untouched for the configured grace period.
    pub fn prune_draft_filters(&self, now: DateTime<Utc>) -> usize {
        let grace = self.shared.config.draft_grace;
        self.shared.state.lock().filters.prune_drafts(now, grace)
    }

    /// Every filter, drafts included.
    pub fn filters(&self) -> Vec<Filter> {
        self.shared.state.lock().filters.all()
    }

    pub fn set_labels(&self, labels: LabelCatalog) {
        *self.shared.labels.lock() = labels;
    }

    pub async fn load_labels(&self) -> Result<(), SyncError> {
        let catalog = LabelCatalog::fetch(self.shared.backend.as_ref()).await?;
        self.set_labels(catalog);
        Ok(())
    }

    /// What blocks of the open notebook query against: the current
    /// window, the non-draft filters and the label catalog.
    pub fn context(&self) -> Option<NotebookContext> {
        let filters = {
            let state = self.shared.state.lock();
            state.notebook.as_ref()?;
            state.filters.active()
        };
        Some(NotebookContext::new(
            self.shared.time_window.current(),
            filters,
            self.shared.labels.lock().clone(),
        ))
    }

    // ===== Guard =====

    pub fn is_view(&self) -> bool {
        self.shared.guard.lock().is_view()
    }

    pub fn set_view(&self, is_view: bool) {
        self.shared.guard.lock().set_view(is_view);
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.shared.state.lock().has_unsaved_changes
    }

    pub fn on_navigate(&self, target: &str) -> NavigationDecision {
        let dirty = self.has_unsaved_changes();
        self.shared.guard.lock().on_navigate(target, dirty)
    }

    pub fn resolve_navigation(&self, choice: ConfirmChoice) -> Option<String> {
        self.shared.guard.lock().resolve(choice)
    }

    pub fn should_warn_before_unload(&self) -> bool {
        let dirty = self.has_unsaved_changes();
        self.shared.guard.lock().should_warn_before_unload(dirty)
    }

    /// Handle a key press. Returns `None` if the key is not the save
    /// shortcut, otherwise the force-save outcome.
    pub async fn on_key(
        &self,
        chord: &KeyChord,
        live: Option<Vec<Block>>,
    ) -> Option<Result<FlushReport, SyncError>> {
        if !chord.is_save() {
            return None;
        }
        Some(self.force_save(live).await)
    }

    // ===== Status =====

    pub fn status(&self) -> SyncStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    pub fn save_indicator(&self, now: DateTime<Utc>) -> SaveIndicator {
        SaveIndicator::at(&self.status(), now, self.shared.config.saved_indicator)
    }

    /// Canonical notebook record, with any unsynced title/description edits.
    pub fn notebook(&self) -> Option<Notebook> {
        let state = self.shared.state.lock();
        state.notebook.clone().map(|mut notebook| {
            for field in MetadataField::ALL {
                let local = state.metadata.field(field).local().to_string();
                match field {
                    MetadataField::Title => notebook.title = local,
                    MetadataField::Description => notebook.description = local,
                }
            }
            notebook
        })
    }

    pub fn local_title(&self) -> String {
        self.local_field(MetadataField::Title)
    }

    pub fn local_description(&self) -> String {
        self.local_field(MetadataField::Description)
    }

    fn local_field(&self, field: MetadataField) -> String {
        self.shared.state.lock().metadata.field(field).local().to_string()
    }

    pub fn previous_blocks(&self) -> Vec<Block> {
        self.shared.state.lock().tracker.previous().to_vec()
    }

    pub fn pending_blocks(&self) -> Option<Vec<Block>> {
        self.shared.state.lock().tracker.pending().map(<[Block]>::to_vec)
    }

    pub fn existing_block_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shared
            .state
            .lock()
            .tracker
            .existing_ids()
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn is_armed(&self, key: SyncKey) -> bool {
        self.shared.scheduler.is_armed(key)
    }
}

impl Drop for NotebookSession {
    fn drop(&mut self) {
        self.shared.scheduler.cancel_all();
        self.shared.stop_poller();
    }
}

impl Shared {
    /// Start a new generation with empty state. Returns the new generation.
    fn reset(&self) -> u64 {
        self.scheduler.cancel_all();
        self.stop_poller();
        let generation = {
            let mut state = self.state.lock();
            let generation = state.generation + 1;
            *state = SessionState {
                generation,
                ..Default::default()
            };
            generation
        };
        self.status.send_replace(SyncStatus::default());
        generation
    }

    fn stop_poller(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.shutdown();
        }
    }

    fn ensure_not_view(&self) -> Result<(), SyncError> {
        if self.guard.lock().is_view() {
            return Err(SyncError::ReadOnly);
        }
        Ok(())
    }

    /// View mode and the notebook lock both reject new edits.
    fn ensure_editable(&self) -> Result<(), SyncError> {
        self.ensure_not_view()?;
        if self
            .state
            .lock()
            .notebook
            .as_ref()
            .map(|n| n.locked)
            .unwrap_or(false)
        {
            return Err(SyncError::ReadOnly);
        }
        Ok(())
    }

    fn mark_dirty(&self) {
        self.status.send_if_modified(|status| {
            let changed = !status.has_unsaved_changes;
            status.has_unsaved_changes = true;
            changed
        });
    }

    /// Run `f` against the state if it still belongs to `generation`.
    fn with_generation<T>(
        &self,
        generation: u64,
        notebook_id: Uuid,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> Result<T, SyncError> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return Err(SyncError::Superseded(notebook_id));
        }
        Ok(f(&mut state))
    }

    async fn flush_key(&self, key: SyncKey) {
        let result = match MetadataField::from_key(key) {
            Some(field) => self.flush_field(field).await,
            None => self.flush_blocks(None).await,
        };
        if let Err(e) = result {
            log::debug!("Sync: debounced {} flush ended with error: {}", key, e);
        }
    }

    /// Diff the latest block state against the synced snapshot and write the
    /// difference: creates, then deletes, then one batch update.
    async fn flush_blocks(&self, live: Option<&[Block]>) -> Result<FlushReport, SyncError> {
        let _in_flight = self.in_flight.lock().await;

        let (generation, notebook_id, snapshot) = {
            let state = self.state.lock();
            let notebook_id = state.notebook_id()?;
            (state.generation, notebook_id, state.tracker.snapshot(live))
        };
        let Some(snapshot) = snapshot else {
            self.settle(generation, SyncKey::Blocks);
            return Ok(FlushReport::default());
        };

        if snapshot.diff.is_empty() {
            self.with_generation(generation, notebook_id, |state| {
                state.tracker.mark_synced(&snapshot);
            })?;
            self.settle(generation, SyncKey::Blocks);
            return Ok(FlushReport::default());
        }

        self.set_state(generation, SyncState::Saving);
        let started = Instant::now();
        let result = self
            .write_blocks(generation, notebook_id, &snapshot)
            .await;

        match result {
            Ok(()) => {
                self.with_generation(generation, notebook_id, |state| {
                    state.tracker.mark_synced(&snapshot);
                })?;
                let report = FlushReport {
                    created: snapshot.diff.to_create.len(),
                    updated: snapshot.diff.to_update.len(),
                    deleted: snapshot.diff.to_delete_ids.len(),
                    fields_written: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                log::info!(
                    "Sync: notebook {} blocks flushed: created={}, updated={}, deleted={}",
                    notebook_id,
                    report.created,
                    report.updated,
                    report.deleted
                );
                self.finish(generation, SyncKey::Blocks, Ok(()));
                Ok(report)
            }
            Err(e) => {
                if !matches!(e, SyncError::Superseded(_)) {
                    log::error!("Sync: notebook {} block flush failed: {}", notebook_id, e);
                }
                self.finish(generation, SyncKey::Blocks, Err(&e));
                Err(e)
            }
        }
    }

    async fn write_blocks(
        &self,
        generation: u64,
        notebook_id: Uuid,
        snapshot: &FlushSnapshot,
    ) -> Result<(), SyncError> {
        for positioned in &snapshot.diff.to_create {
            let block_id = positioned.block.id.as_str();
            // Recorded before the request so a concurrent edit sees it
            self.with_generation(generation, notebook_id, |state| {
                state.tracker.mark_created(block_id)
            })?;
            if let Err(e) = self
                .backend
                .create_block(notebook_id, &positioned.block, positioned.position)
                .await
            {
                let _ = self.with_generation(generation, notebook_id, |state| {
                    state.tracker.mark_deleted(block_id)
                });
                return Err(e.into());
            }
        }

        for block_id in &snapshot.diff.to_delete_ids {
            self.with_generation(generation, notebook_id, |state| {
                state.tracker.mark_deleted(block_id)
            })?;
            if let Err(e) = self.backend.delete_block(notebook_id, block_id).await {
                let _ = self.with_generation(generation, notebook_id, |state| {
                    state.tracker.mark_created(block_id)
                });
                return Err(e.into());
            }
        }

        if !snapshot.diff.to_update.is_empty() {
            self.with_generation(generation, notebook_id, |_| ())?;
            self.backend
                .update_blocks(notebook_id, &snapshot.diff.to_update)
                .await?;
        }

        // The notebook may have been switched during the last request
        self.with_generation(generation, notebook_id, |_| ())
    }

    /// Send one metadata field if it differs from the persisted value.
    async fn flush_field(&self, field: MetadataField) -> Result<FlushReport, SyncError> {
        let _in_flight = self.in_flight.lock().await;

        let (generation, notebook_id, value) = {
            let state = self.state.lock();
            let notebook_id = state.notebook_id()?;
            (
                state.generation,
                notebook_id,
                state.metadata.field(field).pending_write(),
            )
        };
        let Some(value) = value else {
            // Edited back to the persisted value
            self.settle(generation, field.key());
            return Ok(FlushReport::default());
        };

        self.set_state(generation, SyncState::Saving);
        let patch = field.patch(value.clone());
        match self.backend.update_notebook(notebook_id, &patch).await {
            Ok(_) => {
                self.with_generation(generation, notebook_id, |state| {
                    state.metadata.field_mut(field).mark_persisted(&value);
                    if let Some(notebook) = state.notebook.as_mut() {
                        notebook.apply(&patch);
                    }
                })?;
                log::info!("Sync: notebook {} {} saved", notebook_id, field);
                self.finish(generation, field.key(), Ok(()));
                Ok(FlushReport {
                    fields_written: 1,
                    ..Default::default()
                })
            }
            Err(e) => {
                log::error!(
                    "Sync: failed to save {} of notebook {}: {}",
                    field,
                    notebook_id,
                    e
                );
                let e = SyncError::from(e);
                self.finish(generation, field.key(), Err(&e));
                Err(e)
            }
        }
    }

    fn set_state(&self, generation: u64, sync_state: SyncState) {
        if self.state.lock().generation != generation {
            return;
        }
        self.status.send_modify(|status| status.state = sync_state);
    }

    /// Nothing to write for `key`: drop its retry state and clear the dirty
    /// flag if nothing else is outstanding.
    fn settle(&self, generation: u64, key: SyncKey) {
        let dirty = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.retries.remove(&key);
            if state.is_clean() {
                state.has_unsaved_changes = false;
            }
            state.has_unsaved_changes
        };
        self.status.send_if_modified(|status| {
            let changed = status.has_unsaved_changes != dirty;
            status.has_unsaved_changes = dirty;
            changed
        });
    }

    /// Publish the outcome of a flush and arm a retry after a failure.
    fn finish(&self, generation: u64, key: SyncKey, outcome: Result<(), &SyncError>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }

        match outcome {
            Ok(()) => {
                state.retries.remove(&key);
                if state.is_clean() {
                    state.has_unsaved_changes = false;
                }
                let dirty = state.has_unsaved_changes;
                let retry_attempt = state.retries.values().copied().max().unwrap_or(0);
                drop(state);
                self.status.send_modify(|status| {
                    status.state = SyncState::Idle;
                    status.has_unsaved_changes = dirty;
                    status.last_sync = Some(Utc::now());
                    status.last_error = None;
                    status.retry_attempt = retry_attempt;
                });
            }
            Err(SyncError::Superseded(_)) => {}
            Err(e) => {
                let attempt = state.retries.get(&key).copied().unwrap_or(0) + 1;
                let delay = self.config.retry.backoff(attempt);
                if delay.is_some() {
                    state.retries.insert(key, attempt);
                }
                drop(state);

                match delay {
                    Some(delay) => {
                        log::warn!(
                            "Sync: retrying {} flush in {:?} (attempt {})",
                            key,
                            delay,
                            attempt
                        );
                        self.scheduler.schedule_after(key, delay);
                    }
                    None => log::error!(
                        "Sync: giving up on automatic {} retries; changes stay unsaved",
                        key
                    ),
                }

                let message = e.to_string();
                self.status.send_modify(|status| {
                    status.state = SyncState::Error;
                    status.has_unsaved_changes = true;
                    status.last_error = Some(message);
                    if delay.is_some() {
                        status.retry_attempt = attempt;
                    }
                });
            }
        }
    }
}

/// Runs debounced flushes as their timers fire. Ends with the session.
async fn flush_loop(shared: Weak<Shared>, mut fired: mpsc::UnboundedReceiver<SyncKey>) {
    while let Some(key) = fired.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        log::debug!("Sync: debounce elapsed for {}", key);
        shared.flush_key(key).await;
    }
    log::debug!("Sync: flush loop stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::api::{BackendCall, MemoryBackend};
    use crate::models::Label;
    use crate::sync::config::RetryPolicy;
    use crate::timewindow::RelativeWindow;

    const DEBOUNCE: Duration = Duration::from_secs(10);

    fn config() -> SyncConfig {
        SyncConfig {
            debounce: DEBOUNCE,
            saved_indicator: Duration::from_secs(2),
            retry: RetryPolicy {
                initial_backoff: Duration::from_secs(2),
                max_backoff: Duration::from_secs(8),
                max_attempts: 3,
            },
            time_window_poll: Duration::from_secs(30),
            draft_grace: chrono::Duration::seconds(5),
        }
    }

    fn block(id: &str, x: i64) -> Block {
        Block::new(id, "metric").with_prop("x", x)
    }

    fn setup(blocks: Vec<Block>) -> (Arc<MemoryBackend>, NotebookSession, Uuid) {
        let backend = Arc::new(MemoryBackend::new());
        let notebook = Notebook::new("Checkout latency".to_string());
        let id = notebook.id;
        backend.insert_notebook(notebook, blocks);
        let session = NotebookSession::new(backend.clone(), config());
        (backend, session, id)
    }

    fn writes(backend: &MemoryBackend) -> Vec<BackendCall> {
        backend
            .calls()
            .into_iter()
            .filter(|c| c.is_block_write() || matches!(c, BackendCall::UpdateNotebook(_)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_seeds_bookkeeping() {
        let (_backend, session, id) = setup(vec![block("a", 0), block("b", 0)]);
        let blocks = session.open(id).await.unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(session.existing_block_ids(), vec!["a", "b"]);
        assert_eq!(session.previous_blocks(), blocks);
        assert!(session.pending_blocks().is_none());
        assert!(!session.has_unsaved_changes());
        assert_eq!(session.status().state, SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_starts_empty() {
        let (backend, session, id) = setup(vec![block("a", 0)]);
        backend.set_fail_block_reads(true);

        let blocks = session.open(id).await.unwrap();
        assert!(blocks.is_empty());
        assert!(session.existing_block_ids().is_empty());
        assert!(session.previous_blocks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_before_open_are_rejected() {
        let (_backend, session, _id) = setup(vec![]);
        assert!(matches!(
            session.blocks_changed(vec![block("a", 0)]),
            Err(SyncError::NotLoaded)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_flushes_once_with_latest_state() {
        let (backend, session, id) = setup(vec![block("a", 0)]);
        session.open(id).await.unwrap();

        for x in 1..=4 {
            session.blocks_changed(vec![block("a", x)]).unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert!(writes(&backend).is_empty());

        tokio::time::sleep(DEBOUNCE).await;
        assert_eq!(
            writes(&backend),
            vec![BackendCall::UpdateBlocks {
                blocks: vec![("a".to_string(), 0)]
            }]
        );
        assert_eq!(backend.blocks(id), vec![block("a", 4)]);
        assert!(!session.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_delete_update_ordering() {
        let (backend, session, id) = setup(vec![block("a", 0), block("b", 0)]);
        session.open(id).await.unwrap();

        session
            .blocks_changed(vec![block("a", 1), block("c", 0)])
            .unwrap();
        let report = session.force_save(None).await.unwrap();

        assert_eq!((report.created, report.updated, report.deleted), (1, 1, 1));
        assert_eq!(
            writes(&backend),
            vec![
                BackendCall::CreateBlock {
                    block_id: "c".to_string(),
                    position: 1
                },
                BackendCall::DeleteBlock {
                    block_id: "b".to_string()
                },
                BackendCall::UpdateBlocks {
                    blocks: vec![("a".to_string(), 0)]
                },
            ]
        );
        assert_eq!(session.existing_block_ids(), vec!["a", "c"]);
        assert_eq!(backend.blocks(id), vec![block("a", 1), block("c", 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_flush_is_noop() {
        let (backend, session, id) = setup(vec![block("a", 0)]);
        session.open(id).await.unwrap();

        let current = vec![block("a", 1), block("b", 0)];
        session.blocks_changed(current.clone()).unwrap();
        session.force_save(None).await.unwrap();
        backend.clear_calls();

        let report = session.force_save(Some(current)).await.unwrap();
        assert!(report.is_noop());
        assert!(writes(&backend).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_save_uses_pending_edit_and_cancels_timers() {
        let (backend, session, id) = setup(vec![block("a", 0)]);
        session.open(id).await.unwrap();

        session.blocks_changed(vec![block("a", 7)]).unwrap();
        session.title_changed("Checkout p99".to_string()).unwrap();
        assert!(session.is_armed(SyncKey::Blocks));

        // Stale live document must not win over the captured edit
        let report = session.force_save(Some(vec![block("a", 0)])).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.fields_written, 1);
        assert_eq!(backend.blocks(id), vec![block("a", 7)]);
        assert_eq!(backend.notebook(id).unwrap().title, "Checkout p99");
        for key in SyncKey::ALL {
            assert!(!session.is_armed(key));
        }

        backend.clear_calls();
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(writes(&backend).is_empty());
        assert!(!session.has_unsaved_changes());
        assert!(session.status().saved_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dirty_flag_survives_failure_until_retry_succeeds() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();
        assert!(!session.has_unsaved_changes());

        session.blocks_changed(vec![block("n", 0)]).unwrap();
        assert!(session.has_unsaved_changes());
        assert!(session.status().has_unsaved_changes);

        backend.fail_next_writes(1);
        let err = session.force_save(None).await.unwrap_err();
        assert!(matches!(err, SyncError::Api(_)));
        assert!(session.has_unsaved_changes());
        assert_eq!(session.status().state, SyncState::Error);
        assert!(session.status().saved_at.is_none());
        // Failed create is not left in the existing-id set
        assert!(session.existing_block_ids().is_empty());
        assert!(session.is_armed(SyncKey::Blocks));

        // Retry fires after the first backoff step
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!session.has_unsaved_changes());
        assert_eq!(session.status().state, SyncState::Idle);
        assert_eq!(session.existing_block_ids(), vec!["n"]);
        assert_eq!(backend.blocks(id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_after_max_attempts() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();
        session.blocks_changed(vec![block("n", 0)]).unwrap();

        backend.fail_next_writes(100);
        tokio::time::sleep(Duration::from_secs(120)).await;

        let creates = writes(&backend).len();
        // Debounced attempt plus three retries
        assert_eq!(creates, 4);
        assert!(session.has_unsaved_changes());
        assert!(!session.is_armed(SyncKey::Blocks));
    }

    #[tokio::test(start_paused = true)]
    async fn test_title_and_description_sync_independently() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();

        session.title_changed("Edge".to_string()).unwrap();
        session.title_changed("Edge errors".to_string()).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        session.description_changed("5xx by region".to_string()).unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            writes(&backend),
            vec![BackendCall::UpdateNotebook(NotebookPatch {
                title: Some("Edge errors".to_string()),
                ..Default::default()
            })]
        );
        assert!(session.has_unsaved_changes());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(writes(&backend).len(), 2);
        assert!(!session.has_unsaved_changes());
        assert_eq!(session.notebook().unwrap().description, "5xx by region");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_title_is_not_sent() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();

        session.title_changed("Other".to_string()).unwrap();
        session.title_changed("Checkout latency".to_string()).unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;

        assert!(writes(&backend).is_empty());
        assert!(!session.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_discards_previous_notebook_state() {
        let (backend, session, first) = setup(vec![block("a", 0)]);
        let second_notebook = Notebook::new("Second".to_string());
        let second = second_notebook.id;
        backend.insert_notebook(second_notebook, vec![block("x", 0), block("y", 0)]);

        session.open(first).await.unwrap();
        session.blocks_changed(vec![block("a", 1), block("b", 0)]).unwrap();
        session.title_changed("Renamed".to_string()).unwrap();

        session.open(second).await.unwrap();
        assert_eq!(session.existing_block_ids(), vec!["x", "y"]);
        assert!(session.pending_blocks().is_none());
        assert_eq!(session.previous_blocks(), vec![block("x", 0), block("y", 0)]);
        assert_eq!(session.notebook().unwrap().title, "Second");
        assert_eq!(session.local_title(), "Second");
        assert!(!session.has_unsaved_changes());

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(writes(&backend).is_empty());
        assert_eq!(backend.blocks(first), vec![block("a", 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_during_flush_ignores_stale_completion() {
        let (backend, session, first) = setup(vec![]);
        let second_notebook = Notebook::new("Second".to_string());
        let second = second_notebook.id;
        backend.insert_notebook(second_notebook, vec![block("x", 0)]);

        session.open(first).await.unwrap();
        session.blocks_changed(vec![block("a", 0), block("b", 0)]).unwrap();
        backend.set_latency(Some(Duration::from_secs(1)));

        let session = Arc::new(session);
        let saver = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.force_save(None).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        session.open(second).await.unwrap();

        let result = saver.await.unwrap();
        assert!(matches!(result, Err(SyncError::Superseded(_))));
        assert_eq!(session.existing_block_ids(), vec!["x"]);
        assert!(!session.has_unsaved_changes());
        assert_eq!(session.status().notebook_id, Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_flush_stays_pending() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();
        session.blocks_changed(vec![block("a", 0)]).unwrap();
        backend.set_latency(Some(Duration::from_secs(1)));

        let session = Arc::new(session);
        let saver = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.force_save(None).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        session
            .blocks_changed(vec![block("a", 0), block("b", 0)])
            .unwrap();

        saver.await.unwrap().unwrap();
        assert!(session.has_unsaved_changes());
        assert_eq!(session.pending_blocks().map(|b| b.len()), Some(2));

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(!session.has_unsaved_changes());
        assert_eq!(backend.blocks(id).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_mode_is_read_only() {
        let backend = Arc::new(MemoryBackend::new());
        let notebook = Notebook::new("Shared".to_string());
        let id = notebook.id;
        backend.insert_notebook(notebook, vec![]);
        let session = NotebookSession::with_view_mode(backend.clone(), config(), true);
        session.open(id).await.unwrap();

        assert!(matches!(
            session.blocks_changed(vec![block("a", 0)]),
            Err(SyncError::ReadOnly)
        ));
        assert!(matches!(session.force_save(None).await, Err(SyncError::ReadOnly)));
        assert!(matches!(session.set_locked(true).await, Err(SyncError::ReadOnly)));
        assert_eq!(session.on_navigate("/elsewhere"), NavigationDecision::Proceed);
        assert!(!session.should_warn_before_unload());
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_guard_follows_dirty_flag() {
        let (_backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();
        assert_eq!(session.on_navigate("/a"), NavigationDecision::Proceed);

        session.description_changed("wip".to_string()).unwrap();
        assert!(session.should_warn_before_unload());
        assert!(matches!(
            session.on_navigate("/a"),
            NavigationDecision::Confirm { .. }
        ));
        assert_eq!(session.resolve_navigation(ConfirmChoice::Leave).as_deref(), Some("/a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_shortcut_forces_save() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();
        session.blocks_changed(vec![block("a", 0)]).unwrap();

        assert!(session.on_key(&KeyChord::new("k").ctrl(), None).await.is_none());
        let result = session.on_key(&KeyChord::new("s").meta(), None).await;
        assert!(matches!(result, Some(Ok(_))));
        assert_eq!(backend.blocks(id).len(), 1);
        assert_eq!(session.save_indicator(Utc::now()), SaveIndicator::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_and_time_window_are_immediate() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();

        let window = TimeWindowConfig::relative(RelativeWindow::Days7);
        session.set_time_window(window.clone()).await.unwrap();
        session.set_locked(true).await.unwrap();

        let stored = backend.notebook(id).unwrap();
        assert!(stored.locked);
        assert_eq!(stored.time_window, window);
        assert!(matches!(
            session.blocks_changed(vec![block("a", 0)]),
            Err(SyncError::ReadOnly)
        ));

        // Unlocking stays possible on a locked notebook
        session.set_locked(false).await.unwrap();
        assert!(session.blocks_changed(vec![block("a", 0)]).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lock_keeps_local_value() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();

        backend.fail_next_writes(1);
        assert!(session.set_locked(true).await.is_err());
        assert!(session.notebook().unwrap().locked);
        assert!(!backend.notebook(id).unwrap().locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ids_flush_once() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();

        let doc = vec![block("n", 0), block("n", 5)];
        session.blocks_changed(doc.clone()).unwrap();
        let report = session.force_save(None).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(backend.blocks(id), vec![block("n", 0)]);

        backend.clear_calls();
        for _ in 0..2 {
            let report = session.force_save(Some(doc.clone())).await.unwrap();
            assert!(report.is_noop());
        }
        assert!(writes(&backend).is_empty());
        assert!(!session.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_title_write_keeps_edit_and_retries() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();

        backend.fail_next_writes(1);
        session.title_changed("Renamed".to_string()).unwrap();
        tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;

        assert_eq!(session.local_title(), "Renamed");
        assert!(session.has_unsaved_changes());
        assert!(session.is_armed(SyncKey::Title));
        assert_eq!(session.status().state, SyncState::Error);
        assert_eq!(backend.notebook(id).unwrap().title, "Checkout latency");

        // First backoff step
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.notebook(id).unwrap().title, "Renamed");
        assert!(!session.has_unsaved_changes());
        assert!(!session.is_armed(SyncKey::Title));
        assert_eq!(session.status().state, SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_before_batch_update_skips_it() {
        let (backend, session, first) = setup(vec![block("a", 0), block("b", 0)]);
        let second_notebook = Notebook::new("Second".to_string());
        let second = second_notebook.id;
        backend.insert_notebook(second_notebook, vec![]);

        session.open(first).await.unwrap();
        session.blocks_changed(vec![block("a", 1)]).unwrap();
        backend.set_latency(Some(Duration::from_secs(1)));

        let session = Arc::new(session);
        let saver = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.force_save(None).await })
        };
        // Switch while the delete is in flight
        tokio::time::sleep(Duration::from_millis(500)).await;
        session.open(second).await.unwrap();

        let result = saver.await.unwrap();
        assert!(matches!(result, Err(SyncError::Superseded(_))));
        assert!(!backend
            .calls()
            .iter()
            .any(|c| matches!(c, BackendCall::UpdateBlocks { .. })));
        assert_eq!(backend.blocks(first), vec![block("a", 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_save_on_locked_notebook_writes_earlier_edits() {
        let (backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();

        session.blocks_changed(vec![block("a", 0)]).unwrap();
        session.set_locked(true).await.unwrap();

        let report = session.force_save(None).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(backend.blocks(id), vec![block("a", 0)]);
        assert!(!session.has_unsaved_changes());
        assert!(!session.is_armed(SyncKey::Blocks));
        assert!(matches!(
            session.blocks_changed(vec![]),
            Err(SyncError::ReadOnly)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_window_change_reaches_subscribers() {
        let (_backend, session, id) = setup(vec![]);
        session.open(id).await.unwrap();
        assert_eq!(session.resolved_window().span(), chrono::Duration::hours(1));

        let mut rx = session.subscribe_time_window();
        session
            .set_time_window(TimeWindowConfig::relative(RelativeWindow::Days7))
            .await
            .unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().span(), chrono::Duration::days(7));
        assert_eq!(session.context().unwrap().window.span(), chrono::Duration::days(7));

        // Rolling window is re-resolved on the poll interval
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        session.close();
        assert!(session.context().is_none());
        rx.borrow_and_update();
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_resolves_new_notebook_window() {
        let (backend, session, first) = setup(vec![]);
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let mut incident = Notebook::new("Incident".to_string());
        incident.time_window = TimeWindowConfig::absolute(start, end).unwrap();
        let second = incident.id;
        backend.insert_notebook(incident, vec![]);

        session.open(first).await.unwrap();
        session.open(second).await.unwrap();
        let window = session.resolved_window();
        assert_eq!((window.start, window.end), (start, end));

        // Fixed ranges are never re-published
        let rx = session.subscribe_time_window();
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_carries_active_filters_and_labels() {
        let (backend, session, id) = setup(vec![]);
        backend.set_labels(vec![Label {
            name: "env".to_string(),
            values: vec!["prod".to_string()],
        }]);
        assert!(session.context().is_none());
        assert!(matches!(
            session.add_filter(Filter::equals("env", "prod"), Utc::now()),
            Err(SyncError::NotLoaded)
        ));

        session.open(id).await.unwrap();
        session.load_labels().await.unwrap();
        let now = Utc::now();
        session.add_filter(Filter::equals("env", "prod"), now).unwrap();
        session.add_filter(Filter::equals("service", ""), now).unwrap();

        let context = session.context().unwrap();
        assert_eq!(context.filters, vec![Filter::equals("env", "prod")]);
        assert!(context.labels.contains("env"));
        assert_eq!(session.filters().len(), 2);

        // Draft grace is five seconds
        assert_eq!(session.prune_draft_filters(now + chrono::Duration::seconds(4)), 0);
        assert_eq!(session.prune_draft_filters(now + chrono::Duration::seconds(6)), 1);
        assert_eq!(session.filters(), vec![Filter::equals("env", "prod")]);

        // Filters belong to the open notebook; labels are backend-wide
        session.open(id).await.unwrap();
        assert!(session.filters().is_empty());
        assert!(session.context().unwrap().labels.contains("env"));
    }
}
