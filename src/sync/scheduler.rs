use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Independent debounce streams of a notebook session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncKey {
    Blocks,
    Title,
    Description,
}

impl SyncKey {
    pub const ALL: [SyncKey; 3] = [Self::Blocks, Self::Title, Self::Description];
}

impl std::fmt::Display for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Blocks => "blocks",
            Self::Title => "title",
            Self::Description => "description",
        };
        f.write_str(name)
    }
}

struct ArmedTimer {
    ticket: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    armed: HashMap<SyncKey, ArmedTimer>,
    next_ticket: u64,
}

/// Keyed debounce timers.
///
/// Arming a key cancels whatever was armed for it before, so a burst of
/// edits produces a single delivery once the burst has been idle for the
/// configured window. Fired keys are delivered on the channel returned by
/// [`DebounceScheduler::new`]; the payload itself lives with the session,
/// which always flushes its latest state.
///
/// Must be used from within a tokio runtime.
pub struct DebounceScheduler {
    idle: Duration,
    timers: Arc<Mutex<Timers>>,
    fired_tx: mpsc::UnboundedSender<SyncKey>,
}

impl DebounceScheduler {
    pub fn new(idle: Duration) -> (Self, mpsc::UnboundedReceiver<SyncKey>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            idle,
            timers: Arc::new(Mutex::new(Timers::default())),
            fired_tx,
        };
        (scheduler, fired_rx)
    }

    pub fn idle(&self) -> Duration {
        self.idle
    }

    /// Arm `key` for the idle window, replacing any armed timer.
    pub fn schedule(&self, key: SyncKey) {
        self.schedule_after(key, self.idle);
    }

    /// Arm `key` for an explicit delay (used for retry backoff).
    pub fn schedule_after(&self, key: SyncKey, delay: Duration) {
        let mut timers = self.timers.lock();
        if let Some(old) = timers.armed.remove(&key) {
            old.handle.abort();
        }

        timers.next_ticket += 1;
        let ticket = timers.next_ticket;
        let shared = Arc::clone(&self.timers);
        let fired_tx = self.fired_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut timers = shared.lock();
            // A replacement may have been armed between waking and locking
            let current = timers.armed.get(&key).map(|t| t.ticket) == Some(ticket);
            if current {
                timers.armed.remove(&key);
                drop(timers);
                let _ = fired_tx.send(key);
            }
        });

        timers.armed.insert(key, ArmedTimer { ticket, handle });
        log::trace!("Debounce: armed {} for {:?}", key, delay);
    }

    /// Cancel `key`. Returns whether a timer was armed.
    pub fn cancel(&self, key: SyncKey) -> bool {
        match self.timers.lock().armed.remove(&key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut timers = self.timers.lock();
        for (_, timer) in timers.armed.drain() {
            timer.handle.abort();
        }
    }

    pub fn is_armed(&self, key: SyncKey) -> bool {
        self.timers.lock().armed.contains_key(&key)
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_delivery() {
        let (scheduler, mut fired) = DebounceScheduler::new(Duration::from_secs(10));

        for _ in 0..5 {
            scheduler.schedule(SyncKey::Blocks);
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        assert!(scheduler.is_armed(SyncKey::Blocks));
        assert!(fired.try_recv().is_err());

        assert_eq!(fired.recv().await, Some(SyncKey::Blocks));
        assert!(!scheduler.is_armed(SyncKey::Blocks));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (scheduler, mut fired) = DebounceScheduler::new(Duration::from_secs(10));
        scheduler.schedule(SyncKey::Title);
        tokio::time::sleep(Duration::from_secs(5)).await;
        scheduler.schedule(SyncKey::Description);

        assert_eq!(fired.recv().await, Some(SyncKey::Title));
        assert_eq!(fired.recv().await, Some(SyncKey::Description));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_silences_timers() {
        let (scheduler, mut fired) = DebounceScheduler::new(Duration::from_secs(10));
        for key in SyncKey::ALL {
            scheduler.schedule(key);
        }
        scheduler.cancel_all();
        assert!(!scheduler.cancel(SyncKey::Blocks));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_uses_explicit_delay() {
        let (scheduler, mut fired) = DebounceScheduler::new(Duration::from_secs(10));
        scheduler.schedule_after(SyncKey::Blocks, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.try_recv().ok(), Some(SyncKey::Blocks));
    }
}
