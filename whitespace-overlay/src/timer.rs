//! Cancellable one-shot debounce timer.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::OverlayEvent;

/// At most one pending timer. Starting a new one cancels the previous, and a
/// cancelled timer never delivers its event.
#[derive(Default)]
pub struct DebounceTimer {
    pending: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post `DebounceElapsed { generation }` to `events` after `delay`.
    pub fn start(&mut self, delay: Duration, generation: u64, events: mpsc::WeakSender<OverlayEvent>) {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(events) = events.upgrade() {
                let _ = events.send(OverlayEvent::DebounceElapsed { generation }).await;
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
