use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::host::ElementId;
use crate::notify::NotificationId;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a timer is for; dispatched by the widget when the timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Trailing edge of the height throttle window.
    TrailingHeight(ElementId),
    /// Delayed cooperative height request after a frame load.
    RequestHeight(ElementId),
    /// End of the window in which a height reply is expected.
    LivenessCheck(ElementId),
    /// Drop the height transition once it has run.
    ClearTransition(ElementId),
    DismissNotification(NotificationId),
    /// Retry loading the HLS script for a video.
    RetryScript(ElementId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFire {
    pub timer_id: TimerId,
    pub kind: TimerKind,
}

#[derive(Debug)]
struct TimerEntry {
    kind: TimerKind,
    cancel_tx: mpsc::UnboundedSender<()>,
}

/// One-shot timers backed by the tokio clock.
///
/// Fires are queued on a channel and drained by the owner's event loop via
/// [`TimerRegistry::try_recv_timer`]; a timer cleared after its fire was queued
/// is never delivered. Must be created inside a tokio runtime.
pub struct TimerRegistry {
    tokio_handle: Handle,
    timers: RefCell<HashMap<TimerId, TimerEntry>>,
    message_tx: mpsc::UnboundedSender<TimerId>,
    message_rx: RefCell<mpsc::UnboundedReceiver<TimerId>>,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        Self {
            tokio_handle: Handle::current(),
            timers: RefCell::new(HashMap::new()),
            message_tx,
            message_rx: RefCell::new(message_rx),
        }
    }

    pub fn set_timeout(&self, delay: Duration, kind: TimerKind) -> TimerId {
        let timer_id = TimerId(NEXT_TIMER_ID.fetch_add(1, Ordering::SeqCst));
        let message_tx = self.message_tx.clone();
        let (cancel_tx, mut cancel_rx) = mpsc::unbounded_channel::<()>();

        self.tokio_handle.spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {
                    let _ = message_tx.send(timer_id);
                }
                _ = cancel_rx.recv() => {
                    // Cleared, or the registry went away.
                }
            }
        });

        self.timers
            .borrow_mut()
            .insert(timer_id, TimerEntry { kind, cancel_tx });
        timer_id
    }

    pub fn clear_timer(&self, timer_id: TimerId) {
        if let Some(entry) = self.timers.borrow_mut().remove(&timer_id) {
            let _ = entry.cancel_tx.send(());
        }
    }

    pub fn is_active(&self, timer_id: TimerId) -> bool {
        self.timers.borrow().contains_key(&timer_id)
    }

    pub fn active_count(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn try_recv_timer(&self) -> Option<TimerFire> {
        let mut rx = self.message_rx.borrow_mut();
        while let Ok(timer_id) = rx.try_recv() {
            if let Some(entry) = self.timers.borrow_mut().remove(&timer_id) {
                return Some(TimerFire {
                    timer_id,
                    kind: entry.kind,
                });
            }
        }
        None
    }

    pub fn clear_all(&self) {
        let mut timers = self.timers.borrow_mut();
        for (_, entry) in timers.drain() {
            let _ = entry.cancel_tx.send(());
        }
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delivers_fired_timers() {
        let registry = TimerRegistry::new();
        let id = registry.set_timeout(
            Duration::from_millis(100),
            TimerKind::RequestHeight(ElementId(1)),
        );

        assert!(registry.try_recv_timer().is_none());
        sleep(Duration::from_millis(150)).await;

        let fire = registry.try_recv_timer().expect("timer should have fired");
        assert_eq!(fire.timer_id, id);
        assert_eq!(fire.kind, TimerKind::RequestHeight(ElementId(1)));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_timers_never_fire() {
        let registry = TimerRegistry::new();
        let id = registry.set_timeout(
            Duration::from_millis(50),
            TimerKind::ClearTransition(ElementId(2)),
        );
        sleep(Duration::from_millis(100)).await;

        // Already queued on the channel, but cleared before it was drained.
        registry.clear_timer(id);
        assert!(registry.try_recv_timer().is_none());
    }
}
