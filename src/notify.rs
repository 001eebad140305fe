//! Error and notification reporting.
//!
//! Components report user-relevant failures here instead of returning them to
//! the host page. Every notification is logged through `tracing`; rendering is
//! left to an optional [`NotificationSink`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::timers::{TimerId, TimerKind, TimerRegistry};

const AUTO_DISMISS: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
    Critical,
}

/// A retry offered to the user alongside a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAction {
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub level: Level,
    pub context: Option<String>,
    pub error: Option<String>,
    pub retry: Option<RetryAction>,
}

impl Notification {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
            context: None,
            error: None,
            retry: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_retry(mut self, retry: RetryAction) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Renders notifications for the user.
pub trait NotificationSink {
    fn show(&self, id: NotificationId, notification: &Notification);
    fn dismiss(&self, id: NotificationId);
}

struct Active {
    notification: Notification,
    dismiss_timer: Option<TimerId>,
}

pub struct Notifier {
    timers: Rc<TimerRegistry>,
    sink: Option<Box<dyn NotificationSink>>,
    active: RefCell<BTreeMap<NotificationId, Active>>,
    next_id: RefCell<u64>,
}

impl Notifier {
    pub fn new(timers: Rc<TimerRegistry>, sink: Option<Box<dyn NotificationSink>>) -> Self {
        Self {
            timers,
            sink,
            active: RefCell::new(BTreeMap::new()),
            next_id: RefCell::new(1),
        }
    }

    pub fn report(&self, notification: Notification) -> NotificationId {
        let context = notification.context.as_deref().unwrap_or("");
        let cause = notification.error.as_deref().unwrap_or("");
        match notification.level {
            Level::Info => info!(context, "{}", notification.message),
            Level::Warning => warn!(context, error = cause, "{}", notification.message),
            Level::Error | Level::Critical => {
                error!(context, error = cause, level = ?notification.level, "{}", notification.message)
            }
        }

        let id = {
            let mut next = self.next_id.borrow_mut();
            let id = NotificationId(*next);
            *next += 1;
            id
        };

        let dismiss_timer = (notification.level != Level::Critical)
            .then(|| self.timers.set_timeout(AUTO_DISMISS, TimerKind::DismissNotification(id)));

        if let Some(sink) = &self.sink {
            sink.show(id, &notification);
        }
        self.active.borrow_mut().insert(
            id,
            Active {
                notification,
                dismiss_timer,
            },
        );
        id
    }

    pub fn dismiss(&self, id: NotificationId) -> bool {
        let Some(active) = self.active.borrow_mut().remove(&id) else {
            return false;
        };
        if let Some(timer) = active.dismiss_timer {
            self.timers.clear_timer(timer);
        }
        if let Some(sink) = &self.sink {
            sink.dismiss(id);
        }
        true
    }

    /// Handle an auto-dismiss timer. Returns `false` for timers it does not own.
    pub fn on_timer(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::DismissNotification(id) => {
                self.dismiss(id);
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> Vec<Notification> {
        self.active
            .borrow()
            .values()
            .map(|active| active.notification.clone())
            .collect()
    }

    pub fn clear(&self) {
        let ids: Vec<NotificationId> = self.active.borrow().keys().copied().collect();
        for id in ids {
            self.dismiss(id);
        }
    }
}

/// Exponential backoff with a fixed attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            factor: 2,
            max_attempts: 3,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based), or `None` once the cap
    /// is reached.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let multiplier = self.factor.saturating_pow(attempt - 1);
        Some(self.base.saturating_mul(multiplier))
    }

    pub fn retry_action(&self, attempt: u32) -> Option<RetryAction> {
        self.delay(attempt).map(|delay| RetryAction {
            attempt,
            max_attempts: self.max_attempts,
            delay_ms: delay.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.delay(2), Some(Duration::from_millis(2000)));
        assert_eq!(backoff.delay(3), None);
        assert_eq!(backoff.delay(0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_auto_dismiss_except_critical() {
        let timers = Rc::new(TimerRegistry::new());
        let notifier = Notifier::new(Rc::clone(&timers), None);

        notifier.report(Notification::new(Level::Warning, "Video could not be loaded"));
        notifier.report(Notification::new(Level::Critical, "Widget failed"));
        assert_eq!(notifier.active().len(), 2);

        tokio::time::sleep(Duration::from_millis(5100)).await;
        while let Some(fire) = timers.try_recv_timer() {
            assert!(notifier.on_timer(fire.kind));
        }

        let remaining = notifier.active();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].level, Level::Critical);
    }
}
