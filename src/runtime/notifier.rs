//! Notifier - ephemeral status messages for the presentation layer.
//!
//! Every component reports user-visible success and failure here instead of
//! returning errors across the UI boundary. Notices are broadcast to
//! subscribers and the latest one is kept as `current()` until its display
//! duration elapses or a newer notice replaces it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::api::types::{Notice, NoticeLevel};

/// Default display time for informational and success notices
pub const NOTICE_DURATION: Duration = Duration::from_secs(2);

/// Default display time for error notices
pub const ERROR_NOTICE_DURATION: Duration = Duration::from_secs(4);

const CHANNEL_CAPACITY: usize = 32;

pub struct Notifier {
    tx: broadcast::Sender<Notice>,
    current: Arc<Mutex<Option<Notice>>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            current: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to all notices shown from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// The notice that should currently be visible, if any.
    pub fn current(&self) -> Option<Notice> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn info(&self, message: impl Into<String>) -> Notice {
        self.show(message, NoticeLevel::Info, NOTICE_DURATION)
    }

    pub fn success(&self, message: impl Into<String>) -> Notice {
        self.show(message, NoticeLevel::Success, NOTICE_DURATION)
    }

    pub fn error(&self, message: impl Into<String>) -> Notice {
        self.show(message, NoticeLevel::Error, ERROR_NOTICE_DURATION)
    }

    /// Show a notice for `duration`.
    ///
    /// Auto-dismiss is scheduled on the current tokio runtime when there is
    /// one; without a runtime the notice stays current until replaced.
    pub fn show(&self, message: impl Into<String>, level: NoticeLevel, duration: Duration) -> Notice {
        let notice = Notice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            message: message.into(),
            level,
            duration_ms: duration.as_millis() as u64,
        };

        match level {
            NoticeLevel::Error => log::warn!("Notice: {}", notice.message),
            _ => log::info!("Notice: {}", notice.message),
        }

        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(notice.clone());

        // No subscribers is fine; the notice is still current
        let _ = self.tx.send(notice.clone());

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let current = Arc::clone(&self.current);
            let id = notice.id;
            handle.spawn(async move {
                tokio::time::sleep(duration).await;
                let mut slot = current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if slot.as_ref().map(|n| n.id) == Some(id) {
                    *slot = None;
                }
            });
        }

        notice
    }

    /// Hide a notice early. Ignored if a newer notice already replaced it.
    pub fn dismiss(&self, id: u64) {
        let mut slot = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().map(|n| n.id) == Some(id) {
            *slot = None;
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
