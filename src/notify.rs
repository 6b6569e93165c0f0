//! Transient user notifications ("toasts").
//!
//! Components never reach for a global: they are handed an
//! `Arc<dyn NotificationSink>` and enqueue messages for a recipient. The web
//! shell drains the viewer's queue whenever it renders a page.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait NotificationSink: Send + Sync {
    /// Fire-and-forget: the recipient may never see it.
    fn enqueue(&self, recipient: &str, message: &str);
}

struct Toast {
    message: String,
    expires_at: Instant,
}

pub struct ToastQueue {
    ttl: Duration,
    queues: Mutex<HashMap<String, Vec<Toast>>>,
}

impl ToastQueue {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Remove and return the recipient's unexpired messages, oldest first.
    pub fn drain(&self, recipient: &str) -> Vec<String> {
        let now = Instant::now();
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        // Drop anything stale for other recipients while we hold the lock.
        queues.retain(|_, toasts| {
            toasts.retain(|t| t.expires_at > now);
            !toasts.is_empty()
        });
        queues
            .remove(recipient)
            .map(|toasts| toasts.into_iter().map(|t| t.message).collect())
            .unwrap_or_default()
    }

    pub fn pending(&self, recipient: &str) -> usize {
        let now = Instant::now();
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(recipient)
            .map(|toasts| toasts.iter().filter(|t| t.expires_at > now).count())
            .unwrap_or(0)
    }
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new(Duration::from_millis(2500))
    }
}

impl NotificationSink for ToastQueue {
    fn enqueue(&self, recipient: &str, message: &str) {
        tracing::debug!(recipient, message, "toast queued");
        let toast = Toast {
            message: message.to_string(),
            expires_at: Instant::now() + self.ttl,
        };
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(recipient.to_string())
            .or_default()
            .push(toast);
    }
}
