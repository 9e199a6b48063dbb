//! Notification sink
//!
//! User-visible success/error messages (toasts) are pushed through a
//! `Notifier` supplied by the host.

use crate::types::{Notification, NotificationVariant};
use std::sync::RwLock;

/// Side channel for user-visible notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that only writes structured log events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.variant {
            NotificationVariant::Default => tracing::info!(
                title = %notification.title,
                description = %notification.description,
                "Notification"
            ),
            NotificationVariant::Destructive => tracing::warn!(
                title = %notification.title,
                description = %notification.description,
                "Notification"
            ),
        }
    }
}

/// Notifier that records everything it receives
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    received: RwLock<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications received so far, oldest first
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Most recent notification
    pub fn last(&self) -> Option<Notification> {
        self.received.read().ok().and_then(|r| r.last().cloned())
    }

    pub fn len(&self) -> usize {
        self.received.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: Notification) {
        if let Ok(mut received) = self.received.write() {
            received.push(notification);
        }
    }
}
