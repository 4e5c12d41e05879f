//! Notification transport boundary.
//!
//! Watchers report findings as plain text. Delivery (chat bots, email) is
//! an external concern; the crate ships a tracing-backed notifier.

use async_trait::async_trait;

use crate::config::NotificationConfig;
use crate::error::WatchResult;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, text: &str) -> WatchResult<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    enabled: bool,
}

impl LogNotifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            enabled: config.enabled,
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(&self, text: &str) -> WatchResult<()> {
        if self.enabled {
            crate::log_event!("notify", "message", "{text}");
        } else {
            crate::debug_event!("notify", "dropped (notifications disabled)");
        }
        Ok(())
    }
}
