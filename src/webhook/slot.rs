//! Lazily constructed, shared listener instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::listener::{ListenerConfig, WebhookListener};

/// Holds the one listener of a process context.
///
/// Every caller of [`ListenerSlot::get_instance`] gets the same `Arc` until
/// the slot is released, so no two listeners compete for a port.
#[derive(Default)]
pub struct ListenerSlot {
    current: Mutex<Option<Arc<WebhookListener>>>,
    constructed: AtomicUsize,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the listener, constructing it with `config` on first use.
    ///
    /// `config` is ignored when an instance already exists.
    pub fn get_instance(&self, config: &ListenerConfig) -> Arc<WebhookListener> {
        let mut current = self.current.lock();
        if let Some(listener) = current.as_ref() {
            return listener.clone();
        }

        let listener = Arc::new(WebhookListener::new(config.clone()));
        self.constructed.fetch_add(1, Ordering::SeqCst);
        crate::debug_event!("listener", "created", "host {}", config.host);
        *current = Some(listener.clone());
        listener
    }

    /// The current listener without constructing one.
    pub fn current(&self) -> Option<Arc<WebhookListener>> {
        self.current.lock().clone()
    }

    /// Empty the slot so the next start cycle builds a fresh listener.
    pub fn release(&self) -> Option<Arc<WebhookListener>> {
        self.current.lock().take()
    }

    /// How many listeners this slot has built over its lifetime.
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }
}
