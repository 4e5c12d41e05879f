//! Webhook ingress shared by all watchers.
//!
//! One [`WebhookListener`] per process context. Watchers with the route
//! capability claim `(method, path)` pairs on it during startup; the table
//! freezes when the listener starts serving.
//!
//! ```text
//! ListenerSlot::get_instance()
//!        |
//!   WebhookListener ── RouteTable ── RouteRegistration (owner, handler)
//!        |
//!   axum::serve  ──>  WebhookHandler::handle(WebhookRequest)
//! ```

mod handler;
mod listener;
mod routes;
mod slot;

pub use handler::{WebhookHandler, WebhookRequest, WebhookResponse, handler_fn};
pub use listener::{ListenerConfig, WebhookListener};
pub use routes::{RouteKey, RouteRegistration, RouteScope, RouteTable};
pub use slot::ListenerSlot;
