//! Side-channel webhook delivery.
//!
//! The linking engine fires "initial" and "historical" notifications when a
//! login-only session declares a webhook URL. Delivery is fire-and-forget:
//! the request path initiates the send and never awaits or observes it.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Notification kinds, in the order they are initiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Initial,
    Historical,
}

impl WebhookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookKind::Initial => "initial",
            WebhookKind::Historical => "historical",
        }
    }
}

/// Capability interface for outbound notification delivery.
///
/// Supplied to the engine at construction. Implementations must not let
/// delivery failures propagate back into the request path.
pub trait WebhookSender: Send + Sync {
    fn send(&self, url: &str, kind: WebhookKind, payload: Value);
}

/// Discards every notification. Default for engines built without a sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWebhookSender;

impl WebhookSender for NullWebhookSender {
    fn send(&self, _url: &str, _kind: WebhookKind, _payload: Value) {}
}

/// Delivers notifications as HTTP POSTs on a tokio runtime.
///
/// Each send spawns a detached task; failures are logged and dropped.
pub struct HttpWebhookSender {
    client: reqwest::Client,
    handle: tokio::runtime::Handle,
}

impl HttpWebhookSender {
    /// Build a sender on the current tokio runtime.
    ///
    /// # Panics
    /// Panics outside a runtime context; use [`HttpWebhookSender::with_handle`]
    /// to supply one explicitly.
    pub fn new() -> Self {
        Self::with_handle(tokio::runtime::Handle::current())
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self {
            client: reqwest::Client::new(),
            handle,
        }
    }
}

impl WebhookSender for HttpWebhookSender {
    fn send(&self, url: &str, kind: WebhookKind, payload: Value) {
        let client = self.client.clone();
        let url = url.to_string();
        self.handle.spawn(async move {
            if let Err(e) = client.post(&url).json(&payload).send().await {
                warn!("{} webhook delivery to {} failed: {}", kind.as_str(), url, e);
            }
        });
    }
}

/// Records every notification instead of delivering it. This is the
/// test-harness implementation of the capability.
#[derive(Debug, Default, Clone)]
pub struct RecordingWebhookSender {
    sent: Arc<Mutex<Vec<(String, WebhookKind, Value)>>>,
}

impl RecordingWebhookSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far, in initiation order.
    pub fn sent(&self) -> Vec<(String, WebhookKind, Value)> {
        self.sent
            .lock()
            .expect("recording sender lock poisoned")
            .clone()
    }
}

impl WebhookSender for RecordingWebhookSender {
    fn send(&self, url: &str, kind: WebhookKind, payload: Value) {
        self.sent
            .lock()
            .expect("recording sender lock poisoned")
            .push((url.to_string(), kind, payload));
    }
}
