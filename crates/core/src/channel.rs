//! Directive Channel
//!
//! Routes display commands from a session to that session's display
//! endpoint. One registry is built per process and cloned into every
//! session; each display socket registers its sender under the session id
//! and drains the receiving half in order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// A command for a session's display surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisplayEvent {
    /// Serializes as `{"show": "<key>"}`.
    Show { show: String },
    /// Serializes as `{"hide": true}`.
    Hide { hide: bool },
}

impl DisplayEvent {
    pub fn show(key: impl Into<String>) -> Self {
        Self::Show { show: key.into() }
    }

    pub fn hide() -> Self {
        Self::Hide { hide: true }
    }

    pub fn to_json(&self) -> String {
        // Both variants are plain string/bool maps.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// The sending half held by the registry for one display connection.
pub type DisplayEndpoint = mpsc::UnboundedSender<DisplayEvent>;

/// Creates a connected endpoint and the receiver its writer task drains.
pub fn display_endpoint() -> (DisplayEndpoint, mpsc::UnboundedReceiver<DisplayEvent>) {
    mpsc::unbounded_channel()
}

/// A cloneable handle to the shared session-to-display registry.
#[derive(Clone, Default)]
pub struct DirectiveChannel {
    endpoints: Arc<RwLock<HashMap<String, DisplayEndpoint>>>,
}

impl DirectiveChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint, replacing any previous one for the session.
    pub async fn register(&self, session_id: &str, endpoint: DisplayEndpoint) {
        let replaced = self
            .endpoints
            .write()
            .await
            .insert(session_id.to_string(), endpoint)
            .is_some();
        info!(%session_id, replaced, "Display endpoint registered");
    }

    pub async fn unregister(&self, session_id: &str) {
        if self.endpoints.write().await.remove(session_id).is_some() {
            info!(%session_id, "Display endpoint unregistered");
        }
    }

    /// Removes the session's endpoint only while it is still `endpoint`.
    pub async fn release(&self, session_id: &str, endpoint: &DisplayEndpoint) {
        let mut endpoints = self.endpoints.write().await;
        if endpoints
            .get(session_id)
            .is_some_and(|current| current.same_channel(endpoint))
        {
            endpoints.remove(session_id);
            info!(%session_id, "Display endpoint released");
        }
    }

    pub async fn send_show(&self, session_id: &str, key: &str) {
        self.deliver(session_id, DisplayEvent::show(key)).await;
    }

    pub async fn send_hide(&self, session_id: &str) {
        self.deliver(session_id, DisplayEvent::hide()).await;
    }

    pub async fn is_registered(&self, session_id: &str) -> bool {
        self.endpoints.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }

    async fn deliver(&self, session_id: &str, event: DisplayEvent) {
        let endpoint = match self.endpoints.read().await.get(session_id) {
            Some(endpoint) => endpoint.clone(),
            None => {
                debug!(%session_id, ?event, "No display endpoint, dropping event");
                return;
            }
        };

        if let Err(e) = endpoint.send(event) {
            warn!(%session_id, event = ?e.0, "Display endpoint closed, unregistering");
            let mut endpoints = self.endpoints.write().await;
            // A newer connection may have replaced the dead one meanwhile.
            if endpoints
                .get(session_id)
                .is_some_and(|current| current.same_channel(&endpoint))
            {
                endpoints.remove(session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shapes() {
        assert_eq!(DisplayEvent::show("letter_A").to_json(), r#"{"show":"letter_A"}"#);
        assert_eq!(DisplayEvent::hide().to_json(), r#"{"hide":true}"#);
        let parsed: DisplayEvent = serde_json::from_str(r#"{"show":"number_3"}"#).unwrap();
        assert_eq!(parsed, DisplayEvent::show("number_3"));
    }

    #[tokio::test]
    async fn test_events_arrive_in_issue_order() {
        let channel = DirectiveChannel::new();
        let (tx, mut rx) = display_endpoint();
        channel.register("s1", tx).await;

        channel.send_show("s1", "letter_A").await;
        channel.send_show("s1", "letter_E").await;
        channel.send_hide("s1").await;

        assert_eq!(rx.recv().await, Some(DisplayEvent::show("letter_A")));
        assert_eq!(rx.recv().await, Some(DisplayEvent::show("letter_E")));
        assert_eq!(rx.recv().await, Some(DisplayEvent::hide()));
    }

    #[tokio::test]
    async fn test_send_to_unregistered_session_does_not_register() {
        let channel = DirectiveChannel::new();
        channel.send_show("ghost", "letter_A").await;
        channel.send_hide("ghost").await;
        assert!(!channel.is_registered("ghost").await);
        assert_eq!(channel.len().await, 0);
    }

    #[tokio::test]
    async fn test_closed_endpoint_is_removed() {
        let channel = DirectiveChannel::new();
        let (tx, rx) = display_endpoint();
        channel.register("s1", tx).await;
        drop(rx);

        channel.send_show("s1", "letter_A").await;
        assert!(!channel.is_registered("s1").await);
    }

    #[tokio::test]
    async fn test_register_replaces_and_unregister_is_idempotent() {
        let channel = DirectiveChannel::new();
        let (old_tx, mut old_rx) = display_endpoint();
        let (new_tx, mut new_rx) = display_endpoint();
        channel.register("s1", old_tx).await;
        channel.register("s1", new_tx).await;
        assert_eq!(channel.len().await, 1);

        channel.send_show("s1", "number_2").await;
        assert_eq!(new_rx.recv().await, Some(DisplayEvent::show("number_2")));
        assert!(old_rx.try_recv().is_err());

        channel.unregister("s1").await;
        channel.unregister("s1").await;
        assert!(channel.is_empty().await);
    }

    #[tokio::test]
    async fn test_release_keeps_newer_endpoint() {
        let channel = DirectiveChannel::new();
        let (old_tx, _old_rx) = display_endpoint();
        let (new_tx, _new_rx) = display_endpoint();
        channel.register("s1", old_tx.clone()).await;
        channel.register("s1", new_tx.clone()).await;

        channel.release("s1", &old_tx).await;
        assert!(channel.is_registered("s1").await);
        channel.release("s1", &new_tx).await;
        assert!(!channel.is_registered("s1").await);
    }

    #[tokio::test]
    async fn test_clones_share_one_registry() {
        let channel = DirectiveChannel::new();
        let clone = channel.clone();
        let (tx, _rx) = display_endpoint();
        clone.register("s1", tx).await;
        assert!(channel.is_registered("s1").await);
    }
}
