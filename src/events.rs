//! Event Fabric (C10): push-only event channel to connected UI clients, keyed
//! by account.
//!
//! A per-account fan-out registry backs both transports named in §4.5 — the
//! upgraded WebSocket endpoint and the long-polling fallback — so an event
//! emitted once is visible to subscribers on either one. No delivery
//! guarantee beyond best-effort to currently connected clients; a bounded
//! channel is correct here, drops under overload are acceptable.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Channel capacity per account. Slow subscribers fall behind and lose the
/// oldest events rather than stalling the emitter — consistent with "drops
/// under overload are acceptable" (§5).
const CHANNEL_CAPACITY: usize = 64;

/// One push event, tagged with its catalog name (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Event {
    EmailsUpdated {
        account_id: String,
        count_new: i64,
    },
    AiSummaryReady {
        account_id: String,
        provider_message_id: String,
        timestamp: DateTime<Utc>,
    },
}

/// Per-account broadcast channel registry. Cheaply `Clone`d — internally an
/// `Arc`-backed map — so it can be held by both route handlers and background
/// tasks without extra wrapping.
#[derive(Clone, Default)]
pub struct EventFabric {
    channels: std::sync::Arc<DashMap<String, broadcast::Sender<Event>>>,
}

impl EventFabric {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, account_id: &str) -> broadcast::Sender<Event> {
        self.channels
            .entry(account_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribe to an account's event stream. Used by both the WebSocket
    /// handler and the long-poll endpoint.
    pub fn subscribe(&self, account_id: &str) -> broadcast::Receiver<Event> {
        self.sender_for(account_id).subscribe()
    }

    /// `emit` (§4.5): fire and forget. No error is raised when there are no
    /// subscribers — that is the common case between UI sessions.
    pub fn emit(&self, account_id: &str, event: Event) {
        let sender = self.sender_for(account_id);
        let _ = sender.send(event);
    }

    pub fn emit_emails_updated(&self, account_id: &str, count_new: i64) {
        self.emit(
            account_id,
            Event::EmailsUpdated {
                account_id: account_id.to_string(),
                count_new,
            },
        );
    }

    pub fn emit_ai_summary_ready(&self, account_id: &str, provider_message_id: &str) {
        self.emit(
            account_id,
            Event::AiSummaryReady {
                account_id: account_id.to_string(),
                provider_message_id: provider_message_id.to_string(),
                timestamp: Utc::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let fabric = EventFabric::new();
        let mut rx = fabric.subscribe("acct-1");

        fabric.emit_emails_updated("acct-1", 3);

        let received = rx.recv().await.unwrap();
        match received {
            Event::EmailsUpdated { account_id, count_new } => {
                assert_eq!(account_id, "acct-1");
                assert_eq!(count_new, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_are_scoped_per_account() {
        let fabric = EventFabric::new();
        let mut rx_a = fabric.subscribe("acct-a");
        let _rx_b = fabric.subscribe("acct-b");

        fabric.emit_emails_updated("acct-a", 1);

        assert!(rx_a.recv().await.is_ok());
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let fabric = EventFabric::new();
        fabric.emit_emails_updated("acct-nobody-listening", 0);
    }
}
