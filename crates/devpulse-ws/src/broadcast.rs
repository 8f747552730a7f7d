//! Subject-based fanout with slow/dead-client isolation (spec §4.H).
//!
//! The registry is a plain `std::sync::Mutex` over a `HashMap`, matching
//! spec §5's "a single mutex or a message-passing discipline must serialize
//! mutations." Sends are `try_send` against a bounded per-client channel:
//! a full or closed channel marks the client for removal rather than
//! blocking or erroring the caller.

use crate::protocol::ServerFrame;
use devpulse_core::Event;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Capacity of each client's outbound channel. A client this far behind is
/// effectively dead from the broadcaster's point of view.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

/// A connected client's registry entry.
struct ClientHandle {
    sender: mpsc::Sender<ServerFrame>,
    subscriptions: HashSet<String>,
}

/// The subject-matched fanout broadcaster.
#[derive(Clone, Default)]
pub struct Broadcaster {
    clients: std::sync::Arc<Mutex<HashMap<String, ClientHandle>>>,
}

/// Fields needed to render a `session.update` frame.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    /// Session id.
    pub session_id: String,
    /// Owning workspace's resolved id.
    pub workspace_id: String,
    /// Current lifecycle, already rendered to its wire string.
    pub lifecycle: String,
    /// Summary text, once available.
    pub summary: Option<String>,
    /// Arbitrary stats payload.
    pub stats: Option<Value>,
}

/// Fields needed to render a `remote.update` frame (reserved; spec §4.G).
#[derive(Debug, Clone)]
pub struct RemoteUpdate {
    /// Remote environment id.
    pub remote_env_id: String,
    /// Owning workspace's resolved id.
    pub workspace_id: String,
    /// Current status string.
    pub status: String,
    /// Public IP, once assigned.
    pub public_ip: Option<String>,
}

impl Broadcaster {
    /// Build an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client, returning a channel the WS write task should
    /// drain and forward to the socket.
    pub fn register(&self, client_id: String) -> mpsc::Receiver<ServerFrame> {
        let (sender, receiver) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        let mut clients = self.clients.lock().expect("broadcaster mutex poisoned");
        clients.insert(
            client_id,
            ClientHandle {
                sender,
                subscriptions: HashSet::new(),
            },
        );
        receiver
    }

    /// Remove a client, e.g. on socket close.
    pub fn remove(&self, client_id: &str) {
        self.clients
            .lock()
            .expect("broadcaster mutex poisoned")
            .remove(client_id);
    }

    /// Add a subscription key (`"all"`, `"workspace:<id>"`, `"session:<id>"`)
    /// to a client's set.
    pub fn subscribe(&self, client_id: &str, scope: &str) {
        if let Some(handle) = self
            .clients
            .lock()
            .expect("broadcaster mutex poisoned")
            .get_mut(client_id)
        {
            handle.subscriptions.insert(scope.to_string());
        }
    }

    /// Remove a subscription key from a client's set.
    pub fn unsubscribe(&self, client_id: &str, scope: &str) {
        if let Some(handle) = self
            .clients
            .lock()
            .expect("broadcaster mutex poisoned")
            .get_mut(client_id)
        {
            handle.subscriptions.remove(scope);
        }
    }

    /// Fan out a newly processed event to every matching client.
    pub fn broadcast_event(&self, event: &Event) {
        let payload = serde_json::to_value(event).unwrap_or(Value::Null);
        self.fanout(
            Some(&event.workspace_id),
            event.session_id.as_deref(),
            ServerFrame::Event { event: payload },
        );
    }

    /// Fan out a session lifecycle/summary change.
    pub fn broadcast_session_update(&self, update: SessionUpdate) {
        let workspace_id = update.workspace_id.clone();
        let session_id = update.session_id.clone();
        self.fanout(
            Some(&workspace_id),
            Some(&session_id),
            ServerFrame::SessionUpdate {
                session_id: update.session_id,
                lifecycle: update.lifecycle,
                summary: update.summary,
                stats: update.stats,
            },
        );
    }

    /// Fan out a remote environment status change.
    pub fn broadcast_remote_update(&self, update: RemoteUpdate) {
        let workspace_id = update.workspace_id.clone();
        self.fanout(
            Some(&workspace_id),
            None,
            ServerFrame::RemoteUpdate {
                remote_env_id: update.remote_env_id,
                workspace_id: update.workspace_id,
                status: update.status,
                public_ip: update.public_ip,
            },
        );
    }

    /// Send `frame` to every client whose subscription set matches, and
    /// evict any client whose channel is full or closed.
    fn fanout(&self, workspace_id: Option<&str>, session_id: Option<&str>, frame: ServerFrame) {
        let workspace_key = workspace_id.map(|w| format!("workspace:{w}"));
        let session_key = session_id.map(|s| format!("session:{s}"));

        let mut dead = Vec::new();
        {
            let clients = self.clients.lock().expect("broadcaster mutex poisoned");
            for (client_id, handle) in clients.iter() {
                let matches = handle.subscriptions.contains("all")
                    || workspace_key
                        .as_deref()
                        .is_some_and(|k| handle.subscriptions.contains(k))
                    || session_key
                        .as_deref()
                        .is_some_and(|k| handle.subscriptions.contains(k));
                if !matches {
                    continue;
                }
                if handle.sender.try_send(frame.clone()).is_err() {
                    dead.push(client_id.clone());
                }
            }
        }

        if !dead.is_empty() {
            let mut clients = self.clients.lock().expect("broadcaster mutex poisoned");
            for client_id in dead {
                tracing::debug!(client_id, "evicting unresponsive ws client");
                clients.remove(&client_id);
            }
        }
    }

    /// Send a frame to a single client directly (acks, errors), bypassing
    /// subscription matching. A missing or full channel is silently dropped;
    /// the next fanout pass or ping timeout will reap a dead client.
    pub fn send_to(&self, client_id: &str, frame: ServerFrame) {
        if let Some(handle) = self.clients.lock().expect("broadcaster mutex poisoned").get(client_id) {
            let _ = handle.sender.try_send(frame);
        }
    }

    /// Number of currently registered clients, for health/metrics reporting.
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("broadcaster mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use devpulse_core::EventId;

    fn sample_event(workspace_id: &str, session_id: Option<&str>) -> Event {
        Event {
            id: EventId::new(),
            event_type: "session.start".to_string(),
            timestamp: Utc::now(),
            device_id: "D1".to_string(),
            workspace_id: workspace_id.to_string(),
            session_id: session_id.map(str::to_string),
            data: serde_json::json!({}),
            blob_refs: vec![],
            ingested_at: None,
        }
    }

    #[tokio::test]
    async fn all_subscribers_receive_every_event() {
        let b = Broadcaster::new();
        let mut rx = b.register("C1".to_string());
        b.subscribe("C1", "all");

        b.broadcast_event(&sample_event("W1", None));
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::Event { .. }));
    }

    #[tokio::test]
    async fn workspace_subscribers_do_not_receive_other_workspaces() {
        let b = Broadcaster::new();
        let mut rx = b.register("C1".to_string());
        b.subscribe("C1", "workspace:W1");

        b.broadcast_event(&sample_event("W2", None));
        assert!(rx.try_recv().is_err());

        b.broadcast_event(&sample_event("W1", None));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn dead_client_is_evicted_on_next_broadcast() {
        let b = Broadcaster::new();
        let rx = b.register("C1".to_string());
        b.subscribe("C1", "all");
        drop(rx);

        b.broadcast_event(&sample_event("W1", None));
        assert_eq!(b.client_count(), 0);
    }
}
