//! Process-wide registry of connected chat clients.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::messages::{ChatMessageRoute, ChatOutgoingMessage};

/// Outbound channels of every connected client, keyed by connection id.
#[derive(Default)]
pub struct ClientHub {
    clients: DashMap<Uuid, mpsc::Sender<ChatMessageRoute>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: Uuid, sender: mpsc::Sender<ChatMessageRoute>) {
        self.clients.insert(connection_id, sender);
    }

    pub fn unregister(&self, connection_id: &Uuid) {
        self.clients.remove(connection_id);
    }

    /// Send a message to every connected client. Returns how many accepted it.
    pub async fn broadcast(&self, message: ChatOutgoingMessage) -> usize {
        // clone the senders out so no shard lock is held across an await
        let senders: Vec<(Uuid, mpsc::Sender<ChatMessageRoute>)> = self
            .clients
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (connection_id, sender) in senders {
            match sender
                .send(ChatMessageRoute::Outgoing(message.clone()))
                .await
            {
                Ok(()) => delivered += 1,
                Err(_) => debug!(connection_id = %connection_id, "Skipping closed client in broadcast"),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
