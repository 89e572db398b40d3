//! Per-connection client event router.
//!
//! Translates the four client operations into registry and controller calls.
//! Session events are delivered through a [`ConnectionEventSink`] bound to the
//! invoking connection's channel, so a session never reaches another client.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::realtime::{EventSink, SessionController, SessionEvent};
use crate::state::AppState;

use super::messages::{ChatMessageRoute, ChatOutgoingMessage, MessageType};

/// Delivers session events to a single connection.
pub struct ConnectionEventSink {
    connection_id: Uuid,
    tx: mpsc::Sender<ChatMessageRoute>,
}

impl ConnectionEventSink {
    pub fn new(connection_id: Uuid, tx: mpsc::Sender<ChatMessageRoute>) -> Self {
        Self { connection_id, tx }
    }
}

#[async_trait]
impl EventSink for ConnectionEventSink {
    async fn deliver(&self, event: SessionEvent) {
        let kind = event.kind();
        if self
            .tx
            .send(ChatMessageRoute::Outgoing(event.into()))
            .await
            .is_err()
        {
            debug!(connection_id = %self.connection_id, kind, "Client gone, dropping session event");
        }
    }
}

/// Routes one connection's operations.
pub struct ClientEventRouter {
    connection_id: Uuid,
    /// Registry key for this connection's session
    identity: String,
    state: Arc<AppState>,
    tx: mpsc::Sender<ChatMessageRoute>,
}

impl ClientEventRouter {
    pub fn new(connection_id: Uuid, state: Arc<AppState>, tx: mpsc::Sender<ChatMessageRoute>) -> Self {
        Self {
            connection_id,
            identity: connection_id.to_string(),
            state,
            tx,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Broadcast a typed chat message to every connected client.
    pub async fn send_message(&self, user: String, message: String) {
        let delivered = self
            .state
            .hub
            .broadcast(ChatOutgoingMessage::ReceiveMessage {
                user,
                message,
                message_type: MessageType::User,
            })
            .await;
        debug!(connection_id = %self.connection_id, delivered, "Chat message broadcast");
    }

    /// Register a session and launch its controller.
    ///
    /// Returns once the session is registered; connecting happens in the
    /// background. A second call while a session exists does nothing.
    pub async fn start_mic(&self) {
        let sessions = &self.state.sessions;
        let Some(lease) = sessions.start(&self.identity) else {
            debug!(connection_id = %self.connection_id, "Microphone already on");
            return;
        };

        let upstream = match self.state.config.upstream_config() {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "Cannot start realtime session");
                sessions.release(&self.identity, lease.session_id);
                self.send(SessionEvent::SystemError(e.to_string()).into())
                    .await;
                self.send(ChatOutgoingMessage::MicStatus { enabled: false })
                    .await;
                return;
            }
        };

        self.send(ChatOutgoingMessage::MicStatus { enabled: true })
            .await;

        let controller = SessionController::new(
            lease.session_id.to_string(),
            upstream,
            self.state.connector.clone(),
            lease.queue.clone(),
            Arc::new(ConnectionEventSink::new(self.connection_id, self.tx.clone())),
            lease.token.clone(),
            lease.state.clone(),
            self.state.config.session.timing(),
        );

        let registry = self.state.sessions.clone();
        let identity = self.identity.clone();
        let session_id = lease.session_id;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let outcome = controller.run().await;
            // a session that ended on its own reports the mic as off; a
            // stopped one is reported by stop_mic
            if registry.release(&identity, session_id) {
                let _ = tx
                    .send(ChatMessageRoute::Outgoing(ChatOutgoingMessage::MicStatus {
                        enabled: false,
                    }))
                    .await;
            }
            outcome
        });

        if !sessions.attach_task(&self.identity, session_id, handle) {
            debug!(connection_id = %self.connection_id, %session_id, "Session ended before its task was attached");
        }
        info!(connection_id = %self.connection_id, %session_id, "Microphone on");
    }

    /// Queue an audio fragment; dropped when no session is active.
    pub fn send_audio_chunk(&self, audio: String) {
        if !self.state.sessions.enqueue_audio(&self.identity, audio) {
            debug!(connection_id = %self.connection_id, "No active session, dropping audio chunk");
        }
    }

    /// Stop the session, wait for its teardown, then report the mic as off.
    ///
    /// Nothing is reported when no session was registered; a session that
    /// ended on its own has already reported itself.
    pub async fn stop_mic(&self) {
        if !self.teardown().await {
            debug!(connection_id = %self.connection_id, "Microphone already off");
            return;
        }
        self.send(ChatOutgoingMessage::MicStatus { enabled: false })
            .await;
        info!(connection_id = %self.connection_id, "Microphone off");
    }

    /// Stop the session without notifying the client.
    pub async fn disconnect(&self) {
        self.teardown().await;
    }

    /// Returns `true` if a session was removed.
    async fn teardown(&self) -> bool {
        let Some(stopped) = self.state.sessions.stop(&self.identity) else {
            return false;
        };
        let Some(mut handle) = stopped.task else {
            return true;
        };
        let timeout = self.state.config.session.teardown_timeout();
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(outcome)) => {
                debug!(connection_id = %self.connection_id, ?outcome, "Session task finished")
            }
            Ok(Err(e)) => warn!(connection_id = %self.connection_id, "Session task failed: {}", e),
            Err(_) => {
                warn!(
                    connection_id = %self.connection_id,
                    session_id = %stopped.session_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Session teardown timed out, aborting task"
                );
                handle.abort();
            }
        }
        true
    }

    async fn send(&self, message: ChatOutgoingMessage) {
        if self.tx.send(ChatMessageRoute::Outgoing(message)).await.is_err() {
            debug!(connection_id = %self.connection_id, "Client gone, dropping message");
        }
    }
}
