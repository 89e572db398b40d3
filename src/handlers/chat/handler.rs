//! Chat WebSocket handler
//!
//! Serves `/chatstream`: typed chat broadcast between connected clients plus
//! one realtime voice session per connection, started and stopped by the
//! client's microphone toggle.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::middleware::ClientIp;
use crate::state::AppState;

use super::messages::{ChatIncomingMessage, ChatMessageRoute, ChatOutgoingMessage};
use super::router::ClientEventRouter;

/// Channel buffer between session tasks and the socket writer
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Chat WebSocket handler
///
/// Upgrades the HTTP connection to a WebSocket. `ClientIp` is present when the
/// connection limit middleware reserved a slot for this connection; the slot
/// is returned when the socket closes.
pub async fn chat_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ip)| ip);
    info!(ip = ?client_ip.as_ref().map(|ip| ip.0), "Chat WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_chat_socket(socket, state, client_ip))
}

async fn handle_chat_socket(socket: WebSocket, app_state: Arc<AppState>, client_ip: Option<ClientIp>) {
    let connection_id = Uuid::new_v4();
    info!(%connection_id, "Chat WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<ChatMessageRoute>(CHANNEL_BUFFER_SIZE);

    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                ChatMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                ChatMessageRoute::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    app_state.hub.register(connection_id, message_tx.clone());
    let router = ClientEventRouter::new(connection_id, app_state.clone(), message_tx.clone());

    // How often the idle check runs
    let processing_timeout = Duration::from_secs(30);

    // 5 minutes, spread by up to ±30s so idle clients do not all drop together
    let base_idle_secs: u64 = 300;
    let jitter_range: u64 = 30;
    let jitter_offset = (connection_id.as_u128() % (jitter_range as u128 * 2)) as i64 - jitter_range as i64;
    let idle_timeout = Duration::from_secs((base_idle_secs as i64 + jitter_offset).max(1) as u64);

    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_chat_message(msg, &router, &message_tx).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%connection_id, "Chat WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(%connection_id, "Chat WebSocket connection closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(processing_timeout) => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        %connection_id,
                        "Chat WebSocket connection idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    let _ = message_tx
                        .send(ChatMessageRoute::Outgoing(ChatOutgoingMessage::error(
                            "idle_timeout",
                            "Connection closed due to inactivity",
                        )))
                        .await;
                    let _ = message_tx.send(ChatMessageRoute::Close).await;
                    break;
                }
                debug!(%connection_id, "Chat WebSocket connection idle check - still active");
            }
        }
    }

    // Cleanup
    app_state.hub.unregister(&connection_id);
    router.disconnect().await;
    drop(message_tx);
    drop(router);
    // let queued frames (idle notice, close) flush before giving up on the writer
    if tokio::time::timeout(Duration::from_secs(1), &mut sender_task)
        .await
        .is_err()
    {
        debug!(%connection_id, "Sender task did not finish, aborting it");
        sender_task.abort();
    }

    if let Some(ClientIp(ip)) = client_ip {
        app_state.release_connection(ip);
    }

    info!(%connection_id, "Chat WebSocket connection terminated");
}

/// Handle one client frame. Returns `false` when the connection should close.
async fn process_chat_message(
    msg: Message,
    router: &ClientEventRouter,
    message_tx: &mpsc::Sender<ChatMessageRoute>,
) -> bool {
    match msg {
        Message::Text(text) => {
            debug!("Received text message: {} bytes", text.len());

            let incoming: ChatIncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse chat message: {}", e);
                    let _ = message_tx
                        .send(ChatMessageRoute::Outgoing(ChatOutgoingMessage::error(
                            "parse_error",
                            format!("Invalid message format: {e}"),
                        )))
                        .await;
                    return true;
                }
            };

            if let Err(e) = incoming.validate_size() {
                warn!("Message validation failed: {}", e);
                let _ = message_tx
                    .send(ChatMessageRoute::Outgoing(ChatOutgoingMessage::error(
                        "validation_error",
                        e.to_string(),
                    )))
                    .await;
                return true;
            }

            match incoming {
                ChatIncomingMessage::SendMessage { user, message } => {
                    router.send_message(user, message).await
                }
                ChatIncomingMessage::StartMic => router.start_mic().await,
                ChatIncomingMessage::StopMic => router.stop_mic().await,
                ChatIncomingMessage::SendAudioChunk { audio } => router.send_audio_chunk(audio),
            }
            true
        }
        Message::Binary(data) => {
            debug!("Ignoring binary frame: {} bytes", data.len());
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("Chat WebSocket close received");
            false
        }
    }
}
