//! Chat WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::chat_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the chat WebSocket router
///
/// # Endpoint
///
/// `GET /chatstream` - WebSocket upgrade for chat and realtime voice
///
/// # Protocol
///
/// Clients send JSON frames tagged by `type`:
/// - `send_message` broadcasts `{user, message}` to every client
/// - `start_mic` / `stop_mic` open and close this client's voice session
/// - `send_audio_chunk` carries one base64 PCM16 fragment
///
/// The server answers with `receive_message`, `mic_status` and `error` frames.
///
/// # Example
///
/// ```json
/// {"type": "start_mic"}
/// {"type": "mic_status", "enabled": true}
/// {"type": "send_audio_chunk", "audio": "AAAA..."}
/// {"type": "receive_message", "user": "System", "message": "Hello", "message_type": "system-text-delta"}
/// ```
pub fn create_chat_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chatstream", get(chat_handler))
        .layer(TraceLayer::new_for_http())
}
