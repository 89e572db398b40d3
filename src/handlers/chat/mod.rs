//! `/chatstream` WebSocket: chat broadcast and per-connection voice sessions.

mod handler;
pub mod hub;
pub mod messages;
mod router;

pub use handler::chat_handler;
pub use hub::ClientHub;
pub use messages::{ChatIncomingMessage, ChatMessageRoute, ChatOutgoingMessage, MessageType};
pub use router::{ClientEventRouter, ConnectionEventSink};
