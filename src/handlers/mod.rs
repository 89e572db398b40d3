//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `avatar` - Avatar stream credentials and look
//! - `chat` - `/chatstream` chat and realtime voice WebSocket

pub mod api;
pub mod avatar;
pub mod chat;

pub use chat::chat_handler;
