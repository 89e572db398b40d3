//! Chat WebSocket message types
//!
//! Client and server frames of the `/chatstream` endpoint. Every frame is a
//! JSON object tagged by `type`.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::realtime::SessionEvent;

/// Maximum allowed size for a chat message (50 KB)
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024;

/// Maximum allowed size for a user name (256 bytes)
pub const MAX_USER_SIZE: usize = 256;

/// Maximum allowed size for one base64 audio chunk (1 MB)
pub const MAX_AUDIO_CHUNK_SIZE: usize = 1024 * 1024;

/// Sender name used for everything produced by a realtime session.
pub const SYSTEM_USER: &str = "System";

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming WebSocket messages from client
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatIncomingMessage {
    /// Broadcast a typed chat message to every connected client
    SendMessage { user: String, message: String },

    /// Open a realtime voice session for this connection
    StartMic,

    /// Close this connection's realtime voice session
    StopMic,

    /// One base64 PCM16 audio fragment for the active session
    SendAudioChunk { audio: String },
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Kind of a `receive_message` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// Typed chat from a user
    User,
    /// Base64 assistant audio
    SystemAudio,
    SystemTextDelta,
    /// The assistant turn is complete
    SystemTextComplete,
    /// Transcript of the user's speech
    UserTextDelta,
    SystemError,
    SystemInfo,
}

/// Outgoing WebSocket messages to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatOutgoingMessage {
    ReceiveMessage {
        user: String,
        message: String,
        message_type: MessageType,
    },

    /// Whether the microphone (realtime session) is on
    MicStatus { enabled: bool },

    /// Rejected client frame; the connection stays open
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
}

impl ChatOutgoingMessage {
    pub fn system(message: impl Into<String>, message_type: MessageType) -> Self {
        Self::ReceiveMessage {
            user: SYSTEM_USER.to_string(),
            message: message.into(),
            message_type,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

impl From<SessionEvent> for ChatOutgoingMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::AudioDelta(audio) => {
                Self::system(BASE64_STANDARD.encode(&audio), MessageType::SystemAudio)
            }
            SessionEvent::TextDelta(text) => Self::system(text, MessageType::SystemTextDelta),
            SessionEvent::TextComplete => Self::system("", MessageType::SystemTextComplete),
            SessionEvent::UserTranscriptDelta(text) => {
                Self::system(text, MessageType::UserTextDelta)
            }
            SessionEvent::SystemError(message) => {
                Self::system(format!("[Error: {message}]"), MessageType::SystemError)
            }
            SessionEvent::ConnectionClosed => {
                Self::system("Connection closed", MessageType::SystemInfo)
            }
        }
    }
}

// =============================================================================
// Message Routing
// =============================================================================

/// Work item for a connection's sender task
#[derive(Debug)]
pub enum ChatMessageRoute {
    /// JSON text message
    Outgoing(ChatOutgoingMessage),
    /// Close connection
    Close,
}

// =============================================================================
// Validation
// =============================================================================

/// Error type for message validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatValidationError {
    #[error("Message too large: {size} bytes (max: {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },

    #[error("User name too large: {size} bytes (max: {max} bytes)")]
    UserTooLarge { size: usize, max: usize },

    #[error("Audio chunk too large: {size} bytes (max: {max} bytes)")]
    AudioTooLarge { size: usize, max: usize },
}

impl ChatIncomingMessage {
    /// Validates message field sizes to prevent resource exhaustion.
    pub fn validate_size(&self) -> Result<(), ChatValidationError> {
        match self {
            ChatIncomingMessage::SendMessage { user, message } => {
                if user.len() > MAX_USER_SIZE {
                    return Err(ChatValidationError::UserTooLarge {
                        size: user.len(),
                        max: MAX_USER_SIZE,
                    });
                }
                if message.len() > MAX_MESSAGE_SIZE {
                    return Err(ChatValidationError::MessageTooLarge {
                        size: message.len(),
                        max: MAX_MESSAGE_SIZE,
                    });
                }
            }
            ChatIncomingMessage::SendAudioChunk { audio } => {
                if audio.len() > MAX_AUDIO_CHUNK_SIZE {
                    return Err(ChatValidationError::AudioTooLarge {
                        size: audio.len(),
                        max: MAX_AUDIO_CHUNK_SIZE,
                    });
                }
            }
            ChatIncomingMessage::StartMic | ChatIncomingMessage::StopMic => {}
        }
        Ok(())
    }
}
