//! Base types shared by the realtime session components.
//!
//! This module defines the error taxonomy, the session lifecycle states, the
//! typed events that flow from an upstream session to one client, and the
//! `EventSink` capability that decouples the controller from the connection
//! layer.
//!
//! # Audio Format
//!
//! Audio travels as base64-encoded PCM 16-bit little-endian fragments in both
//! directions. Decoded audio deltas are carried as raw bytes.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while running a realtime session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the upstream service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid or incomplete upstream configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The upstream did not confirm session creation
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The transport can no longer be used in at least one direction
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A single send or receive failed but the transport is still usable
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RealtimeError {
    /// Whether this error leaves the upstream transport unusable.
    ///
    /// Non-fatal errors are logged and the session keeps running.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RealtimeError::WebSocketError(_) | RealtimeError::SerializationError(_)
        )
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of one upstream session.
///
/// `Idle → Connecting → HandshakeWait → Active → Closing → Closed`, with a
/// direct transition to `Closed` from any state on cancellation or an
/// unrecoverable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Registered, controller not yet running
    #[default]
    Idle,
    /// Opening the upstream connection
    Connecting,
    /// Waiting for the upstream to confirm its session context
    HandshakeWait,
    /// Audio pump and receive loop are running
    Active,
    /// Tearing down
    Closing,
    /// Terminal state
    Closed,
}

impl SessionState {
    /// Whether the session has reached its terminal state.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::HandshakeWait => write!(f, "handshake_wait"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Session Events
// =============================================================================

/// A classified event flowing downstream to exactly one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Decoded assistant audio (PCM16)
    AudioDelta(Bytes),
    /// Incremental assistant transcript text
    TextDelta(String),
    /// The current assistant turn is complete
    TextComplete,
    /// Transcript of what the user said
    UserTranscriptDelta(String),
    /// A failure that ended the session, or an error reported by the upstream
    SystemError(String),
    /// The upstream closed the connection
    ConnectionClosed,
}

impl SessionEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::AudioDelta(_) => "audio_delta",
            SessionEvent::TextDelta(_) => "text_delta",
            SessionEvent::TextComplete => "text_complete",
            SessionEvent::UserTranscriptDelta(_) => "user_transcript_delta",
            SessionEvent::SystemError(_) => "system_error",
            SessionEvent::ConnectionClosed => "connection_closed",
        }
    }
}

// =============================================================================
// Event Delivery
// =============================================================================

/// Delivery capability for session events.
///
/// One sink is bound to one client connection; the controller never knows
/// which transport sits behind it.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Delivery failures are the sink's concern.
    async fn deliver(&self, event: SessionEvent);
}
