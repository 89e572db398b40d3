//! Realtime speech-to-speech upstream sessions.
//!
//! One session is one WebSocket connection to an Azure OpenAI realtime
//! deployment, owned by a [`SessionController`]:
//!
//! - [`FrameReassembler`] turns transport fragments into complete messages
//! - [`classify`] maps upstream JSON into [`SessionEvent`]s
//! - [`AudioQueue`] and [`AudioPump`] carry client audio upstream in order
//! - an [`EventSink`] receives the events for exactly one client
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, base64-encoded on the wire.
//!
//! # Example
//!
//! ```rust,ignore
//! use realtime_chat_gateway::core::realtime::{
//!     AudioQueue, SessionController, SessionTiming, WsConnector,
//! };
//!
//! let controller = SessionController::new(
//!     "session-1",
//!     upstream_config,
//!     Arc::new(WsConnector::new()),
//!     Arc::new(AudioQueue::default()),
//!     sink,
//!     CancellationToken::new(),
//!     Arc::new(RwLock::new(SessionState::Idle)),
//!     SessionTiming::default(),
//! );
//! let outcome = controller.spawn().await?;
//! ```

mod base;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod messages;
pub mod pump;
pub mod queue;
pub mod reassembler;
pub mod transport;

pub use base::{EventSink, RealtimeError, RealtimeResult, SessionEvent, SessionState};
pub use classifier::{classify, is_handshake_marker};
pub use config::{TurnDetectionConfig, UpstreamConfig};
pub use controller::{DEFAULT_HANDSHAKE_TIMEOUT, SessionController, SessionOutcome, SessionTiming};
pub use pump::{AudioPump, DEFAULT_PUMP_IDLE_INTERVAL, PumpExit};
pub use queue::{AudioQueue, DEFAULT_AUDIO_QUEUE_CAPACITY, OverflowPolicy};
pub use reassembler::{
    FrameKind, FrameReassembler, MAX_MESSAGE_SIZE, ReassemblyError, Reassembled, ReceiveResult,
};
pub use transport::{UpstreamConnection, UpstreamConnector, UpstreamSink, UpstreamStream, WsConnector};
