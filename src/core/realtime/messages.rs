//! Upstream realtime wire events.
//!
//! Client events (sent upstream):
//! - session.update - Configure voice, instructions, formats and turn detection
//! - response.create - Start a response
//! - input_audio_buffer.append - Append one base64 PCM16 fragment
//!
//! Server events (received from upstream) are listed in `ServerEvent`. Only the
//! handful the session consumes carry fields; everything else folds into
//! `ServerEvent::Unknown`.

use serde::{Deserialize, Serialize};

use super::config::UpstreamConfig;

/// Type of the upstream message that confirms session creation.
pub const SESSION_CREATED: &str = "session.created";

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent in `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: InputAudioTranscription,
    pub turn_detection: TurnDetection,
    /// Always empty; tools are not offered to the model
    pub tools: Vec<serde_json::Value>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
        create_response: bool,
    },
}

/// Response configuration sent in `response.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
}

impl From<&UpstreamConfig> for SessionConfig {
    fn from(config: &UpstreamConfig) -> Self {
        let td = &config.turn_detection;
        Self {
            voice: config.voice.clone(),
            instructions: config.instructions.clone(),
            input_audio_format: config.input_audio_format.clone(),
            output_audio_format: config.output_audio_format.clone(),
            input_audio_transcription: InputAudioTranscription {
                model: config.transcription_model.clone(),
            },
            turn_detection: TurnDetection::ServerVad {
                threshold: td.threshold,
                prefix_padding_ms: td.prefix_padding_ms,
                silence_duration_ms: td.silence_duration_ms,
                create_response: td.create_response,
            },
            tools: Vec::new(),
        }
    }
}

impl From<&UpstreamConfig> for ResponseConfig {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            modalities: config.modalities.clone(),
            instructions: config.instructions.clone(),
        }
    }
}

// =============================================================================
// Client Events
// =============================================================================

/// Events sent to the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16 audio
        audio: String,
    },
}

impl ClientEvent {
    /// Serialize to the JSON text frame sent upstream.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// Events received from the upstream that the session consumes.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone,

    /// Upstream error; the message is nested under `error` or, from some
    /// deployments, at the top level
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ErrorDetail>,
        #[serde(default)]
        message: Option<String>,
    },

    /// Any other event type
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Best available message of an `error` event.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ServerEvent::Error { error, message } => error
                .as_ref()
                .and_then(|detail| detail.message.clone())
                .or_else(|| message.clone()),
            _ => None,
        }
    }
}

/// Error payload of an upstream `error` event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}
