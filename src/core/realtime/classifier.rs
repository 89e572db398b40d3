//! Classification of reassembled upstream messages into session events.

use base64::prelude::*;
use bytes::Bytes;
use tracing::{debug, warn};

use super::base::SessionEvent;
use super::messages::{SESSION_CREATED, ServerEvent};

/// Message used when an upstream `error` event carries no text.
const UNKNOWN_UPSTREAM_ERROR: &str = "Unknown upstream error";

/// Whether a raw upstream message confirms session creation.
///
/// Matches on the raw text rather than the parsed type so that a handshake
/// message with an unexpected shape is still accepted.
#[inline]
pub fn is_handshake_marker(raw: &str) -> bool {
    raw.contains(SESSION_CREATED)
}

/// Classify one complete JSON message into zero or one session event.
///
/// Malformed JSON, a missing `type` and unknown types all yield `None`.
pub fn classify(raw: &str) -> Option<SessionEvent> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, bytes = raw.len(), "Skipping malformed upstream message");
            return None;
        }
    };

    let Some(event_type) = value.get("type").and_then(|t| t.as_str()) else {
        debug!("Ignoring upstream message without a type");
        return None;
    };
    let event_type = event_type.to_owned();

    let event: ServerEvent = match serde_json::from_value(value) {
        Ok(event) => event,
        Err(e) => {
            warn!(event_type = %event_type, error = %e, "Skipping upstream event with unexpected shape");
            return None;
        }
    };

    match event {
        ServerEvent::AudioDelta { delta } => {
            if delta.is_empty() {
                return None;
            }
            match BASE64_STANDARD.decode(delta.as_bytes()) {
                Ok(audio) if !audio.is_empty() => Some(SessionEvent::AudioDelta(Bytes::from(audio))),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "Skipping audio delta with invalid base64");
                    None
                }
            }
        }
        ServerEvent::AudioTranscriptDelta { delta } => {
            (!delta.is_empty()).then_some(SessionEvent::TextDelta(delta))
        }
        ServerEvent::InputAudioTranscriptionCompleted { transcript } => {
            (!transcript.is_empty()).then_some(SessionEvent::UserTranscriptDelta(transcript))
        }
        ServerEvent::ResponseDone => Some(SessionEvent::TextComplete),
        ref error @ ServerEvent::Error { .. } => Some(SessionEvent::SystemError(
            error
                .error_message()
                .unwrap_or_else(|| UNKNOWN_UPSTREAM_ERROR.to_string()),
        )),
        ServerEvent::SessionCreated | ServerEvent::Unknown => {
            debug!(event_type = %event_type, "Ignoring upstream event");
            None
        }
    }
}
