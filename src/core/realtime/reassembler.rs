//! Frame reassembly for the upstream receive path.
//!
//! The transport hands out receive results that may carry only part of a
//! logical message. `FrameReassembler` accumulates them until the
//! end-of-message marker and yields the complete UTF-8 text.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Largest logical message accepted from the upstream (10 MB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Kind of a single transport receive result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    /// The peer is closing the connection
    Close,
}

/// One receive result from the upstream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveResult {
    pub kind: FrameKind,
    pub payload: Bytes,
    /// Set on the last fragment of a logical message
    pub end_of_message: bool,
}

impl ReceiveResult {
    /// A complete text message in a single fragment.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Text,
            payload: payload.into(),
            end_of_message: true,
        }
    }

    /// A fragment of a text message.
    pub fn fragment(payload: impl Into<Bytes>, end_of_message: bool) -> Self {
        Self {
            kind: FrameKind::Text,
            payload: payload.into(),
            end_of_message,
        }
    }

    /// The peer's close notification.
    pub fn close() -> Self {
        Self {
            kind: FrameKind::Close,
            payload: Bytes::new(),
            end_of_message: true,
        }
    }
}

/// Output of feeding one receive result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembled {
    /// More fragments are needed
    Pending,
    /// A complete logical message
    Message(String),
    /// The connection is closing; the reassembler is finished
    Closed,
}

/// Failure to assemble one message. The reassembler is reset and can accept
/// the next message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("message is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("message exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("reassembler already closed")]
    Closed,
}

/// Accumulates fragments into complete logical messages.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: BytesMut,
    max_message_size: usize,
    /// Set while skipping the rest of an oversized message
    discarding: bool,
    closed: bool,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl FrameReassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_message_size,
            discarding: false,
            closed: false,
        }
    }

    /// Whether a close notification has been seen.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Feed one receive result.
    pub fn push(&mut self, result: ReceiveResult) -> Result<Reassembled, ReassemblyError> {
        if self.closed {
            return Err(ReassemblyError::Closed);
        }

        if result.kind == FrameKind::Close {
            self.closed = true;
            self.buffer.clear();
            return Ok(Reassembled::Closed);
        }

        if !self.discarding {
            if self.buffer.len() + result.payload.len() > self.max_message_size {
                self.buffer.clear();
                self.discarding = true;
            } else {
                self.buffer.extend_from_slice(&result.payload);
            }
        }

        if !result.end_of_message {
            return Ok(Reassembled::Pending);
        }

        if self.discarding {
            self.discarding = false;
            return Err(ReassemblyError::TooLarge {
                max: self.max_message_size,
            });
        }

        let bytes = self.buffer.split().freeze();
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Ok(Reassembled::Message(text)),
            Err(e) => Err(ReassemblyError::InvalidUtf8(e.utf8_error().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &str = r#"{"type":"response.audio_transcript.delta","delta":"Hello"}"#;

    fn split_into(message: &str, parts: usize) -> Vec<ReceiveResult> {
        let bytes = message.as_bytes();
        let chunk = bytes.len().div_ceil(parts);
        let chunks: Vec<&[u8]> = bytes.chunks(chunk).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, c)| ReceiveResult::fragment(Bytes::copy_from_slice(c), i == last))
            .collect()
    }

    #[test]
    fn test_single_fragment() {
        let mut reassembler = FrameReassembler::default();
        let out = reassembler.push(ReceiveResult::text(MESSAGE)).unwrap();
        assert_eq!(out, Reassembled::Message(MESSAGE.to_string()));
    }

    #[test]
    fn test_fragmented_message_yields_once() {
        for parts in [2, 3, 7, MESSAGE.len()] {
            let mut reassembler = FrameReassembler::default();
            let mut outputs = Vec::new();
            for fragment in split_into(MESSAGE, parts) {
                outputs.push(reassembler.push(fragment).unwrap());
            }

            let messages: Vec<_> = outputs
                .iter()
                .filter(|o| matches!(o, Reassembled::Message(_)))
                .collect();
            assert_eq!(messages.len(), 1, "parts = {parts}");
            assert_eq!(outputs.last(), Some(&Reassembled::Message(MESSAGE.to_string())));
        }
    }

    #[test]
    fn test_accumulator_resets_between_messages() {
        let mut reassembler = FrameReassembler::default();
        reassembler.push(ReceiveResult::fragment("{\"a\":", false)).unwrap();
        assert_eq!(
            reassembler.push(ReceiveResult::fragment("1}", true)).unwrap(),
            Reassembled::Message("{\"a\":1}".to_string())
        );
        assert_eq!(
            reassembler.push(ReceiveResult::text("{\"b\":2}")).unwrap(),
            Reassembled::Message("{\"b\":2}".to_string())
        );
    }

    #[test]
    fn test_close_short_circuits_partial_message() {
        let mut reassembler = FrameReassembler::default();
        reassembler.push(ReceiveResult::fragment("{\"partial\"", false)).unwrap();
        assert_eq!(
            reassembler.push(ReceiveResult::close()).unwrap(),
            Reassembled::Closed
        );
        assert!(reassembler.is_closed());
        assert_eq!(
            reassembler.push(ReceiveResult::text("{}")),
            Err(ReassemblyError::Closed)
        );
    }

    #[test]
    fn test_invalid_utf8_only_fails_one_message() {
        let mut reassembler = FrameReassembler::default();
        let result = reassembler.push(ReceiveResult::fragment(
            Bytes::from_static(&[0xff, 0xfe]),
            true,
        ));
        assert!(matches!(result, Err(ReassemblyError::InvalidUtf8(_))));

        assert_eq!(
            reassembler.push(ReceiveResult::text("ok")).unwrap(),
            Reassembled::Message("ok".to_string())
        );
    }

    #[test]
    fn test_utf8_split_across_fragments() {
        let text = "héllo";
        let bytes = text.as_bytes();
        // split inside the two-byte 'é'
        let mut reassembler = FrameReassembler::default();
        reassembler
            .push(ReceiveResult::fragment(Bytes::copy_from_slice(&bytes[..2]), false))
            .unwrap();
        assert_eq!(
            reassembler
                .push(ReceiveResult::fragment(Bytes::copy_from_slice(&bytes[2..]), true))
                .unwrap(),
            Reassembled::Message(text.to_string())
        );
    }

    #[test]
    fn test_oversized_message_is_dropped() {
        let mut reassembler = FrameReassembler::new(8);
        assert_eq!(
            reassembler.push(ReceiveResult::fragment("12345", false)).unwrap(),
            Reassembled::Pending
        );
        assert_eq!(
            reassembler.push(ReceiveResult::fragment("67890", false)).unwrap(),
            Reassembled::Pending
        );
        assert_eq!(
            reassembler.push(ReceiveResult::fragment("x", true)),
            Err(ReassemblyError::TooLarge { max: 8 })
        );
        assert_eq!(
            reassembler.push(ReceiveResult::text("small")).unwrap(),
            Reassembled::Message("small".to_string())
        );
    }
}
