//! Outbound audio pump.
//!
//! Drains a session's audio queue into `input_audio_buffer.append` events.
//! Runs as its own task next to the receive loop and owns the send half of
//! the upstream connection while it runs.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::base::RealtimeResult;
use super::messages::ClientEvent;
use super::queue::AudioQueue;
use super::transport::UpstreamSink;

/// Default pause when the queue is empty.
pub const DEFAULT_PUMP_IDLE_INTERVAL: Duration = Duration::from_millis(100);

/// Result of one pump run. The sink is handed back so the owner can close it.
pub struct PumpExit {
    pub sink: Box<dyn UpstreamSink>,
    /// Fragments sent upstream
    pub sent: u64,
    /// `Err` only when the connection became unusable
    pub result: RealtimeResult<()>,
}

pub struct AudioPump {
    queue: Arc<AudioQueue>,
    idle_interval: Duration,
    token: CancellationToken,
}

impl AudioPump {
    pub fn new(queue: Arc<AudioQueue>, idle_interval: Duration, token: CancellationToken) -> Self {
        Self {
            queue,
            idle_interval,
            token,
        }
    }

    /// Run until cancelled or until a send fails fatally.
    pub async fn run(self, mut sink: Box<dyn UpstreamSink>) -> PumpExit {
        let mut sent: u64 = 0;

        let result = loop {
            if self.token.is_cancelled() {
                break Ok(());
            }

            let fragment = match self.queue.pop() {
                Some(fragment) => fragment,
                None => {
                    tokio::select! {
                        _ = self.token.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(self.idle_interval) => {}
                    }
                    continue;
                }
            };

            let json = match (ClientEvent::InputAudioBufferAppend { audio: fragment }).to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize audio append event: {}", e);
                    continue;
                }
            };

            let send_result = tokio::select! {
                _ = self.token.cancelled() => break Ok(()),
                res = sink.send_text(json) => res,
            };

            match send_result {
                Ok(()) => sent += 1,
                Err(e) if e.is_fatal() => {
                    error!(error = %e, sent, "Audio pump stopping, upstream unusable");
                    break Err(e);
                }
                Err(e) => warn!(error = %e, "Failed to send audio fragment, continuing"),
            }
        };

        debug!(sent, remaining = self.queue.len(), "Audio pump exited");
        PumpExit { sink, sent, result }
    }
}
