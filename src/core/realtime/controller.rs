//! Upstream session controller.
//!
//! Owns one upstream connection for the lifetime of a session:
//!
//! 1. `Connecting`: open the connection
//! 2. `HandshakeWait`: the first inbound message must carry `session.created`
//! 3. `Active`: send `session.update` and `response.create`, then run the audio
//!    pump and the receive loop side by side
//! 4. `Closing`: stop the pump, close the connection best-effort
//! 5. `Closed`
//!
//! Every failure is contained here. A failed session delivers exactly one
//! `SystemError` to its sink; a cancelled one delivers nothing further.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{EventSink, RealtimeError, RealtimeResult, SessionEvent, SessionState};
use super::classifier::{classify, is_handshake_marker};
use super::config::UpstreamConfig;
use super::messages::{ClientEvent, ResponseConfig, SessionConfig};
use super::pump::{AudioPump, DEFAULT_PUMP_IDLE_INTERVAL, PumpExit};
use super::queue::AudioQueue;
use super::reassembler::{FrameReassembler, Reassembled};
use super::transport::{UpstreamConnector, UpstreamSink, UpstreamStream};

/// Default bound on connecting and on waiting for `session.created`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the best-effort close of the upstream connection.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Timing knobs of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    /// Pump pause when the audio queue is empty
    pub idle_interval: Duration,
    pub handshake_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            idle_interval: DEFAULT_PUMP_IDLE_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The cancellation token fired
    Cancelled,
    /// The upstream closed the connection
    UpstreamClosed,
    /// A fatal error; already reported to the sink as `SystemError`
    Failed(RealtimeError),
}

impl SessionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionOutcome::Failed(_))
    }
}

/// Runs one upstream session.
pub struct SessionController {
    session_id: String,
    config: UpstreamConfig,
    connector: Arc<dyn UpstreamConnector>,
    queue: Arc<AudioQueue>,
    events: Arc<dyn EventSink>,
    token: CancellationToken,
    state: Arc<RwLock<SessionState>>,
    timing: SessionTiming,
}

/// Why the active phase stopped, plus the sink if the pump already returned it.
struct ActiveExit {
    outcome: SessionOutcome,
    sink: Option<Box<dyn UpstreamSink>>,
}

impl SessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        config: UpstreamConfig,
        connector: Arc<dyn UpstreamConnector>,
        queue: Arc<AudioQueue>,
        events: Arc<dyn EventSink>,
        token: CancellationToken,
        state: Arc<RwLock<SessionState>>,
        timing: SessionTiming,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            connector,
            queue,
            events,
            token,
            state,
            timing,
        }
    }

    /// Shared view of the lifecycle state.
    pub fn state(&self) -> Arc<RwLock<SessionState>> {
        self.state.clone()
    }

    /// Spawn `run` as a supervised task.
    pub fn spawn(self) -> JoinHandle<SessionOutcome> {
        tokio::spawn(self.run())
    }

    /// Drive the session to `Closed`. Never panics or returns an error; the
    /// outcome says how it ended.
    pub async fn run(self) -> SessionOutcome {
        info!(session_id = %self.session_id, "Starting realtime session");

        if let Err(e) = self.config.validate() {
            return self.fail(e).await;
        }

        self.set_state(SessionState::Connecting);
        let connect = tokio::time::timeout(
            self.timing.handshake_timeout,
            self.connector.connect(&self.config),
        );
        let connection = tokio::select! {
            biased;
            _ = self.token.cancelled() => return self.finish(SessionOutcome::Cancelled),
            result = connect => match result {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => return self.fail(e).await,
                Err(_) => {
                    return self
                        .fail(RealtimeError::Timeout("connecting to realtime upstream".into()))
                        .await;
                }
            },
        };

        let mut sink = connection.sink;
        let mut stream = connection.stream;
        let mut reassembler = FrameReassembler::default();

        self.set_state(SessionState::HandshakeWait);
        let handshake = tokio::time::timeout(
            self.timing.handshake_timeout,
            Self::handshake(sink.as_mut(), stream.as_mut(), &mut reassembler, &self.config),
        );
        let handshake_result = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            result = handshake => Some(match result {
                Ok(inner) => inner,
                Err(_) => Err(RealtimeError::HandshakeFailed(
                    "timed out waiting for session.created".into(),
                )),
            }),
        };

        let exit = match handshake_result {
            None => ActiveExit {
                outcome: SessionOutcome::Cancelled,
                sink: Some(sink),
            },
            Some(Err(e)) => {
                // report before the close so the client sees the cause first
                let outcome = self.report(e).await;
                ActiveExit {
                    outcome,
                    sink: Some(sink),
                }
            }
            Some(Ok(())) => {
                self.set_state(SessionState::Active);
                info!(session_id = %self.session_id, "Realtime session active");
                self.run_active(sink, stream, reassembler).await
            }
        };

        self.teardown(exit).await
    }

    /// Wait for the session-created marker, then configure the session and
    /// request the first response.
    async fn handshake(
        sink: &mut dyn UpstreamSink,
        stream: &mut dyn UpstreamStream,
        reassembler: &mut FrameReassembler,
        config: &UpstreamConfig,
    ) -> RealtimeResult<()> {
        let first = loop {
            match stream.receive().await {
                None => {
                    return Err(RealtimeError::HandshakeFailed(
                        "upstream ended before session.created".into(),
                    ));
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(result)) => match reassembler.push(result) {
                    Ok(Reassembled::Pending) => continue,
                    Ok(Reassembled::Message(text)) => break text,
                    Ok(Reassembled::Closed) => {
                        return Err(RealtimeError::HandshakeFailed(
                            "upstream closed before session.created".into(),
                        ));
                    }
                    Err(e) => {
                        return Err(RealtimeError::HandshakeFailed(format!(
                            "unreadable first message: {e}"
                        )));
                    }
                },
            }
        };

        if !is_handshake_marker(&first) {
            return Err(RealtimeError::HandshakeFailed(
                "first upstream message was not session.created".into(),
            ));
        }

        let session_update = ClientEvent::SessionUpdate {
            session: SessionConfig::from(config),
        };
        let response_create = ClientEvent::ResponseCreate {
            response: ResponseConfig::from(config),
        };
        for event in [session_update, response_create] {
            let json = event
                .to_json()
                .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
            sink.send_text(json).await?;
        }

        Ok(())
    }

    /// Run the pump and the receive loop until one of them stops.
    async fn run_active(
        &self,
        sink: Box<dyn UpstreamSink>,
        mut stream: Box<dyn UpstreamStream>,
        mut reassembler: FrameReassembler,
    ) -> ActiveExit {
        let pump_token = self.token.child_token();
        let pump = AudioPump::new(
            self.queue.clone(),
            self.timing.idle_interval,
            pump_token.clone(),
        );
        let mut pump_handle = tokio::spawn(pump.run(sink));
        let mut returned_sink: Option<Box<dyn UpstreamSink>> = None;
        let mut pump_joined = false;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => break SessionOutcome::Cancelled,

                joined = &mut pump_handle => {
                    pump_joined = true;
                    match joined {
                        Ok(PumpExit { sink, result, .. }) => {
                            returned_sink = Some(sink);
                            break match result {
                                Err(e) => self.report(e).await,
                                // the pump only stops cleanly once cancelled
                                Ok(()) => SessionOutcome::Cancelled,
                            };
                        }
                        Err(e) => {
                            break self
                                .report(RealtimeError::InternalError(format!("audio pump failed: {e}")))
                                .await;
                        }
                    }
                }

                received = stream.receive() => {
                    let result = match received {
                        None => {
                            info!(session_id = %self.session_id, "Upstream stream ended");
                            self.deliver(SessionEvent::ConnectionClosed).await;
                            break SessionOutcome::UpstreamClosed;
                        }
                        Some(Err(e)) if e.is_fatal() => break self.report(e).await,
                        Some(Err(e)) => {
                            warn!(session_id = %self.session_id, error = %e, "Skipping failed upstream receive");
                            continue;
                        }
                        Some(Ok(result)) => result,
                    };

                    match reassembler.push(result) {
                        Ok(Reassembled::Pending) => {}
                        Ok(Reassembled::Message(text)) => {
                            if let Some(event) = classify(&text) {
                                debug!(session_id = %self.session_id, kind = event.kind(), "Delivering session event");
                                if !self.deliver(event).await {
                                    break SessionOutcome::Cancelled;
                                }
                            }
                        }
                        Ok(Reassembled::Closed) => {
                            info!(session_id = %self.session_id, "Upstream closed the connection");
                            self.deliver(SessionEvent::ConnectionClosed).await;
                            break SessionOutcome::UpstreamClosed;
                        }
                        Err(e) => {
                            warn!(session_id = %self.session_id, error = %e, "Dropping unreadable upstream message");
                        }
                    }
                }
            }
        };

        if !pump_joined {
            pump_token.cancel();
            match pump_handle.await {
                Ok(exit) => {
                    debug!(session_id = %self.session_id, sent = exit.sent, "Audio pump stopped");
                    returned_sink = Some(exit.sink);
                }
                Err(e) => error!(session_id = %self.session_id, "Audio pump task failed: {}", e),
            }
        }

        ActiveExit {
            outcome,
            sink: returned_sink,
        }
    }

    /// Close the upstream and move to `Closed`.
    async fn teardown(&self, exit: ActiveExit) -> SessionOutcome {
        self.set_state(SessionState::Closing);

        if let Some(mut sink) = exit.sink {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => debug!(session_id = %self.session_id, "Upstream connection closed"),
                Ok(Err(e)) => {
                    warn!(session_id = %self.session_id, error = %e, "Failed to close upstream connection")
                }
                Err(_) => warn!(session_id = %self.session_id, "Timed out closing upstream connection"),
            }
        }

        self.finish(exit.outcome)
    }

    /// Report a fatal error to the client and fold it into an outcome.
    async fn report(&self, e: RealtimeError) -> SessionOutcome {
        error!(session_id = %self.session_id, error = %e, "Realtime session failed");
        self.events
            .deliver(SessionEvent::SystemError(e.to_string()))
            .await;
        SessionOutcome::Failed(e)
    }

    /// Fail before any connection exists.
    async fn fail(&self, e: RealtimeError) -> SessionOutcome {
        let outcome = self.report(e).await;
        self.finish(outcome)
    }

    fn finish(&self, outcome: SessionOutcome) -> SessionOutcome {
        self.set_state(SessionState::Closed);
        info!(session_id = %self.session_id, outcome = ?outcome, "Realtime session closed");
        outcome
    }

    /// Deliver unless cancelled first. Returns `false` if cancellation won.
    async fn deliver(&self, event: SessionEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = self.events.deliver(event) => true,
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        let previous = *state;
        debug!(session_id = %self.session_id, from = %previous, to = %next, "Session state transition");
        *state = next;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Sink that forwards every event into a channel.
    pub struct ChannelSink(pub mpsc::UnboundedSender<SessionEvent>);

    #[async_trait]
    impl EventSink for ChannelSink {
        async fn deliver(&self, event: SessionEvent) {
            let _ = self.0.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ChannelSink;
    use super::*;
    use crate::core::realtime::config::test_upstream_config;
    use crate::core::realtime::reassembler::ReceiveResult;
    use crate::core::realtime::transport::test_support::{FakeConnector, FakeUpstream};
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    const SESSION_CREATED: &str = r#"{"type":"session.created","session":{"id":"sess_1"}}"#;

    struct Harness {
        upstream: FakeUpstream,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        queue: Arc<AudioQueue>,
        token: CancellationToken,
        state: Arc<RwLock<SessionState>>,
        handle: JoinHandle<SessionOutcome>,
    }

    fn start_session() -> Harness {
        start_with(test_upstream_config("https://example.openai.azure.com"))
    }

    fn start_with(config: UpstreamConfig) -> Harness {
        let (connector, upstream) = FakeConnector::new();
        let (tx, events) = mpsc::unbounded_channel();
        let queue = Arc::new(AudioQueue::default());
        let token = CancellationToken::new();
        let state = Arc::new(RwLock::new(SessionState::Idle));
        let controller = SessionController::new(
            "test-session",
            config,
            Arc::new(connector),
            queue.clone(),
            Arc::new(ChannelSink(tx)),
            token.clone(),
            state.clone(),
            SessionTiming {
                idle_interval: Duration::from_millis(20),
                handshake_timeout: Duration::from_millis(500),
            },
        );
        Harness {
            upstream,
            events,
            queue,
            token,
            state,
            handle: controller.spawn(),
        }
    }

    async fn wait_for_state(state: &Arc<RwLock<SessionState>>, wanted: SessionState) {
        for _ in 0..100 {
            if *state.read() == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("state never became {wanted}, is {}", *state.read());
    }

    #[tokio::test]
    async fn test_handshake_sends_configuration() {
        let mut h = start_session();
        h.upstream.push_text(SESSION_CREATED);
        wait_for_state(&h.state, SessionState::Active).await;

        assert_eq!(h.upstream.sent_types(), vec!["session.update", "response.create"]);

        h.token.cancel();
        let outcome = h.handle.await.unwrap();
        assert!(matches!(outcome, SessionOutcome::Cancelled));
        assert!(h.upstream.closed.load(Ordering::SeqCst));
        assert_eq!(*h.state.read(), SessionState::Closed);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_text_delta_then_done() {
        let mut h = start_session();
        h.upstream.push_text(SESSION_CREATED);
        h.upstream
            .push_text(r#"{"type":"response.audio_transcript.delta","delta":"Hello"}"#);
        h.upstream.push_text(r#"{"type":"response.done"}"#);

        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::TextDelta("Hello".to_string()))
        );
        assert_eq!(h.events.recv().await, Some(SessionEvent::TextComplete));

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_events_keep_upstream_order() {
        let mut h = start_session();
        h.upstream.push_text(SESSION_CREATED);
        for i in 0..50 {
            h.upstream.push_text(&format!(
                r#"{{"type":"response.audio_transcript.delta","delta":"{i}"}}"#
            ));
        }

        for i in 0..50 {
            assert_eq!(h.events.recv().await, Some(SessionEvent::TextDelta(i.to_string())));
        }

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_fragmented_and_malformed_messages() {
        let mut h = start_session();
        h.upstream.push_text(SESSION_CREATED);
        h.upstream.push_text("{not json");
        let _ = h.upstream.to_session.send(Ok(ReceiveResult::fragment(
            r#"{"type":"response.audio_transcript"#,
            false,
        )));
        let _ = h
            .upstream
            .to_session
            .send(Ok(ReceiveResult::fragment(r#".delta","delta":"Hi"}"#, true)));

        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::TextDelta("Hi".to_string()))
        );

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_audio_is_pumped_upstream() {
        let h = start_session();
        h.upstream.push_text(SESSION_CREATED);
        wait_for_state(&h.state, SessionState::Active).await;

        h.queue.push("AAAA".into());
        h.queue.push("BBBB".into());
        for _ in 0..50 {
            if h.upstream.sent.lock().len() >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let sent = h.upstream.sent.lock().clone();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[2], r#"{"type":"input_audio_buffer.append","audio":"AAAA"}"#);
        assert_eq!(sent[3], r#"{"type":"input_audio_buffer.append","audio":"BBBB"}"#);

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_marker_fails_session() {
        let mut h = start_session();
        h.upstream.push_text(r#"{"type":"error","error":{"message":"bad deployment"}}"#);

        let outcome = h.handle.await.unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Failed(RealtimeError::HandshakeFailed(_))
        ));
        match h.events.recv().await {
            Some(SessionEvent::SystemError(message)) => {
                assert!(message.contains("session.created"))
            }
            other => panic!("expected SystemError, got {other:?}"),
        }
        assert!(h.events.try_recv().is_err());
        assert!(h.upstream.sent.lock().is_empty());
        assert!(h.upstream.closed.load(Ordering::SeqCst));
        assert_eq!(*h.state.read(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let mut h = start_session();
        let outcome = h.handle.await.unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Failed(RealtimeError::HandshakeFailed(_))
        ));
        assert!(matches!(
            h.events.recv().await,
            Some(SessionEvent::SystemError(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_configuration_never_connects() {
        let mut config = test_upstream_config("https://example.openai.azure.com");
        config.deployment.clear();
        let mut h = start_with(config);

        let outcome = h.handle.await.unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Failed(RealtimeError::InvalidConfiguration(_))
        ));
        assert_eq!(h.upstream.connects.load(Ordering::SeqCst), 0);
        assert!(matches!(
            h.events.recv().await,
            Some(SessionEvent::SystemError(_))
        ));
    }

    #[tokio::test]
    async fn test_upstream_close_is_not_an_error() {
        let mut h = start_session();
        h.upstream.push_text(SESSION_CREATED);
        let _ = h.upstream.to_session.send(Ok(ReceiveResult::close()));

        let outcome = h.handle.await.unwrap();
        assert!(matches!(outcome, SessionOutcome::UpstreamClosed));
        assert_eq!(h.events.recv().await, Some(SessionEvent::ConnectionClosed));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fatal_receive_error_reports_once() {
        let mut h = start_session();
        h.upstream.push_text(SESSION_CREATED);
        let _ = h
            .upstream
            .to_session
            .send(Err(RealtimeError::ConnectionLost("reset by peer".into())));

        let outcome = h.handle.await.unwrap();
        assert!(outcome.is_failure());
        match h.events.recv().await {
            Some(SessionEvent::SystemError(message)) => assert!(message.contains("reset by peer")),
            other => panic!("expected SystemError, got {other:?}"),
        }
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transient_receive_error_is_skipped() {
        let mut h = start_session();
        h.upstream.push_text(SESSION_CREATED);
        let _ = h
            .upstream
            .to_session
            .send(Err(RealtimeError::WebSocketError("message too long".into())));
        h.upstream.push_text(r#"{"type":"response.done"}"#);

        assert_eq!(h.events.recv().await, Some(SessionEvent::TextComplete));
        h.token.cancel();
        assert!(matches!(h.handle.await.unwrap(), SessionOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_before_connect_completes() {
        let h = start_session();
        h.token.cancel();
        let outcome = tokio::time::timeout(Duration::from_millis(200), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, SessionOutcome::Cancelled));
    }
}
