//! Upstream transport.
//!
//! The session controller talks to the upstream through three small traits so
//! that the send and receive directions can be driven by different tasks and
//! so tests can substitute an in-memory transport. `WsConnector` is the
//! production implementation over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::base::{RealtimeError, RealtimeResult};
use super::config::{API_KEY_HEADER, UpstreamConfig};
use super::reassembler::{FrameKind, ReceiveResult};

/// Send half of an upstream connection.
#[async_trait]
pub trait UpstreamSink: Send {
    /// Send one JSON text frame.
    async fn send_text(&mut self, text: String) -> RealtimeResult<()>;

    /// Close the connection.
    async fn close(&mut self) -> RealtimeResult<()>;
}

/// Receive half of an upstream connection.
#[async_trait]
pub trait UpstreamStream: Send {
    /// Next receive result, or `None` once the transport has ended.
    async fn receive(&mut self) -> Option<RealtimeResult<ReceiveResult>>;
}

/// An open upstream connection split into its two directions.
pub struct UpstreamConnection {
    pub sink: Box<dyn UpstreamSink>,
    pub stream: Box<dyn UpstreamStream>,
}

/// Opens upstream connections.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, config: &UpstreamConfig) -> RealtimeResult<UpstreamConnection>;
}

// =============================================================================
// WebSocket Transport
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the realtime endpoint over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamConnector for WsConnector {
    async fn connect(&self, config: &UpstreamConfig) -> RealtimeResult<UpstreamConnection> {
        let url = config.ws_url()?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(format!("invalid request: {e}")))?;
        let api_key = HeaderValue::from_str(&config.api_key).map_err(|_| {
            RealtimeError::InvalidConfiguration("api key is not a valid header value".to_string())
        })?;
        request.headers_mut().insert(API_KEY_HEADER, api_key);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        info!(
            host = url.host_str().unwrap_or_default(),
            deployment = %config.deployment,
            "Connected to realtime upstream"
        );

        let (sink, stream) = ws_stream.split();
        Ok(UpstreamConnection {
            sink: Box::new(WsSink { sink }),
            stream: Box::new(WsReceiver { stream }),
        })
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl UpstreamSink for WsSink {
    async fn send_text(&mut self, text: String) -> RealtimeResult<()> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        match self.sink.close().await {
            Ok(()) => Ok(()),
            // closing an already closed socket is fine
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}

struct WsReceiver {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl UpstreamStream for WsReceiver {
    async fn receive(&mut self) -> Option<RealtimeResult<ReceiveResult>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(map_ws_error(e))),
            };

            let result = match message {
                Message::Text(text) => ReceiveResult::text(bytes::Bytes::from(text)),
                Message::Binary(data) => ReceiveResult {
                    kind: FrameKind::Binary,
                    payload: data,
                    end_of_message: true,
                },
                Message::Close(frame) => {
                    debug!(?frame, "Upstream sent close frame");
                    ReceiveResult::close()
                }
                // pongs are queued by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Some(Ok(result));
        }
    }
}

/// Classify a tungstenite error. Only a capacity violation on a single
/// message leaves the connection usable.
fn map_ws_error(e: tungstenite::Error) -> RealtimeError {
    match e {
        tungstenite::Error::Capacity(_) => RealtimeError::WebSocketError(e.to_string()),
        _ => RealtimeError::ConnectionLost(e.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    type Inbound = mpsc::UnboundedReceiver<RealtimeResult<ReceiveResult>>;

    /// Test side of an in-memory upstream.
    pub struct FakeUpstream {
        pub to_session: mpsc::UnboundedSender<RealtimeResult<ReceiveResult>>,
        pub sent: Arc<Mutex<Vec<String>>>,
        pub closed: Arc<AtomicBool>,
        pub connects: Arc<AtomicUsize>,
        /// Set once the session has dropped its send half
        pub sink_dropped: Arc<AtomicBool>,
    }

    impl FakeUpstream {
        pub fn push_text(&self, text: &str) {
            let _ = self
                .to_session
                .send(Ok(ReceiveResult::text(bytes::Bytes::copy_from_slice(text.as_bytes()))));
        }

        pub fn sent_types(&self) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter_map(|frame| {
                    serde_json::from_str::<serde_json::Value>(frame)
                        .ok()
                        .and_then(|v| v["type"].as_str().map(str::to_string))
                })
                .collect()
        }
    }

    /// Connector that hands out a single in-memory connection.
    pub struct FakeConnector {
        inbound: Mutex<Option<Inbound>>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        connects: Arc<AtomicUsize>,
        sink_dropped: Arc<AtomicBool>,
        stall_close: bool,
    }

    impl FakeConnector {
        pub fn new() -> (Self, FakeUpstream) {
            let (tx, rx) = mpsc::unbounded_channel();
            let sent = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let connects = Arc::new(AtomicUsize::new(0));
            let sink_dropped = Arc::new(AtomicBool::new(false));
            (
                Self {
                    inbound: Mutex::new(Some(rx)),
                    sent: sent.clone(),
                    closed: closed.clone(),
                    connects: connects.clone(),
                    sink_dropped: sink_dropped.clone(),
                    stall_close: false,
                },
                FakeUpstream {
                    to_session: tx,
                    sent,
                    closed,
                    connects,
                    sink_dropped,
                },
            )
        }

        /// A connection whose `close()` never completes.
        pub fn with_stalled_close() -> (Self, FakeUpstream) {
            let (mut connector, upstream) = Self::new();
            connector.stall_close = true;
            (connector, upstream)
        }
    }

    #[async_trait]
    impl UpstreamConnector for FakeConnector {
        async fn connect(&self, _config: &UpstreamConfig) -> RealtimeResult<UpstreamConnection> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let inbound = self
                .inbound
                .lock()
                .take()
                .ok_or_else(|| RealtimeError::ConnectionFailed("already connected".into()))?;
            Ok(UpstreamConnection {
                sink: Box::new(FakeSink {
                    sent: self.sent.clone(),
                    closed: self.closed.clone(),
                    dropped: self.sink_dropped.clone(),
                    stall_close: self.stall_close,
                }),
                stream: Box::new(FakeStream { inbound }),
            })
        }
    }

    struct FakeSink {
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
        stall_close: bool,
    }

    impl Drop for FakeSink {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl UpstreamSink for FakeSink {
        async fn send_text(&mut self, text: String) -> RealtimeResult<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(RealtimeError::ConnectionLost("closed".into()));
            }
            self.sent.lock().push(text);
            Ok(())
        }

        async fn close(&mut self) -> RealtimeResult<()> {
            if self.stall_close {
                std::future::pending::<()>().await;
            }
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeStream {
        inbound: Inbound,
    }

    #[async_trait]
    impl UpstreamStream for FakeStream {
        async fn receive(&mut self) -> Option<RealtimeResult<ReceiveResult>> {
            self.inbound.recv().await
        }
    }
}
