//! Mock realtime upstream
//!
//! A WebSocket server that behaves like the realtime deployment: it greets
//! every connection with `session.created`, records every text frame it
//! receives and lets tests push frames to a specific connection.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Frames recorded from one upstream connection
pub type Received = Arc<Mutex<Vec<Value>>>;

pub struct MockUpstream {
    pub addr: SocketAddr,
    connections: Arc<Mutex<Vec<MockConnection>>>,
    closed: Arc<AtomicUsize>,
}

struct MockConnection {
    outbound: mpsc::UnboundedSender<Message>,
    received: Received,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));

        let accepted = connections.clone();
        let closed_count = closed.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (tx, rx) = mpsc::unbounded_channel();
                let received: Received = Arc::new(Mutex::new(Vec::new()));
                accepted.lock().push(MockConnection {
                    outbound: tx,
                    received: received.clone(),
                });
                let closed_count = closed_count.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, rx, received).await;
                    closed_count.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            connections,
            closed,
        }
    }

    /// Endpoint to put in the realtime settings
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until `count` connections have been accepted.
    pub async fn wait_for_connections(&self, count: usize) {
        wait_until(|| self.connection_count() >= count).await;
    }

    pub async fn wait_for_closed(&self, count: usize) {
        wait_until(|| self.closed_count() >= count).await;
    }

    /// Send a JSON event to connection `index` (in accept order).
    pub fn push(&self, index: usize, event: Value) {
        let connections = self.connections.lock();
        let _ = connections[index]
            .outbound
            .send(Message::Text(event.to_string().into()));
    }

    /// Close connection `index` from the upstream side.
    pub fn close(&self, index: usize) {
        let connections = self.connections.lock();
        let _ = connections[index].outbound.send(Message::Close(None));
    }

    /// Stream an assistant reply as transcript deltas followed by `response.done`.
    pub fn push_reply(&self, index: usize, deltas: &[&str]) {
        for delta in deltas {
            self.push(
                index,
                json!({"type": "response.audio_transcript.delta", "delta": delta}),
            );
        }
        self.push(index, json!({"type": "response.done"}));
    }

    /// Frames received on connection `index`
    pub fn received(&self, index: usize) -> Vec<Value> {
        self.connections.lock()[index].received.lock().clone()
    }

    /// `audio` fields of the `input_audio_buffer.append` frames on connection `index`
    pub fn appended_audio(&self, index: usize) -> Vec<String> {
        self.received(index)
            .iter()
            .filter(|frame| frame["type"] == "input_audio_buffer.append")
            .filter_map(|frame| frame["audio"].as_str().map(str::to_string))
            .collect()
    }
}

async fn handle_connection(
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    received: Received,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let created = json!({"type": "session.created", "session": {"id": "sess_mock"}});
    write.send(Message::Text(created.to_string().into())).await?;

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                        received.lock().push(frame);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            Some(message) = outbound.recv() => {
                write.send(message).await?;
            }
        }
    }
    Ok(())
}

/// Poll `condition` every 10ms for up to 5 seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
