use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ws::liveness::{self, Deadline, LivenessConfig, ReadOutcome};
use crate::ws::ConnectionHandle;

/// Runtime for one accepted socket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames queued on the handle's channel
/// - Ping task: queues a ping every `ping_period`
/// - Reader: driven by the owning session through [`Connection::next_text`]
///
/// The handle can be cloned into the registry so other sessions can push
/// frames to this client without touching the socket.
pub struct Connection {
    user_id: String,
    handle: ConnectionHandle,
    reader: SplitStream<WebSocket>,
    deadline: Deadline,
    writer: JoinHandle<()>,
    pinger: JoinHandle<()>,
    closed: bool,
}

impl Connection {
    pub fn start(socket: WebSocket, user_id: &str, liveness: LivenessConfig) -> Self {
        let (ws_sender, reader) = socket.split();
        let (handle, rx) = ConnectionHandle::channel();

        let writer = tokio::spawn(writer_task(ws_sender, rx));
        let pinger = liveness::spawn_pinger(handle.clone(), liveness.ping_period, user_id.to_string());

        Self {
            user_id: user_id.to_string(),
            handle,
            reader,
            deadline: Deadline::start(liveness.pong_wait),
            writer,
            pinger,
            closed: false,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Queue a frame on this connection's own socket.
    pub fn send(&self, msg: Message) -> bool {
        self.handle.send(msg)
    }

    /// Wait for the next text frame.
    ///
    /// Returns `None` once the connection is finished for any reason: peer
    /// close, read error, missed read deadline or a failed write (including a
    /// ping). Control frames extend the deadline and are otherwise absorbed.
    pub async fn next_text(&mut self) -> Option<String> {
        let user_id = self.user_id.as_str();

        while !self.closed {
            let outcome = tokio::select! {
                outcome = liveness::next_frame(&mut self.reader, &mut self.deadline) => outcome,
                _ = &mut self.writer => {
                    tracing::warn!(user_id = %user_id, "WebSocket write failed, closing");
                    self.closed = true;
                    return None;
                }
            };

            match outcome {
                ReadOutcome::Frame(Message::Text(text)) => return Some(text.as_str().to_owned()),
                ReadOutcome::Frame(Message::Binary(data)) => {
                    tracing::debug!(
                        user_id = %user_id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                ReadOutcome::Frame(Message::Ping(_)) | ReadOutcome::Frame(Message::Pong(_)) => {
                    // Pings are answered by the socket itself; either way the
                    // deadline was already extended.
                }
                ReadOutcome::Frame(Message::Close(frame)) => {
                    tracing::info!(user_id = %user_id, reason = ?frame, "Client initiated close");
                    self.closed = true;
                }
                ReadOutcome::Closed => {
                    tracing::info!(user_id = %user_id, "WebSocket stream ended");
                    self.closed = true;
                }
                ReadOutcome::TimedOut => {
                    tracing::warn!(user_id = %user_id, "Read deadline passed, peer unresponsive");
                    self.closed = true;
                }
                ReadOutcome::Failed(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "WebSocket receive error");
                    self.closed = true;
                }
            }
        }

        None
    }

    /// Stop the writer and ping tasks. Frames still queued are dropped.
    pub fn shutdown(self) {
        self.pinger.abort();
        self.writer.abort();
    }
}

/// Writer task: receives frames from the channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
    }
}

/// Send a single text frame and close. Used for upgrades rejected after the
/// handshake, before any session state exists.
pub async fn reject(mut socket: WebSocket, reason: &str) {
    let _ = socket.send(Message::Text(reason.into())).await;
    let _ = socket.send(Message::Close(None)).await;
}
