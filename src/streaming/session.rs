//! WebSocket transport for one streaming session
//!
//! One `SessionTransport` is one connection instance. The write half stays
//! with the owner for frame transmission; the read half runs in a background
//! task that translates transport callbacks (message/close/error) into
//! `SessionEvent`s on a channel, so all session state mutation happens in
//! the single event loop that consumes them.
//!
//! Every connection instance carries a generation id. Events are stamped
//! with it, letting the consumer discard events from a superseded connection
//! after a reconnect.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::protocol::{classify_message, encode_frame, ServerMessage};
use super::StreamingError;
use crate::config::StreamConfig;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection state of the streaming session, as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
        }
    }
}

/// Events produced by a connection instance, consumed by the event loop.
pub enum SessionEvent {
    /// Transport is established; carries the transport for the consumer to own.
    Established {
        generation: Uuid,
        transport: SessionTransport,
    },
    /// Connection attempt failed.
    ConnectFailed { generation: Uuid, error: String },
    /// Full replacement transcript (sentinel already filtered out).
    Transcript { generation: Uuid, text: String },
    /// Transport closed by either side.
    Closed { generation: Uuid },
    /// Transport error; the connection is gone.
    Errored { generation: Uuid, error: String },
}

impl SessionEvent {
    pub fn generation(&self) -> Uuid {
        match self {
            SessionEvent::Established { generation, .. }
            | SessionEvent::ConnectFailed { generation, .. }
            | SessionEvent::Transcript { generation, .. }
            | SessionEvent::Closed { generation }
            | SessionEvent::Errored { generation, .. } => *generation,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Established { .. } => "established",
            SessionEvent::ConnectFailed { .. } => "connect-failed",
            SessionEvent::Transcript { .. } => "transcript",
            SessionEvent::Closed { .. } => "closed",
            SessionEvent::Errored { .. } => "errored",
        }
    }
}

/// Handle to an established connection: write half plus the reader task.
pub struct SessionTransport {
    write: WsSink,
    generation: Uuid,
    reader_task: tokio::task::JoinHandle<()>,
}

impl SessionTransport {
    /// Open a connection and hand the outcome to `events` as either
    /// `Established` (carrying the transport) or `ConnectFailed`.
    pub async fn establish(config: StreamConfig, generation: Uuid, events: mpsc::Sender<SessionEvent>) {
        match Self::connect(&config, generation, events.clone()).await {
            Ok(transport) => {
                log::info!("Connected to recognition server (generation {})", generation);
                let _ = events
                    .send(SessionEvent::Established {
                        generation,
                        transport,
                    })
                    .await;
            }
            Err(e) => {
                log::warn!("Connection failed: {}", e);
                let _ = events
                    .send(SessionEvent::ConnectFailed {
                        generation,
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Single connection attempt with timeout.
    async fn connect(
        config: &StreamConfig,
        generation: Uuid,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, StreamingError> {
        let url = format!("ws://{}:{}", config.server_addr, config.server_port);
        log::info!("Connecting to {}...", url);

        let (ws_stream, _response) = timeout(config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| StreamingError::ConnectionFailed("connection timeout".to_string()))?
            .map_err(|e| StreamingError::ConnectionFailed(e.to_string()))?;

        let (write, read) = ws_stream.split();
        let reader_task = tokio::spawn(run_reader(read, events, generation));

        Ok(Self {
            write,
            generation,
            reader_task,
        })
    }

    /// Transmit one frame as a single binary message. The caller is expected
    /// to check session state first; a failure here means the transport is
    /// no longer usable.
    pub async fn send_frame(&mut self, samples: &[f32]) -> Result<(), StreamingError> {
        self.write
            .send(Message::Binary(encode_frame(samples)))
            .await
            .map_err(|e| StreamingError::SendFailed(e.to_string()))
    }

    pub fn generation(&self) -> Uuid {
        self.generation
    }

    /// Close the connection. Stops the reader first so no further events from
    /// this generation are delivered.
    pub async fn close(mut self) {
        log::info!("Disconnecting from recognition server (generation {})", self.generation);
        self.reader_task.abort();
        if let Err(e) = self.write.close().await {
            log::debug!("Error closing websocket: {}", e);
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        // Ensure the reader task dies if the transport is dropped without close()
        self.reader_task.abort();
    }
}

/// Reader half: inbound messages become events until the transport goes away.
async fn run_reader(mut read: WsSource, events: mpsc::Sender<SessionEvent>, generation: Uuid) {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match classify_message(&text) {
                ServerMessage::Done => {
                    log::debug!("Utterance boundary from server");
                }
                ServerMessage::Transcript(text) => {
                    if events
                        .send(SessionEvent::Transcript { generation, text })
                        .await
                        .is_err()
                    {
                        log::debug!("Event channel closed, reader exiting");
                        return;
                    }
                }
            },
            Ok(Message::Close(_)) => {
                log::info!("Recognition server closed the connection");
                let _ = events.send(SessionEvent::Closed { generation }).await;
                return;
            }
            Err(e) => {
                let error = StreamingError::Disconnected(e.to_string());
                log::warn!("{}", error);
                let _ = events
                    .send(SessionEvent::Errored {
                        generation,
                        error: error.to_string(),
                    })
                    .await;
                return;
            }
            _ => {} // Ignore ping/pong/binary
        }
    }

    // Stream ended without a close frame
    let _ = events.send(SessionEvent::Closed { generation }).await;
}
