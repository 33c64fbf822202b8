//! Streaming session to the local recognition server
//!
//! # Architecture
//!
//! ```text
//! Audio Thread (sync)                 Tokio Runtime (async)
//! ┌──────────────────┐                ┌─────────────────────────┐
//! │ CPAL Callback    │──try_send────▶ │ Controller event loop   │
//! │  └─ FrameBuffer  │  (bounded)     │   └─ SessionTransport   │
//! └──────────────────┘                │        (WebSocket)      │
//!                                     └───────────┬─────────────┘
//!                                                 ▼
//!                                       Transcript updates
//! ```
//!
//! Frames cross from the real-time context over a bounded channel with a
//! drop-newest policy: the callback never blocks, and a slow consumer loses
//! frames rather than stalling the audio thread. Inbound transcripts arrive
//! as `SessionEvent`s and are applied by a single event loop.

mod frame;
mod protocol;
mod session;

pub use frame::{AudioFrame, FrameBuffer, FrameConfig};
pub use protocol::{classify_message, encode_frame, ServerMessage, DONE_SENTINEL};
pub use session::{SessionEvent, SessionState, SessionTransport};

/// Errors that can occur on the streaming connection.
#[derive(Debug, Clone)]
pub enum StreamingError {
    /// Failed to establish the WebSocket connection
    ConnectionFailed(String),
    /// Failed to send a frame over an established connection
    SendFailed(String),
    /// Connection was closed unexpectedly
    Disconnected(String),
}

impl std::fmt::Display for StreamingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamingError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to recognition server: {}", e)
            }
            StreamingError::SendFailed(e) => write!(f, "Failed to send audio frame: {}", e),
            StreamingError::Disconnected(e) => write!(f, "Connection lost: {}", e),
        }
    }
}

impl std::error::Error for StreamingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_error_display() {
        let err = StreamingError::ConnectionFailed("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));

        let err = StreamingError::SendFailed("broken pipe".to_string());
        assert!(err.to_string().contains("broken pipe"));

        let err = StreamingError::Disconnected("reset by peer".to_string());
        assert!(err.to_string().contains("reset by peer"));
    }
}
