//! Wire protocol for the recognition server connection
//!
//! # Protocol Overview
//!
//! The server speaks a deliberately thin protocol over one WebSocket:
//!
//! - Outbound: raw little-endian 32-bit float PCM, mono 16 kHz, one binary
//!   message per frame (800 samples = 3200 bytes).
//! - Inbound: UTF-8 text. `"Done!"` is a control sentinel marking the end of
//!   an utterance and never carries transcript content; every other message
//!   is the full current best transcript, superseding the previous one.

/// Control sentinel sent by the server when an utterance is finished.
pub const DONE_SENTINEL: &str = "Done!";

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Complete current transcript; replaces whatever was displayed before.
    Transcript(String),
    /// Utterance boundary marker; suppressed from display.
    Done,
}

/// Classify one inbound text message.
pub fn classify_message(text: &str) -> ServerMessage {
    if text == DONE_SENTINEL {
        ServerMessage::Done
    } else {
        ServerMessage::Transcript(text.to_string())
    }
}

/// Encode a frame of samples into the outbound binary payload.
pub fn encode_frame(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
