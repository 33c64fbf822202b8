//! Live microphone transcription against a locally supervised
//! sherpa-onnx websocket server.
//!
//! # Components
//!
//! - [`server`] — supervises the external recognition server process:
//!   resource checks, launch, exit observation, restart.
//! - [`streaming`] — the session: framing, wire protocol and the WebSocket
//!   transport with its event-producing reader.
//! - [`audio`] — microphone capture on a dedicated thread plus the input
//!   device registry.
//! - [`controller`] — the facade tying it together behind a command channel
//!   and an observable state projection.
//!
//! A front end constructs one [`RecognizerController`], drives it through
//! its async operations, and renders the [`RecognizerState`] it publishes.

pub mod audio;
pub mod config;
pub mod controller;
pub mod server;
pub mod streaming;

pub use controller::{RecognizerController, RecognizerState};
pub use streaming::SessionState;
