//! Microphone capture and input-device bookkeeping
//!
//! Capture runs on a dedicated audio thread that owns the CPAL stream; the
//! hardware callback does conversion, downsampling and framing, and hands
//! finished frames to the event loop over a bounded channel. The device
//! registry tracks the enumerated input devices and which one is selected.

pub mod capture;
pub mod devices;

pub use capture::{CaptureController, FrameSender};
pub use devices::{scan_devices, AudioDevice, DeviceRegistry};

/// Errors that can occur while acquiring or running microphone capture.
#[derive(Debug, Clone)]
pub enum AudioError {
    /// No input device is available at all
    NoInputDevice,
    /// The requested device is not present (exact match required, no fallback)
    DeviceNotFound(String),
    /// Input device enumeration failed
    EnumerationFailed(String),
    /// The device offers no sample format we can capture
    NoSupportedConfig,
    /// The device rate cannot be reduced to the server rate by an integer ratio
    UnsupportedSampleRate(u32),
    /// Stream could not be created or started
    StreamCreationFailed(String),
    /// The capture thread has exited and cannot take commands
    CaptureThreadGone,
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::DeviceNotFound(id) => {
                write!(f, "Requested input device not available: {}", id)
            }
            AudioError::EnumerationFailed(e) => {
                write!(f, "Failed to enumerate input devices: {}", e)
            }
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::UnsupportedSampleRate(rate) => {
                write!(f, "Unsupported device sample rate: {} Hz", rate)
            }
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::CaptureThreadGone => write!(f, "Audio capture thread is not running"),
        }
    }
}

impl std::error::Error for AudioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::DeviceNotFound("USB Microphone".to_string());
        assert!(err.to_string().contains("USB Microphone"));

        let err = AudioError::UnsupportedSampleRate(44_100);
        assert!(err.to_string().contains("44100"));

        let err = AudioError::StreamCreationFailed("device busy".to_string());
        assert!(err.to_string().contains("device busy"));
    }
}
