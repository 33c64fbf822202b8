//! Input-device registry
//!
//! Keeps the enumerated microphone list and the current selection. The
//! selection survives refreshes while its device is still present and fails
//! over to the first available device (or none) when it disappears.
//!
//! Hardware scanning (`scan_devices`) is separated from the selection policy
//! (`DeviceRegistry::apply_devices`) so the policy is plain testable state.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

/// Identifier plus human-readable label for one input device. CPAL exposes
/// no separate stable id, so the device name serves as both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub id: String,
    pub label: String,
}

/// Enumerated input devices plus the current selection.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<AudioDevice>,
    selected: Option<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &[AudioDevice] {
        &self.devices
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Record a new selection. The id is stored even if it is not in the
    /// current list (the next refresh fails over if it never shows up).
    /// Returns whether the device is currently known.
    pub fn select(&mut self, id: &str) -> bool {
        let known = self.devices.iter().any(|d| d.id == id);
        if !known {
            log::warn!("Selecting input device not in current list: {}", id);
        }
        self.selected = Some(id.to_string());
        known
    }

    /// Install a fresh enumeration, preserving the selection when its device
    /// is still present and failing over to the first device otherwise.
    pub fn apply_devices(&mut self, devices: Vec<AudioDevice>) {
        let still_present = self
            .selected
            .as_ref()
            .map(|id| devices.iter().any(|d| &d.id == id))
            .unwrap_or(false);
        if !still_present {
            self.selected = devices.first().map(|d| d.id.clone());
        }
        self.devices = devices;
    }
}

/// Enumerate audio-input devices, upgrading placeholder labels with a
/// one-shot permission probe when nothing useful came back.
///
/// Touches the hardware; call off the event loop (`spawn_blocking`).
pub fn scan_devices() -> Vec<AudioDevice> {
    let mut devices = enumerate();
    if !devices.is_empty() && devices.iter().all(|d| is_placeholder_label(&d.label)) {
        // All labels generic: likely no capture permission yet. Open and
        // immediately release a default-device stream to trigger the prompt,
        // then look again. Best effort only.
        probe_permission();
        devices = enumerate();
    }
    devices
}

fn enumerate() -> Vec<AudioDevice> {
    let host = cpal::default_host();
    let iter = match host.input_devices() {
        Ok(iter) => iter,
        Err(e) => {
            log::warn!("Input device enumeration failed: {}", e);
            return Vec::new();
        }
    };

    iter.filter_map(|device| match device.name() {
        // A nameless device cannot be re-requested by exact match later
        Ok(name) if !name.is_empty() => Some(AudioDevice {
            id: name.clone(),
            label: name,
        }),
        _ => None,
    })
    .collect()
}

fn is_placeholder_label(label: &str) -> bool {
    if label.is_empty() {
        return true;
    }
    label
        .strip_prefix("Microphone ")
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Open and drop a short-lived default-device stream so the OS shows its
/// capture-permission prompt. Every failure is swallowed.
fn probe_permission() {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        return;
    };
    let Ok(supported) = device.default_input_config() else {
        return;
    };
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let err_fn = |e| log::debug!("Permission probe stream error: {}", e);

    let stream = match sample_format {
        cpal::SampleFormat::I16 => {
            device.build_input_stream(&config, |_: &[i16], _: &cpal::InputCallbackInfo| {}, err_fn, None)
        }
        cpal::SampleFormat::U16 => {
            device.build_input_stream(&config, |_: &[u16], _: &cpal::InputCallbackInfo| {}, err_fn, None)
        }
        cpal::SampleFormat::F32 => {
            device.build_input_stream(&config, |_: &[f32], _: &cpal::InputCallbackInfo| {}, err_fn, None)
        }
        _ => return,
    };

    match stream {
        Ok(stream) => {
            let _ = stream.play();
            drop(stream);
            log::debug!("Permission probe stream opened and released");
        }
        Err(e) => log::debug!("Permission probe failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> AudioDevice {
        AudioDevice {
            id: id.to_string(),
            label: id.to_string(),
        }
    }

    #[test]
    fn selection_is_preserved_when_device_survives_refresh() {
        let mut registry = DeviceRegistry::new();
        registry.apply_devices(vec![device("internal"), device("usb")]);
        registry.select("usb");

        registry.apply_devices(vec![device("usb"), device("headset")]);
        assert_eq!(registry.selected(), Some("usb"));
    }

    #[test]
    fn selection_fails_over_to_first_when_device_disappears() {
        let mut registry = DeviceRegistry::new();
        registry.apply_devices(vec![device("internal"), device("usb")]);
        registry.select("usb");

        registry.apply_devices(vec![device("internal"), device("headset")]);
        assert_eq!(registry.selected(), Some("internal"));
    }

    #[test]
    fn empty_refresh_clears_selection() {
        let mut registry = DeviceRegistry::new();
        registry.apply_devices(vec![device("internal")]);
        assert_eq!(registry.selected(), Some("internal"));

        registry.apply_devices(Vec::new());
        assert_eq!(registry.selected(), None);
        assert!(registry.devices().is_empty());
    }

    #[test]
    fn first_refresh_selects_first_device() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.selected(), None);
        registry.apply_devices(vec![device("internal"), device("usb")]);
        assert_eq!(registry.selected(), Some("internal"));
    }

    #[test]
    fn selecting_unknown_device_is_recorded_but_flagged() {
        let mut registry = DeviceRegistry::new();
        registry.apply_devices(vec![device("internal")]);
        assert!(!registry.select("ghost"));
        assert_eq!(registry.selected(), Some("ghost"));

        // Next refresh without it fails over
        registry.apply_devices(vec![device("internal")]);
        assert_eq!(registry.selected(), Some("internal"));
    }

    #[test]
    fn placeholder_labels_are_detected() {
        assert!(is_placeholder_label(""));
        assert!(is_placeholder_label("Microphone 1"));
        assert!(is_placeholder_label("Microphone 12"));
        assert!(!is_placeholder_label("Microphone"));
        assert!(!is_placeholder_label("USB Audio Device"));
        assert!(!is_placeholder_label("Microphone (USB)"));
    }
}
