//! Configuration for the recognition pipeline
//!
//! Every fixed delay and server launch parameter lives here as a named
//! default so nothing is buried as a magic number at the call site.
//! `AppSettings` is the on-disk representation; the per-component config
//! structs are derived from it at startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const SETTINGS_FILE_NAME: &str = "settings.json";

/// Default server port, matching the port the packaged server is probed on.
pub const DEFAULT_SERVER_PORT: u16 = 6006;

/// Default server address. The server only ever binds locally.
pub const DEFAULT_SERVER_ADDR: &str = "localhost";

/// Worker threads handed to the recognition server.
pub const SERVER_NUM_WORK_THREADS: u32 = 8;

/// Recognition batch size. The server serves a single session.
pub const SERVER_MAX_BATCH_SIZE: u32 = 1;

/// Server decode-loop polling interval in milliseconds.
pub const SERVER_LOOP_INTERVAL_MS: u32 = 50;

/// Sample rate shared by the capture pipeline and the server.
pub const SERVER_SAMPLE_RATE: u32 = 16_000;

/// How long to wait after spawn before trusting that the server came up.
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 3_000;

/// Pause between stop and start during a restart.
pub const DEFAULT_RESTART_SETTLE_MS: u64 = 1_000;

/// WebSocket connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Interval between automatic input-device rescans.
pub const DEFAULT_DEVICE_POLL_SECS: u64 = 5;

/// Capacity of the bounded frame channel between the audio callback and the
/// event loop. At 50 ms per frame this buffers about 1.6 s before frames
/// start getting dropped.
pub const DEFAULT_FRAME_CHANNEL_CAPACITY: usize = 32;

/// Launch and lifecycle parameters for the supervised server process.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub num_work_threads: u32,
    pub max_batch_size: u32,
    pub loop_interval_ms: u32,
    pub sample_rate: u32,
    /// Blocking delay after spawn that absorbs server initialization time.
    pub startup_grace: Duration,
    /// Settling delay between stop and start on restart.
    pub restart_settle: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            num_work_threads: SERVER_NUM_WORK_THREADS,
            max_batch_size: SERVER_MAX_BATCH_SIZE,
            loop_interval_ms: SERVER_LOOP_INTERVAL_MS,
            sample_rate: SERVER_SAMPLE_RATE,
            startup_grace: Duration::from_millis(DEFAULT_STARTUP_GRACE_MS),
            restart_settle: Duration::from_millis(DEFAULT_RESTART_SETTLE_MS),
        }
    }
}

/// Connection parameters for the streaming session.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub server_addr: String,
    pub server_port: u16,
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

/// Persisted application settings.
///
/// Unknown and missing fields fall back to defaults so old settings files
/// keep loading across versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub server_addr: String,
    pub server_port: u16,

    /// Resource root holding `binaries/` and `models/`. `None` means the
    /// development layout: `./resources` under the working directory.
    pub resource_root: Option<PathBuf>,

    pub startup_grace_ms: u64,
    pub restart_settle_ms: u64,
    pub connect_timeout_ms: u64,
    pub device_poll_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            resource_root: None,
            startup_grace_ms: DEFAULT_STARTUP_GRACE_MS,
            restart_settle_ms: DEFAULT_RESTART_SETTLE_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            device_poll_secs: DEFAULT_DEVICE_POLL_SECS,
        }
    }
}

impl AppSettings {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            startup_grace: Duration::from_millis(self.startup_grace_ms),
            restart_settle: Duration::from_millis(self.restart_settle_ms),
            ..SupervisorConfig::default()
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            server_addr: self.server_addr.clone(),
            server_port: self.server_port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn device_poll_interval(&self) -> Duration {
        Duration::from_secs(self.device_poll_secs.max(1))
    }
}

fn settings_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("sherpa-scribe").join(SETTINGS_FILE_NAME))
}

/// Load settings from the platform config dir, falling back to defaults on
/// any failure. A missing file is the normal first-run case.
pub fn load_settings() -> AppSettings {
    let Some(path) = settings_path() else {
        log::warn!("Settings: could not determine config directory");
        return AppSettings::default();
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

/// Write settings to the platform config dir, creating it if needed.
pub fn save_settings(settings: &AppSettings) -> Result<(), String> {
    let path = settings_path().ok_or_else(|| "could not determine config directory".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create config directory {:?}: {}", parent, e))?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("failed to serialize settings: {}", e))?;
    std::fs::write(&path, json).map_err(|e| format!("failed to write {:?}: {}", path, e))
}
