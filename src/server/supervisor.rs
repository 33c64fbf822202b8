//! Recognition server process supervisor
//!
//! Owns the external server process: spawn with the fixed argument set,
//! observe exit asynchronously, stop on request. Status is bookkeeping only;
//! `status()` never touches the OS. A monitor task reaps the child and
//! clears the running flag whenever the process goes away, for any reason,
//! so a crash is observable without another start/stop call.
//!
//! There is no automatic restart-on-crash: a dead server stays stopped until
//! the caller explicitly asks for a restart (stop, settle delay, start).

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::resources::{ModelPaths, ResourceLayout};
use super::SupervisorError;
use crate::config::SupervisorConfig;

/// Snapshot of the supervisor's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub is_running: bool,
    pub pid: Option<u32>,
    /// Exit code of the most recently ended process, if it exited normally.
    pub last_exit_code: Option<i32>,
}

#[derive(Debug, Default)]
struct ProcessState {
    running: bool,
    pid: Option<u32>,
    last_exit_code: Option<i32>,
    last_error: Option<String>,
    stop_token: Option<CancellationToken>,
}

/// Supervisor for the external recognition server process.
///
/// Clones share the same underlying process bookkeeping.
#[derive(Clone)]
pub struct ServerSupervisor {
    config: SupervisorConfig,
    layout: ResourceLayout,
    state: Arc<Mutex<ProcessState>>,
}

impl ServerSupervisor {
    pub fn new(config: SupervisorConfig, layout: ResourceLayout) -> Self {
        Self {
            config,
            layout,
            state: Arc::new(Mutex::new(ProcessState::default())),
        }
    }

    /// Launch the server on `port`.
    ///
    /// Fails fast (returns `false`, never panics) when the binary or a model
    /// artifact is missing or the spawn fails; the cause lands in
    /// `last_error()`. Blocks for the startup grace period before reporting
    /// success so a process that dies during its own initialization is
    /// reported as a failed start. Calling while already running is a no-op
    /// returning `true`.
    pub async fn start(&self, port: u16) -> bool {
        if self.status().is_running {
            log::info!("Recognition server is already running");
            return true;
        }

        if let Err(e) = self.layout.check() {
            log::error!("{}", e);
            self.set_error(e.to_string());
            return false;
        }

        let binary = self.layout.binary_path();
        let models = self.layout.model_paths();

        #[cfg(unix)]
        ensure_executable(&binary);

        let args = build_args(port, &models, &self.config);
        log::info!("Starting recognition server: {}", binary.display());
        log::debug!("Args: {:?}", args);

        let mut child = match Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let err = SupervisorError::SpawnFailed(e.to_string());
                log::error!("{}", err);
                self.set_error(err.to_string());
                return false;
            }
        };

        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "Server stdout", false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "Server stderr", true));
        }

        let stop_token = CancellationToken::new();
        {
            let mut state = lock(&self.state);
            state.running = true;
            state.pid = pid;
            state.last_exit_code = None;
            state.last_error = None;
            state.stop_token = Some(stop_token.clone());
        }

        tokio::spawn(monitor_child(child, stop_token, Arc::clone(&self.state)));

        // Absorb the server's own initialization time before reporting success
        tokio::time::sleep(self.config.startup_grace).await;

        if self.status().is_running {
            log::info!("Recognition server started (pid {:?})", pid);
            true
        } else {
            log::error!("Recognition server exited during startup");
            self.set_error("server exited during startup".to_string());
            false
        }
    }

    /// Signal the running process to terminate. Does not wait for exit; the
    /// monitor task clears the running flag once the process is reaped.
    /// No-op when nothing is running.
    pub fn stop(&self) {
        let token = lock(&self.state).stop_token.take();
        match token {
            Some(token) => {
                log::info!("Stopping recognition server...");
                token.cancel();
            }
            None => log::debug!("Stop requested but no server is running"),
        }
    }

    /// Stop, wait out the settling delay, start again. Returns the outcome
    /// of the new start.
    pub async fn restart(&self, port: u16) -> bool {
        self.stop();
        tokio::time::sleep(self.config.restart_settle).await;
        self.start(port).await
    }

    /// Pure read of the supervisor's own bookkeeping.
    pub fn status(&self) -> ServerStatus {
        let state = lock(&self.state);
        ServerStatus {
            is_running: state.running,
            pid: state.pid,
            last_exit_code: state.last_exit_code,
        }
    }

    /// Most recent start/launch failure, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    fn set_error(&self, error: String) {
        lock(&self.state).last_error = Some(error);
    }
}

/// Recover the guard even if a holder panicked; the state stays usable.
fn lock(state: &Mutex<ProcessState>) -> MutexGuard<'_, ProcessState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The server's fixed launch contract, in its fixed order.
fn build_args(port: u16, models: &ModelPaths, config: &SupervisorConfig) -> Vec<String> {
    vec![
        format!("--port={}", port),
        format!("--num-work-threads={}", config.num_work_threads),
        format!("--tokens={}", models.tokens.display()),
        format!("--encoder={}", models.encoder.display()),
        format!("--decoder={}", models.decoder.display()),
        format!("--joiner={}", models.joiner.display()),
        format!("--log-file={}", models.log_file.display()),
        format!("--max-batch-size={}", config.max_batch_size),
        format!("--loop-interval-ms={}", config.loop_interval_ms),
        format!("--sample-rate={}", config.sample_rate),
    ]
}

/// Make the binary executable before launch. The artifact may already carry
/// the bit or the filesystem may not support it, so failure is non-fatal.
#[cfg(unix)]
fn ensure_executable(binary: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(binary, std::fs::Permissions::from_mode(0o755)) {
        log::warn!(
            "Failed to set executable permission on {}: {}",
            binary.display(),
            e
        );
    }
}

/// Reap the child: wait for exit or for a stop signal, then record the
/// outcome. This is the only writer that clears the running flag.
async fn monitor_child(mut child: Child, stop: CancellationToken, state: Arc<Mutex<ProcessState>>) {
    let exit = tokio::select! {
        status = child.wait() => status,
        _ = stop.cancelled() => {
            if let Err(e) = child.start_kill() {
                log::warn!("Failed to signal server process: {}", e);
            }
            child.wait().await
        }
    };

    let code = match exit {
        Ok(status) => {
            log::info!("Recognition server exited with {}", status);
            status.code()
        }
        Err(e) => {
            log::warn!("Failed to wait on server process: {}", e);
            None
        }
    };

    let mut state = lock(&state);
    state.running = false;
    state.pid = None;
    state.stop_token = None;
    state.last_exit_code = code;
}

/// Forward child output line by line into the application log.
async fn forward_output<R: AsyncRead + Unpin>(reader: R, label: &'static str, as_warning: bool) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if as_warning {
            log::warn!("{}: {}", label, line);
        } else {
            log::debug!("{}: {}", label, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn launch_args_are_deterministic_and_ordered() {
        let models = ModelPaths {
            tokens: PathBuf::from("/r/models/tokens.txt"),
            encoder: PathBuf::from("/r/models/encoder-epoch-99-avg-1.onnx"),
            decoder: PathBuf::from("/r/models/decoder-epoch-99-avg-1.onnx"),
            joiner: PathBuf::from("/r/models/joiner-epoch-99-avg-1.onnx"),
            log_file: PathBuf::from("/r/models/log.txt"),
        };
        let args = build_args(6006, &models, &SupervisorConfig::default());
        assert_eq!(
            args,
            vec![
                "--port=6006",
                "--num-work-threads=8",
                "--tokens=/r/models/tokens.txt",
                "--encoder=/r/models/encoder-epoch-99-avg-1.onnx",
                "--decoder=/r/models/decoder-epoch-99-avg-1.onnx",
                "--joiner=/r/models/joiner-epoch-99-avg-1.onnx",
                "--log-file=/r/models/log.txt",
                "--max-batch-size=1",
                "--loop-interval-ms=50",
                "--sample-rate=16000",
            ]
        );
    }

    #[test]
    fn initial_status_is_stopped() {
        let supervisor = ServerSupervisor::new(
            SupervisorConfig::default(),
            ResourceLayout::new(PathBuf::from("/nonexistent")),
        );
        let status = supervisor.status();
        assert!(!status.is_running);
        assert_eq!(status.pid, None);
        assert_eq!(status.last_exit_code, None);
        assert!(supervisor.last_error().is_none());
    }

    #[tokio::test]
    async fn start_with_missing_resources_reports_and_stays_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ServerSupervisor::new(
            SupervisorConfig::default(),
            ResourceLayout::new(dir.path().to_path_buf()),
        );
        assert!(!supervisor.start(6006).await);
        assert!(!supervisor.status().is_running);
        let error = supervisor.last_error().expect("missing binary is recorded");
        assert!(error.contains("not found"));
    }

    #[tokio::test]
    async fn stop_without_running_process_is_a_noop() {
        let supervisor = ServerSupervisor::new(
            SupervisorConfig::default(),
            ResourceLayout::new(PathBuf::from("/nonexistent")),
        );
        supervisor.stop();
        supervisor.stop();
        assert!(!supervisor.status().is_running);
    }
}
