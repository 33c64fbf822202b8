//! Application facade for the recognition pipeline
//!
//! `RecognizerController` is constructed once at startup and owns the server
//! supervisor, the device registry, the capture pipeline and the streaming
//! session. It follows a single-writer pattern: every piece of session and
//! device state is mutated by one event loop, fed by a command channel from
//! the public methods and by the session's transport events. Callers observe
//! state through a `watch` projection instead of return values; failures
//! land in the `error` field rather than crossing the boundary as panics.
//!
//! Key rules:
//! - Events from a superseded connection generation are ignored
//! - Frames are forwarded only while the session is open; otherwise dropped
//! - Teardown paths release capture hardware before anything else proceeds

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::audio::{scan_devices, AudioDevice, CaptureController, DeviceRegistry, FrameSender};
use crate::config::{AppSettings, StreamConfig, DEFAULT_FRAME_CHANNEL_CAPACITY};
use crate::server::{ResourceLayout, ServerStatus, ServerSupervisor};
use crate::streaming::{AudioFrame, FrameConfig, SessionEvent, SessionState, SessionTransport};

/// Observable state projection, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerState {
    pub session: SessionState,
    pub is_recognizing: bool,
    /// Latest transcript from the server; each update replaces the last.
    pub last_result: String,
    pub error: Option<String>,
    pub microphones: Vec<AudioDevice>,
    pub selected_device: Option<String>,
}

impl Default for RecognizerState {
    fn default() -> Self {
        Self {
            session: SessionState::Disconnected,
            is_recognizing: false,
            last_result: String::new(),
            error: None,
            microphones: Vec::new(),
            selected_device: None,
        }
    }
}

enum Command {
    Connect,
    Disconnect { done: oneshot::Sender<()> },
    StartRecognition { device_override: Option<String> },
    StopRecognition,
    SelectMicrophone { id: String },
    RefreshDevices,
    ClearResults,
}

/// Handle to the recognition pipeline. Construct inside a tokio runtime.
pub struct RecognizerController {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<RecognizerState>,
    supervisor: ServerSupervisor,
    server_port: u16,
    loop_task: tokio::task::JoinHandle<()>,
}

impl RecognizerController {
    pub fn new(settings: &AppSettings) -> Self {
        let layout = settings
            .resource_root
            .clone()
            .map(ResourceLayout::new)
            .unwrap_or_else(ResourceLayout::dev_default);
        let supervisor = ServerSupervisor::new(settings.supervisor_config(), layout);

        let (commands, cmd_rx) = mpsc::channel(16);
        let (state_tx, state) = watch::channel(RecognizerState::default());
        let (session_tx, session_rx) = mpsc::channel(64);
        let (frame_tx, frame_rx) = mpsc::channel(DEFAULT_FRAME_CHANNEL_CAPACITY);

        let event_loop = EventLoop {
            state: RecognizerState::default(),
            state_tx,
            registry: DeviceRegistry::new(),
            capture: CaptureController::spawn(FrameConfig::default()),
            session: None,
            generation: None,
            stream_config: settings.stream_config(),
            session_tx,
            session_rx,
            frame_tx,
            frame_rx,
            device_poll: settings.device_poll_interval(),
            cmd_rx,
        };
        let loop_task = tokio::spawn(event_loop.run());

        Self {
            commands,
            state,
            supervisor,
            server_port: settings.server_port,
            loop_task,
        }
    }

    /// Watch handle for state changes; `borrow()` gives the current state.
    pub fn watch_state(&self) -> watch::Receiver<RecognizerState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> RecognizerState {
        self.state.borrow().clone()
    }

    /// Open the streaming session. No-op while already connecting or open.
    pub async fn connect(&self) {
        self.send(Command::Connect).await;
    }

    /// Close the session and release capture hardware. Idempotent; resolves
    /// only after all teardown steps have run.
    pub async fn disconnect(&self) {
        let (done, finished) = oneshot::channel();
        self.send(Command::Disconnect { done }).await;
        let _ = finished.await;
    }

    /// Begin streaming microphone audio over the open session.
    pub async fn start_recognition(&self) {
        self.send(Command::StartRecognition {
            device_override: None,
        })
        .await;
    }

    /// Stop streaming audio; the session stays open.
    pub async fn stop_recognition(&self) {
        self.send(Command::StopRecognition).await;
    }

    /// Change the microphone selection; if recognition is active, the capture
    /// graph is rebuilt on the new device while the session stays open.
    pub async fn select_microphone(&self, id: impl Into<String>) {
        self.send(Command::SelectMicrophone { id: id.into() }).await;
    }

    pub async fn refresh_devices(&self) {
        self.send(Command::RefreshDevices).await;
    }

    /// Clear the displayed transcript and any error text.
    pub async fn clear_results(&self) {
        self.send(Command::ClearResults).await;
    }

    pub async fn start_server(&self) -> bool {
        self.supervisor.start(self.server_port).await
    }

    pub fn stop_server(&self) {
        self.supervisor.stop();
    }

    pub async fn restart_server(&self) -> bool {
        self.supervisor.restart(self.server_port).await
    }

    pub fn server_status(&self) -> ServerStatus {
        self.supervisor.status()
    }

    pub fn server_error(&self) -> Option<String> {
        self.supervisor.last_error()
    }

    /// Tear everything down: session, capture hardware, server process.
    pub async fn shutdown(self) {
        self.disconnect().await;
        drop(self.commands);
        self.supervisor.stop();
        let _ = self.loop_task.await;
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            log::warn!("Controller event loop is gone, command dropped");
        }
    }
}

struct EventLoop {
    state: RecognizerState,
    state_tx: watch::Sender<RecognizerState>,
    registry: DeviceRegistry,
    capture: CaptureController,
    session: Option<SessionTransport>,
    /// Generation of the current (or currently connecting) session instance.
    generation: Option<Uuid>,
    stream_config: StreamConfig,
    session_tx: mpsc::Sender<SessionEvent>,
    session_rx: mpsc::Receiver<SessionEvent>,
    frame_tx: FrameSender,
    frame_rx: mpsc::Receiver<AudioFrame>,
    device_poll: Duration,
    cmd_rx: mpsc::Receiver<Command>,
}

impl EventLoop {
    async fn run(mut self) {
        log::info!("Controller event loop started");
        let mut device_tick = tokio::time::interval(self.device_poll);
        device_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                // The loop keeps its own senders alive, so these never yield None
                Some(event) = self.session_rx.recv() => self.handle_session_event(event).await,
                Some(frame) = self.frame_rx.recv() => self.forward_frame(frame).await,
                _ = device_tick.tick() => self.rescan_devices().await,
            }
        }

        self.teardown_session(None).await;
        log::info!("Controller event loop ended");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.handle_connect(),
            Command::Disconnect { done } => {
                self.teardown_session(None).await;
                let _ = done.send(());
            }
            Command::StartRecognition { device_override } => {
                self.handle_start_recognition(device_override).await;
            }
            Command::StopRecognition => self.handle_stop_recognition().await,
            Command::SelectMicrophone { id } => self.handle_select_microphone(id).await,
            Command::RefreshDevices => self.rescan_devices().await,
            Command::ClearResults => {
                self.state.last_result.clear();
                self.state.error = None;
                self.publish();
            }
        }
    }

    fn handle_connect(&mut self) {
        if self.state.session != SessionState::Disconnected {
            log::debug!("Connect requested while {}", self.state.session.as_str());
            return;
        }
        let generation = Uuid::new_v4();
        self.generation = Some(generation);
        self.state.session = SessionState::Connecting;
        self.publish();
        tokio::spawn(SessionTransport::establish(
            self.stream_config.clone(),
            generation,
            self.session_tx.clone(),
        ));
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        if Some(event.generation()) != self.generation {
            log::debug!("Ignoring stale session event: {}", event.kind());
            return;
        }
        match event {
            SessionEvent::Established { transport, .. } => {
                self.session = Some(transport);
                self.state.session = SessionState::Open;
                self.state.error = None;
                self.publish();
            }
            SessionEvent::ConnectFailed { error, .. } => {
                self.generation = None;
                self.state.session = SessionState::Disconnected;
                self.state.error = Some(error);
                self.publish();
            }
            SessionEvent::Transcript { text, .. } => {
                self.state.last_result = text;
                self.publish();
            }
            SessionEvent::Closed { .. } => {
                log::info!("Session closed by transport");
                self.teardown_session(None).await;
            }
            SessionEvent::Errored { error, .. } => {
                log::warn!("Session transport error: {}", error);
                self.teardown_session(Some(error)).await;
            }
        }
    }

    async fn handle_start_recognition(&mut self, device_override: Option<String>) {
        if self.state.session != SessionState::Open {
            self.state.error = Some("Not connected to recognition server".to_string());
            self.publish();
            return;
        }
        if self.state.is_recognizing && device_override.is_none() {
            log::debug!("Recognition already active");
            return;
        }

        let device = device_override.or_else(|| self.registry.selected().map(String::from));
        match self.capture.start(device.clone(), self.frame_tx.clone()).await {
            Ok(()) => {
                log::info!("Recognition started (device: {:?})", device);
                self.state.is_recognizing = true;
                self.state.error = None;
            }
            Err(e) => {
                log::error!("Microphone access error: {}", e);
                self.state.is_recognizing = false;
                self.state.error = Some(e.to_string());
            }
        }
        self.publish();
    }

    async fn handle_stop_recognition(&mut self) {
        self.capture.stop().await;
        if self.state.is_recognizing {
            log::info!("Recognition stopped");
        }
        self.state.is_recognizing = false;
        self.publish();
    }

    async fn handle_select_microphone(&mut self, id: String) {
        self.registry.select(&id);
        self.state.selected_device = Some(id.clone());
        if self.state.is_recognizing {
            // Seamless switch: the old graph is fully torn down before the
            // new device is acquired; the session is untouched.
            self.capture.stop().await;
            self.state.is_recognizing = false;
            self.handle_start_recognition(Some(id)).await;
        } else {
            self.publish();
        }
    }

    /// Forward one captured frame over the open session. Frames arriving
    /// while the session is not open are dropped, never queued.
    async fn forward_frame(&mut self, frame: AudioFrame) {
        if self.state.session != SessionState::Open || !self.state.is_recognizing {
            return;
        }
        let Some(transport) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = transport.send_frame(frame.samples()).await {
            log::warn!("{}", e);
            self.teardown_session(Some(e.to_string())).await;
        }
    }

    /// Close the transport (if any) and release capture hardware. Safe to
    /// call when already disconnected.
    async fn teardown_session(&mut self, error: Option<String>) {
        if let Some(transport) = self.session.take() {
            transport.close().await;
        }
        self.generation = None;
        self.capture.stop().await;
        self.state.session = SessionState::Disconnected;
        self.state.is_recognizing = false;
        if let Some(error) = error {
            self.state.error = Some(error);
        }
        self.publish();
    }

    async fn rescan_devices(&mut self) {
        let devices = match tokio::task::spawn_blocking(scan_devices).await {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("Device scan task failed: {}", e);
                return;
            }
        };
        self.registry.apply_devices(devices);
        let microphones = self.registry.devices().to_vec();
        let selected = self.registry.selected().map(String::from);
        if microphones != self.state.microphones || selected != self.state.selected_device {
            self.state.microphones = microphones;
            self.state.selected_device = selected;
            self.publish();
        }
    }

    fn publish(&self) {
        let _ = self.state_tx.send(self.state.clone());
    }
}
