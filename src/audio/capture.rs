//! Microphone capture pipeline
//!
//! # Architecture
//!
//! ```text
//! Controller (async)        Audio thread (sync)         Hardware callback
//! ┌───────────────┐  cmd   ┌──────────────────┐        ┌──────────────────┐
//! │ start / stop  │──────▶ │ owns cpal::Stream │ ◀──── │ mono downmix     │
//! │ (oneshot ack) │        │ open / drop       │        │ ratio downsample │
//! └───────────────┘        └──────────────────┘        │ FrameBuffer      │
//!                                                       │ try_send frames  │
//!                                                       └──────────────────┘
//! ```
//!
//! The CPAL stream is not `Send`, so a dedicated thread owns it and takes
//! start/stop commands over a channel. Stops are acknowledged: the reply is
//! sent only after the old stream is dropped, so a device switch never holds
//! two capture graphs at once.
//!
//! The hardware callback never blocks and never allocates per sample: it
//! downmixes to mono, averages down to the server rate when the device
//! cannot run at 16 kHz natively, and pushes into a `FrameBuffer`. Finished
//! frames go out with `try_send`; when the channel is full the frame is
//! dropped and counted rather than stalling the callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use super::AudioError;
use crate::streaming::{AudioFrame, FrameBuffer, FrameConfig};

/// Sending half of the bounded frame channel into the event loop.
pub type FrameSender = mpsc::Sender<AudioFrame>;

enum CaptureCommand {
    Start {
        /// Exact device name, or `None` for the system default device.
        device_id: Option<String>,
        frames: FrameSender,
        reply: oneshot::Sender<Result<(), AudioError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Handle controlling the dedicated capture thread.
pub struct CaptureController {
    commands: std::sync::mpsc::Sender<CaptureCommand>,
    thread: Option<thread::JoinHandle<()>>,
    dropped_frames: Arc<AtomicU64>,
}

impl CaptureController {
    /// Spawn the capture thread. No hardware is touched until `start`.
    pub fn spawn(frame_config: FrameConfig) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        let dropped_frames = Arc::new(AtomicU64::new(0));
        let dropped = Arc::clone(&dropped_frames);
        let thread = thread::spawn(move || run_capture_thread(rx, frame_config, dropped));
        Self {
            commands: tx,
            thread: Some(thread),
            dropped_frames,
        }
    }

    /// Acquire a capture graph bound to `device_id` (exact match; `None`
    /// means the default device) and start producing frames on `frames`.
    /// Any previously active graph is torn down first.
    pub async fn start(
        &self,
        device_id: Option<String>,
        frames: FrameSender,
    ) -> Result<(), AudioError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(CaptureCommand::Start {
                device_id,
                frames,
                reply,
            })
            .map_err(|_| AudioError::CaptureThreadGone)?;
        outcome.await.map_err(|_| AudioError::CaptureThreadGone)?
    }

    /// Tear down the active capture graph, releasing the hardware. Resolves
    /// only after the stream is dropped, so a following `start` never
    /// overlaps the old graph. No-op when nothing is capturing.
    pub async fn stop(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(CaptureCommand::Stop { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Frames discarded because the frame channel was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        let _ = self.commands.send(CaptureCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_capture_thread(
    commands: std::sync::mpsc::Receiver<CaptureCommand>,
    frame_config: FrameConfig,
    dropped: Arc<AtomicU64>,
) {
    log::debug!("Audio capture thread started");
    let mut active: Option<Stream> = None;

    while let Ok(command) = commands.recv() {
        match command {
            CaptureCommand::Start {
                device_id,
                frames,
                reply,
            } => {
                // Old graph must be gone before the new device is opened
                if active.take().is_some() {
                    log::debug!("Dropped previous capture stream before reacquire");
                }
                let result =
                    open_capture_stream(device_id.as_deref(), frames, &frame_config, &dropped);
                let outcome = match result {
                    Ok(stream) => {
                        active = Some(stream);
                        Ok(())
                    }
                    Err(e) => {
                        log::error!("Capture start failed: {}", e);
                        Err(e)
                    }
                };
                let _ = reply.send(outcome);
            }
            CaptureCommand::Stop { reply } => {
                if active.take().is_some() {
                    log::info!("Capture stream stopped");
                }
                let _ = reply.send(());
            }
            CaptureCommand::Shutdown => break,
        }
    }

    drop(active);
    log::debug!("Audio capture thread exiting");
}

fn open_capture_stream(
    device_id: Option<&str>,
    frames: FrameSender,
    frame_config: &FrameConfig,
    dropped: &Arc<AtomicU64>,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = match device_id {
        Some(id) => find_device(&host, id)?,
        None => host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?,
    };
    log::info!("Using audio input device: {:?}", device.name());

    let (config, sample_format, ratio) = select_capture_config(&device, frame_config.sample_rate)?;
    log::info!(
        "Audio config: {} Hz, {} channels, {:?} (downsample ratio {})",
        config.sample_rate.0,
        config.channels,
        sample_format,
        ratio
    );

    let stream = build_capture_stream(
        &device,
        &config,
        sample_format,
        ratio,
        frame_config,
        frames,
        Arc::clone(dropped),
    )?;

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("failed to start stream: {}", e)))?;

    log::info!("Capture started");
    Ok(stream)
}

/// Exact-name lookup. A missing device is an error, never a silent fallback
/// to the default.
fn find_device(host: &cpal::Host, id: &str) -> Result<Device, AudioError> {
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::EnumerationFailed(e.to_string()))?;
    for device in devices {
        if device.name().map(|name| name == id).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Pick a capture configuration: native 16 kHz when the device offers it,
/// otherwise the default config reduced by an integer ratio.
fn select_capture_config(
    device: &Device,
    target_rate: u32,
) -> Result<(StreamConfig, SampleFormat, usize), AudioError> {
    if let Ok(mut ranges) = device.supported_input_configs() {
        if let Some(supported) =
            ranges.find_map(|range| range.try_with_sample_rate(SampleRate(target_rate)))
        {
            let format = supported.sample_format();
            return Ok((supported.into(), format, 1));
        }
    }

    let default = device
        .default_input_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;
    let rate = default.sample_rate().0;
    if rate == 0 || rate % target_rate != 0 {
        return Err(AudioError::UnsupportedSampleRate(rate));
    }
    let format = default.sample_format();
    let ratio = (rate / target_rate) as usize;
    Ok((default.into(), format, ratio))
}

fn build_capture_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    ratio: usize,
    frame_config: &FrameConfig,
    frames: FrameSender,
    dropped: Arc<AtomicU64>,
) -> Result<Stream, AudioError> {
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    match sample_format {
        SampleFormat::I16 => {
            build_stream_typed::<i16>(device, config, ratio, frame_config, frames, dropped, err_fn)
        }
        SampleFormat::U16 => {
            build_stream_typed::<u16>(device, config, ratio, frame_config, frames, dropped, err_fn)
        }
        SampleFormat::F32 => {
            build_stream_typed::<f32>(device, config, ratio, frame_config, frames, dropped, err_fn)
        }
        _ => Err(AudioError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    ratio: usize,
    frame_config: &FrameConfig,
    frames: FrameSender,
    dropped: Arc<AtomicU64>,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let mut downsampler = Downsampler::new(ratio);
    let mut frame_buffer = FrameBuffer::new(frame_config.samples_per_frame());

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for group in data.chunks(channels) {
                    // First channel only; the server wants mono
                    let sample: f32 = cpal::Sample::from_sample(group[0]);
                    if let Some(sample) = downsampler.push(sample) {
                        if let Some(frame) = frame_buffer.push_sample(sample) {
                            deliver_frame(frame, &frames, &dropped);
                        }
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Frames must keep flowing at the hardware cadence; a full channel means
/// the consumer lost this frame, not that the callback waits.
fn deliver_frame(frame: AudioFrame, frames: &FrameSender, dropped: &Arc<AtomicU64>) {
    if frames.try_send(frame).is_err() {
        let count = dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 20 == 1 {
            log::warn!("Frame channel full, dropping frames ({} dropped so far)", count);
        }
    }
}

/// Integer-ratio averaging downsampler that carries partial groups across
/// callback boundaries.
#[derive(Debug)]
struct Downsampler {
    ratio: usize,
    sum: f32,
    count: usize,
}

impl Downsampler {
    fn new(ratio: usize) -> Self {
        Self {
            ratio: ratio.max(1),
            sum: 0.0,
            count: 0,
        }
    }

    /// Feed one sample at the device rate; yields one averaged sample at the
    /// target rate every `ratio` inputs.
    fn push(&mut self, sample: f32) -> Option<f32> {
        if self.ratio == 1 {
            return Some(sample);
        }
        self.sum += sample;
        self.count += 1;
        if self.count == self.ratio {
            let average = self.sum / self.ratio as f32;
            self.sum = 0.0;
            self.count = 0;
            Some(average)
        } else {
            None
        }
    }
}
