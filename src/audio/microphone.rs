// Microphone capture backend built on cpal.
//
// cpal streams are not Send on every host, so the stream lives on a dedicated
// thread that owns it until stop() signals teardown. The device callback only
// converts samples and try_sends them; it never blocks.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Default-input-device capture
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    dropped_frames: Arc<AtomicU64>,
    capturing: bool,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        let processing = config.processing;
        // cpal exposes raw device input only; the flags are recorded so the
        // request is visible in logs.
        debug!(
            "Microphone processing requested: echo_cancellation={} noise_suppression={} auto_gain_control={}",
            processing.echo_cancellation, processing.noise_suppression, processing.auto_gain_control
        );

        Ok(Self {
            config,
            stop_tx: None,
            thread: None,
            dropped_frames: Arc::new(AtomicU64::new(0)),
            capturing: false,
        })
    }

    /// Frames discarded because the consumer fell behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// List available input devices
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            bail!("Already capturing");
        }

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let dropped = Arc::clone(&self.dropped_frames);

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_input_stream(frame_tx, ready_tx, stop_rx, dropped))
            .context("Failed to spawn capture thread")?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                bail!("Capture thread exited before the stream started");
            }
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        self.capturing = true;

        info!(
            "Microphone capture started (target {}Hz)",
            self.config.target_sample_rate
        );

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing {
            return Ok(());
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .context("Capture thread join task failed")?
                .map_err(|_| anyhow!("Capture thread panicked"))?;
        }

        self.capturing = false;
        info!("Microphone capture stopped");

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

fn run_input_stream(
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: std_mpsc::Receiver<()>,
    dropped: Arc<AtomicU64>,
) {
    let stream = match build_input_stream(frame_tx, dropped) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(anyhow!("Failed to start input stream: {}", e)));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Hold the stream until stop() or the backend is dropped
    let _ = stop_rx.recv();

    if let Err(e) = stream.pause() {
        debug!("Failed to pause input stream: {}", e);
    }
    drop(stream);
}

fn build_input_stream(
    frame_tx: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available (is microphone access allowed?)"))?;

    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device
        .default_input_config()
        .context("Failed to query default input config")?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let format = supported.sample_format();
    let config = supported.config();

    info!(
        "Input config: format={:?} sample_rate={}Hz channels={}",
        format, sample_rate, channels
    );

    let started = Instant::now();
    let stream = match format {
        SampleFormat::F32 => open_stream::<f32>(&device, &config, frame_tx, dropped, started, |s| s)?,
        SampleFormat::I16 => open_stream::<i16>(&device, &config, frame_tx, dropped, started, |s| {
            s as f32 / 32_768.0
        })?,
        SampleFormat::U16 => open_stream::<u16>(&device, &config, frame_tx, dropped, started, |s| {
            (s as f32 - 32_768.0) / 32_768.0
        })?,
        other => bail!("Unsupported input sample format: {:?}", other),
    };

    Ok(stream)
}

fn open_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
    started: Instant,
    convert: fn(T) -> f32,
) -> Result<cpal::Stream>
where
    T: SizedSample + Copy + Send + 'static,
{
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let frame = AudioFrame {
                    samples: data.iter().map(|&s| convert(s)).collect(),
                    sample_rate,
                    channels,
                    timestamp_ms: started.elapsed().as_millis() as u64,
                };
                if frame_tx.try_send(frame).is_err() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            |err| {
                error!("Audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| {
            warn!("Failed to build input stream: {}", e);
            anyhow!("Failed to build input stream: {}", e)
        })?;

    Ok(stream)
}
