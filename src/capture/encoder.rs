use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::window::PcmWindow;
use crate::audio::resample::{downmix_to_mono, StreamResampler};
use crate::audio::{AudioBackend, AudioChunk, AudioFrame, BackendOpener};

/// Capture encoder settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Outbound sample rate in Hz
    pub sample_rate: u32,
    /// Samples per outbound chunk
    pub window_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            window_samples: 4096,
        }
    }
}

impl CaptureConfig {
    /// Duration of one outbound chunk
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs_f64(self.window_samples as f64 / self.sample_rate.max(1) as f64)
    }
}

struct ActiveCapture {
    backend: Box<dyn AudioBackend>,
    pipeline: JoinHandle<()>,
}

/// Turns live input into outbound PCM16 chunks at the target rate
///
/// Owns the capture device while recording. Encoded chunks are delivered on
/// the channel returned by [`CaptureEncoder::new`], in capture order.
pub struct CaptureEncoder {
    config: CaptureConfig,
    opener: BackendOpener,
    chunk_tx: mpsc::Sender<AudioChunk>,
    active: Option<ActiveCapture>,
}

impl CaptureEncoder {
    pub fn new(config: CaptureConfig, opener: BackendOpener) -> (Self, mpsc::Receiver<AudioChunk>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(64);

        (
            Self {
                config,
                opener,
                chunk_tx,
                active: None,
            },
            chunk_rx,
        )
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Acquire the input device and start producing chunks
    ///
    /// Returns false (without panicking or erroring) when the device cannot be
    /// opened or access is denied.
    pub async fn start_recording(&mut self) -> bool {
        if self.active.is_some() {
            debug!("Recording already active");
            return true;
        }

        let mut backend = match (self.opener)() {
            Ok(backend) => backend,
            Err(e) => {
                error!("Error starting recording: {:#}", e);
                return false;
            }
        };

        let frames = match backend.start().await {
            Ok(rx) => rx,
            Err(e) => {
                error!("Error starting recording on {}: {:#}", backend.name(), e);
                return false;
            }
        };

        info!(
            "Recording started via {} ({}Hz, {} samples per chunk)",
            backend.name(),
            self.config.sample_rate,
            self.config.window_samples
        );

        let pipeline = tokio::spawn(run_pipeline(
            frames,
            self.chunk_tx.clone(),
            self.config.clone(),
        ));

        self.active = Some(ActiveCapture { backend, pipeline });
        true
    }

    /// Tear down the pipeline and release the device
    ///
    /// Safe to call when not recording.
    pub async fn stop_recording(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.pipeline.abort();

        if let Err(e) = active.backend.stop().await {
            warn!("Failed to stop {} cleanly: {:#}", active.backend.name(), e);
        }

        info!("Recording stopped");
    }
}

/// Resample, window, and quantize device frames into outbound chunks
async fn run_pipeline(
    mut frames: mpsc::Receiver<AudioFrame>,
    chunk_tx: mpsc::Sender<AudioChunk>,
    config: CaptureConfig,
) {
    let mut window = PcmWindow::new(config.window_samples);
    let mut resampler: Option<StreamResampler> = None;
    let mut chunks_sent: u64 = 0;

    while let Some(frame) = frames.recv().await {
        let mono = downmix_to_mono(&frame.samples, frame.channels);

        if resampler.as_ref().map(|r| r.from_rate()) != Some(frame.sample_rate) {
            debug!(
                "Capture resampling {}Hz -> {}Hz",
                frame.sample_rate, config.sample_rate
            );
            resampler = match StreamResampler::new(frame.sample_rate, config.sample_rate) {
                Ok(r) => Some(r),
                Err(e) => {
                    error!("Capture input unusable: {:#}", e);
                    return;
                }
            };
        }

        let samples = match resampler.as_mut().map(|r| r.process(&mono)) {
            Some(Ok(samples)) => samples,
            Some(Err(e)) => {
                warn!("Dropping capture frame: {:#}", e);
                continue;
            }
            None => mono,
        };

        for full in window.push(&samples) {
            let chunk = AudioChunk::from_samples(&full);
            if chunk_tx.send(chunk).await.is_err() {
                debug!("Chunk receiver dropped, ending capture pipeline");
                return;
            }
            chunks_sent += 1;
        }
    }

    debug!(
        "Capture input ended after {} chunks ({} samples pending)",
        chunks_sent,
        window.pending()
    );
}
