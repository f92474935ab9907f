use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Raw capture data as delivered by a device callback
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Floating samples in [-1, 1], interleaved
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Processing the platform audio stack is asked to apply to the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputProcessing {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for InputProcessing {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Rate the encoder will resample to (hint for backends that can open at it)
    pub target_sample_rate: u32,
    /// Buffer size in milliseconds (affects latency and file pacing)
    pub buffer_duration_ms: u64,
    /// Requested input processing
    pub processing: InputProcessing,
    /// Deliver file frames in real time instead of as fast as possible
    pub realtime: bool,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            buffer_duration_ms: 100,
            processing: InputProcessing::default(),
            realtime: true,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device
/// - File: replay a WAV file (tests, demos, headless runs)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire the device and start capturing
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Creates a fresh backend for each recording session
pub type BackendOpener = Arc<dyn Fn() -> Result<Box<dyn AudioBackend>> + Send + Sync>;

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default microphone input
    Microphone,
    /// WAV file input
    File(PathBuf),
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend for the given source
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                let backend = super::microphone::MicrophoneBackend::new(config)?;
                Ok(Box::new(backend))
            }
            AudioSource::File(path) => {
                let backend = super::file::FileBackend::new(path, config);
                Ok(Box::new(backend))
            }
        }
    }

    /// Opener that builds a new backend per session
    pub fn opener(source: AudioSource, config: AudioBackendConfig) -> BackendOpener {
        Arc::new(move || Self::create(source.clone(), config.clone()))
    }
}
