use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, InputProcessing};
use crate::call::CallConfig;
use crate::capture::CaptureConfig;
use crate::playback::PlaybackConfig;
use crate::transport::{ReconnectPolicy, TransportConfig};

pub const DEFAULT_CONFIG_PATH: &str = "config/voice-call";
pub const ENV_PREFIX: &str = "VOICE_CALL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub transport: TransportSettings,
    pub capture: CaptureSettings,
    pub playback: PlaybackSettings,
    pub call: CallSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-call".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// `ws://` or `wss://` base of the voice endpoint
    pub base_url: String,
    pub enable_search: bool,
    pub enable_functions: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub inbound_buffer: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            enable_search: false,
            enable_functions: true,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 2000,
            inbound_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub window_samples: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Frame size when replaying a WAV file
    pub frame_duration_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            window_samples: 4096,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            frame_duration_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub sample_rate: u32,
    pub max_queue_chunks: usize,
    pub lookahead_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            max_queue_chunks: 10,
            lookahead_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    pub speaker_debounce_ms: u64,
    pub tick_ms: u64,
    pub mute_enabled: bool,
    /// Append the transcript here as JSON lines
    pub transcript_path: Option<PathBuf>,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            speaker_debounce_ms: 500,
            tick_ms: 50,
            mute_enabled: false,
            transcript_path: None,
        }
    }
}

impl Config {
    /// Load `path` (any extension the config crate knows, optional) layered
    /// under `VOICE_CALL__SECTION__KEY` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.transport.base_url.clone(),
            enable_search: self.transport.enable_search,
            enable_functions: self.transport.enable_functions,
            reconnect: ReconnectPolicy {
                max_attempts: self.transport.max_reconnect_attempts,
                delay: Duration::from_millis(self.transport.reconnect_delay_ms),
            },
            inbound_buffer: self.transport.inbound_buffer,
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.capture.sample_rate,
            window_samples: self.capture.window_samples,
        }
    }

    pub fn backend_config(&self, realtime: bool) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.capture.sample_rate,
            buffer_duration_ms: self.capture.frame_duration_ms,
            processing: InputProcessing {
                echo_cancellation: self.capture.echo_cancellation,
                noise_suppression: self.capture.noise_suppression,
                auto_gain_control: self.capture.auto_gain_control,
            },
            realtime,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: self.playback.sample_rate,
            max_queue_chunks: self.playback.max_queue_chunks,
            lookahead: Duration::from_millis(self.playback.lookahead_ms),
        }
    }

    pub fn call_config(&self) -> CallConfig {
        CallConfig {
            speaker_debounce: Duration::from_millis(self.call.speaker_debounce_ms),
            tick: Duration::from_millis(self.call.tick_ms.max(1)),
            mute_enabled: self.call.mute_enabled,
        }
    }
}
