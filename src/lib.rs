pub mod audio;
pub mod call;
pub mod capture;
pub mod config;
pub mod http;
pub mod playback;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioChunk, AudioFile, AudioFrame,
    AudioSource, BackendOpener,
};
pub use call::{
    CallComponents, CallConfig, CallHandle, CallPhase, CallSnapshot, Speaker, TranscriptEntry,
    TranscriptSink, VoiceCall,
};
pub use capture::{CaptureConfig, CaptureEncoder};
pub use config::Config;
pub use http::{create_router, AppState};
pub use playback::{AudioOutput, OutputOpener, PlaybackConfig, PlaybackScheduler};
pub use transport::{
    ClientMessage, ConnectionState, Connector, ControlMessage, Transport, TransportConfig,
    TungsteniteConnector,
};
