pub mod backend;
pub mod file;
pub mod microphone;
pub mod pcm;
pub mod resample;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, BackendOpener,
    InputProcessing,
};
pub use file::{AudioFile, FileBackend};
pub use microphone::MicrophoneBackend;
pub use pcm::AudioChunk;
pub use resample::StreamResampler;
