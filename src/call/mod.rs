//! Call orchestration
//!
//! Drives the transport and capture encoder from the call lifecycle, feeds
//! inbound audio to the playback scheduler, and derives what the call
//! surface shows (status, elapsed time, active speaker, transcript).

pub mod session;
pub mod speaker;
pub mod transcript;

pub use session::{
    format_elapsed, CallComponents, CallConfig, CallCounters, CallHandle, CallPhase, CallSnapshot,
    VoiceCall,
};
pub use speaker::{Speaker, SpeakerTracker};
pub use transcript::{
    JsonLinesSink, TracingSink, Transcript, TranscriptEntry, TranscriptRole, TranscriptSink,
};
