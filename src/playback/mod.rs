//! Playback of streamed response audio
//!
//! - `queue`: bounded drop-oldest jitter queue
//! - `scheduler`: cursor-based gap-free scheduling, interrupt drain
//! - `output`: the sink abstraction the scheduler drives
//! - `timeline` / `device`: sample-accurate mixing onto a cpal output stream
//! - `virtual_output`: device-free output for headless runs

pub mod device;
pub mod output;
pub mod queue;
pub mod scheduler;
pub mod timeline;
pub mod virtual_output;

pub use device::DeviceOutput;
pub use output::{AudioOutput, OutputOpener, PlaybackUnit, UnitId};
pub use queue::PlaybackQueue;
pub use scheduler::{PlaybackConfig, PlaybackScheduler, PlaybackStats, ScheduledSpan};
pub use timeline::Timeline;
pub use virtual_output::{UnitRecord, VirtualClock, VirtualOutput};
