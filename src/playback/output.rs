use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies one scheduled playback unit
pub type UnitId = u64;

/// A decoded chunk ready to be placed on the output clock
#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    pub id: UnitId,
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Output-clock time (seconds) at which the first sample plays
    pub start_at: f64,
}

impl PlaybackUnit {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }
}

/// Audio output sink with a sample clock
///
/// Implementations report each unit that plays to completion by sending its
/// id on the channel they were opened with. Halted units are not reported.
pub trait AudioOutput: Send {
    /// Current output clock in seconds
    fn current_time(&self) -> f64;

    /// Schedule a unit to start at `unit.start_at`
    fn schedule(&mut self, unit: PlaybackUnit) -> Result<()>;

    /// Stop and release a unit, started or not
    fn halt(&mut self, id: UnitId) -> Result<()>;

    fn name(&self) -> &str;
}

/// Opens an output for one call session; completions go to the sender
pub type OutputOpener =
    Arc<dyn Fn(mpsc::UnboundedSender<UnitId>) -> Result<Box<dyn AudioOutput>> + Send + Sync>;
