use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::output::{AudioOutput, PlaybackUnit, UnitId};
use super::queue::PlaybackQueue;
use crate::audio::AudioChunk;

/// Playback scheduler settings
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Rate of inbound PCM in Hz
    pub sample_rate: u32,
    /// Queue bound before oldest chunks are shed
    pub max_queue_chunks: usize,
    /// Offset added to the output clock before a unit may start
    pub lookahead: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            max_queue_chunks: 10,
            lookahead: Duration::from_millis(100),
        }
    }
}

/// Start and length of a scheduled unit on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSpan {
    pub start_at: f64,
    pub duration: f64,
}

/// Counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub chunks_enqueued: u64,
    pub chunks_scheduled: u64,
    pub chunks_dropped: u64,
    pub decode_failures: u64,
    pub schedule_failures: u64,
}

/// Gap-free scheduler for streamed PCM chunks
///
/// Chunks are decoded and placed back to back on the output clock using a
/// non-decreasing cursor: each unit starts at
/// `max(cursor, now + lookahead)` and the cursor advances by its duration.
/// All state is owned here and mutated through `&mut self`, so an enqueue
/// can never interleave with a drain in progress.
pub struct PlaybackScheduler {
    config: PlaybackConfig,
    output: Box<dyn AudioOutput>,
    queue: PlaybackQueue,
    active: BTreeMap<UnitId, ScheduledSpan>,
    next_start_time: f64,
    next_id: UnitId,
    stopped: bool,
    playing: bool,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    pub fn new(config: PlaybackConfig, output: Box<dyn AudioOutput>) -> Self {
        info!(
            "Playback scheduler on {} ({}Hz, queue {}, lookahead {}ms)",
            output.name(),
            config.sample_rate,
            config.max_queue_chunks,
            config.lookahead.as_millis()
        );

        Self {
            queue: PlaybackQueue::new(config.max_queue_chunks),
            config,
            output,
            active: BTreeMap::new(),
            next_start_time: 0.0,
            next_id: 1,
            stopped: false,
            playing: false,
            stats: PlaybackStats::default(),
        }
    }

    /// Accept an inbound chunk
    ///
    /// Clears a previous stop, sheds the oldest queued chunk on overflow, and
    /// schedules the chunk straight away when playback is already running and
    /// nothing is queued ahead of it. Otherwise it waits for
    /// [`process_queue`](Self::process_queue).
    pub fn enqueue(&mut self, chunk: AudioChunk) {
        if self.stopped {
            info!("Resuming audio playback for new response");
            self.stopped = false;
            self.next_start_time = 0.0;
        }

        self.stats.chunks_enqueued += 1;
        if self.queue.push(chunk) {
            self.stats.chunks_dropped += 1;
            warn!("Dropping audio frame to reduce latency");
        }

        if self.playing && self.queue.len() == 1 {
            if let Some(chunk) = self.queue.pop() {
                self.schedule_chunk(chunk);
            }
        }
    }

    /// Whether queued chunks are waiting for a drain
    pub fn needs_processing(&self) -> bool {
        !self.stopped && !self.queue.is_empty()
    }

    /// Decode and schedule every queued chunk in order
    pub fn process_queue(&mut self) {
        if self.stopped || self.queue.is_empty() {
            return;
        }

        while let Some(chunk) = self.queue.pop() {
            self.schedule_chunk(chunk);
            if self.stopped {
                break;
            }
        }

        self.refresh_playing();
    }

    /// Halt everything immediately (end of call or barge-in)
    ///
    /// Every scheduled unit is stopped, started or not; the queue is emptied
    /// and the cursor reset. Observable as soon as this returns.
    pub fn stop(&mut self) {
        self.stopped = true;

        let halted = self.active.len();
        for (id, _) in std::mem::take(&mut self.active) {
            if let Err(e) = self.output.halt(id) {
                debug!("Unit {} already stopped: {:#}", id, e);
            }
        }

        self.queue.clear();
        self.next_start_time = 0.0;
        self.playing = false;

        debug!("Playback stopped ({} units halted)", halted);
    }

    /// Allow a fresh turn to schedule from the current output clock
    pub fn resume(&mut self) {
        self.stopped = false;
        self.next_start_time = 0.0;
    }

    /// Completion report from the output for a unit that played out
    ///
    /// Returns true when this completion ended audible playback.
    pub fn unit_finished(&mut self, id: UnitId) -> bool {
        if self.active.remove(&id).is_none() {
            return false;
        }

        let was_playing = self.playing;
        self.refresh_playing();
        was_playing && !self.playing
    }

    /// True from the first scheduled unit until the last one completes
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_units(&self) -> usize {
        self.active.len()
    }

    /// Spans of units still scheduled, in scheduling order
    pub fn active_spans(&self) -> Vec<ScheduledSpan> {
        self.active.values().copied().collect()
    }

    /// Output-clock time at which the next unit may start
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    fn schedule_chunk(&mut self, chunk: AudioChunk) {
        let samples = match chunk.decode() {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!("Skipping undecodable audio chunk: {:#}", e);
                return;
            }
        };

        if samples.is_empty() {
            debug!("Skipping empty audio chunk");
            return;
        }

        let duration = samples.len() as f64 / self.config.sample_rate.max(1) as f64;
        let now = self.output.current_time();
        let start_at = self
            .next_start_time
            .max(now + self.config.lookahead.as_secs_f64());

        let id = self.next_id;
        self.next_id += 1;

        let unit = PlaybackUnit {
            id,
            samples,
            sample_rate: self.config.sample_rate,
            start_at,
        };

        if let Err(e) = self.output.schedule(unit) {
            self.stats.schedule_failures += 1;
            warn!("Failed to schedule audio unit {}: {:#}", id, e);
            return;
        }

        self.active.insert(id, ScheduledSpan { start_at, duration });
        self.next_start_time = start_at + duration;
        self.stats.chunks_scheduled += 1;
        self.playing = true;

        debug!(
            "Scheduled unit {} at {:.3}s for {:.3}s (clock {:.3}s)",
            id, start_at, duration, now
        );
    }

    fn refresh_playing(&mut self) {
        self.playing = !self.active.is_empty();
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if !self.active.is_empty() {
            self.stop();
        }
    }
}
