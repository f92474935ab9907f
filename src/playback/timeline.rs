use super::output::UnitId;

#[derive(Debug, Clone)]
struct TimelineUnit {
    id: UnitId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl TimelineUnit {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sample-accurate mono mix of units placed at absolute frame positions
///
/// Runs at the rate units arrive in, so a unit's start and length are exact
/// frame counts and back-to-back units tile without rounding. The device
/// renders from here; the frame counter doubles as the output clock.
#[derive(Debug, Clone)]
pub struct Timeline {
    sample_rate: u32,
    frames_rendered: u64,
    units: Vec<TimelineUnit>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames_rendered: 0,
            units: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds of audio rendered so far
    pub fn clock(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Place mono samples (at the timeline rate) to start at `start_at` seconds
    pub fn insert(&mut self, id: UnitId, samples: Vec<f32>, start_at: f64) {
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        // A start time already in the past plays from now rather than being cut
        let start_frame = start_frame.max(self.frames_rendered);
        self.units.push(TimelineUnit {
            id,
            start_frame,
            samples,
        });
    }

    /// Drop a unit whether or not it has started
    pub fn remove(&mut self, id: UnitId) -> bool {
        let before = self.units.len();
        self.units.retain(|u| u.id != id);
        self.units.len() != before
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Fill `out` with the next frames and return the ids of units that ended in it
    pub fn render(&mut self, out: &mut [f32]) -> Vec<UnitId> {
        let mut finished = Vec::new();
        self.render_into(out, &mut finished);
        finished
    }

    /// Like `render`, appending finished ids to `finished`
    pub fn render_into(&mut self, out: &mut [f32], finished: &mut Vec<UnitId>) {
        let frames = out.len();
        out.iter_mut().for_each(|s| *s = 0.0);

        let window_start = self.frames_rendered;
        let window_end = window_start + frames as u64;

        for unit in &self.units {
            let from = unit.start_frame.max(window_start);
            let to = unit.end_frame().min(window_end);
            if from >= to {
                continue;
            }

            let src = &unit.samples[(from - unit.start_frame) as usize..(to - unit.start_frame) as usize];
            let dst = &mut out[(from - window_start) as usize..(to - window_start) as usize];
            for (slot, sample) in dst.iter_mut().zip(src) {
                *slot += sample;
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        self.frames_rendered = window_end;

        self.units.retain(|unit| {
            if unit.end_frame() <= window_end {
                finished.push(unit.id);
                false
            } else {
                true
            }
        });
    }
}
