// Output that keeps time without touching a device.
//
// Used for headless runs (units "play" against the wall clock) and for
// driving the scheduler deterministically with a manual clock.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use super::output::{AudioOutput, PlaybackUnit, UnitId};

/// Record of one scheduled unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub id: UnitId,
    pub start_at: f64,
    pub duration: f64,
    pub sample_count: usize,
}

impl UnitRecord {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

#[derive(Debug, Default)]
struct VirtualState {
    now: f64,
    pending: BTreeMap<UnitId, UnitRecord>,
    history: Vec<UnitRecord>,
    halted: Vec<UnitId>,
    fail_next: bool,
}

/// Device-free [`AudioOutput`]
pub struct VirtualOutput {
    state: Arc<Mutex<VirtualState>>,
    finished_tx: mpsc::UnboundedSender<UnitId>,
}

/// Test/driver handle onto a [`VirtualOutput`]'s clock and history
#[derive(Clone)]
pub struct VirtualClock {
    state: Arc<Mutex<VirtualState>>,
    finished_tx: mpsc::UnboundedSender<UnitId>,
}

impl VirtualOutput {
    /// Output whose clock only moves through [`VirtualClock::advance`]
    pub fn manual(finished_tx: mpsc::UnboundedSender<UnitId>) -> (Self, VirtualClock) {
        let state = Arc::new(Mutex::new(VirtualState::default()));
        let clock = VirtualClock {
            state: Arc::clone(&state),
            finished_tx: finished_tx.clone(),
        };
        (Self { state, finished_tx }, clock)
    }

    /// Output whose clock follows the wall clock
    ///
    /// Must be called inside a tokio runtime. The ticker stops once the
    /// output is dropped.
    pub fn realtime(finished_tx: mpsc::UnboundedSender<UnitId>) -> Self {
        let (output, clock) = Self::manual(finished_tx);
        let weak: Weak<Mutex<VirtualState>> = Arc::downgrade(&output.state);
        drop(clock);

        let finished = output.finished_tx.clone();
        tokio::spawn(async move {
            let origin = Instant::now();
            let mut ticker = tokio::time::interval(Duration::from_millis(10));
            loop {
                ticker.tick().await;
                let Some(state) = weak.upgrade() else { break };
                let clock = VirtualClock {
                    state,
                    finished_tx: finished.clone(),
                };
                clock.advance_to(origin.elapsed().as_secs_f64());
            }
            debug!("Virtual output clock stopped");
        });

        output
    }
}

impl AudioOutput for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().map(|s| s.now).unwrap_or(0.0)
    }

    fn schedule(&mut self, unit: PlaybackUnit) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("virtual output state poisoned"))?;

        if state.fail_next {
            state.fail_next = false;
            bail!("virtual output rejected unit {}", unit.id);
        }

        let record = UnitRecord {
            id: unit.id,
            start_at: unit.start_at,
            duration: unit.duration(),
            sample_count: unit.samples.len(),
        };
        state.history.push(record.clone());
        state.pending.insert(unit.id, record);
        Ok(())
    }

    fn halt(&mut self, id: UnitId) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("virtual output state poisoned"))?;
        if state.pending.remove(&id).is_some() {
            state.halted.push(id);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "virtual output"
    }
}

impl VirtualClock {
    pub fn now(&self) -> f64 {
        self.state.lock().map(|s| s.now).unwrap_or(0.0)
    }

    /// Move the clock forward, completing every unit that has ended
    pub fn advance(&self, seconds: f64) {
        let now = self.now();
        self.advance_to(now + seconds);
    }

    pub fn advance_to(&self, time: f64) {
        let finished: Vec<UnitId> = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if time > state.now {
                state.now = time;
            }
            let now = state.now;
            let done: Vec<UnitId> = state
                .pending
                .values()
                .filter(|r| r.end_at() <= now + 1e-9)
                .map(|r| r.id)
                .collect();
            for id in &done {
                state.pending.remove(id);
            }
            done
        };

        for id in finished {
            let _ = self.finished_tx.send(id);
        }
    }

    /// Every unit ever scheduled, in scheduling order
    pub fn history(&self) -> Vec<UnitRecord> {
        self.state.lock().map(|s| s.history.clone()).unwrap_or_default()
    }

    /// Units scheduled and neither finished nor halted
    pub fn pending(&self) -> Vec<UnitRecord> {
        self.state
            .lock()
            .map(|s| s.pending.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn halted(&self) -> Vec<UnitId> {
        self.state.lock().map(|s| s.halted.clone()).unwrap_or_default()
    }

    /// Make the next schedule() call fail
    pub fn fail_next_schedule(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = true;
        }
    }
}
