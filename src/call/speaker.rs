use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Who is currently audible in the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Ai,
    User,
}

/// Debounced active-speaker indicator
///
/// Becoming `Ai`, or becoming anything from cleared, shows immediately.
/// Leaving `Ai` and clearing wait for the debounce delay so the indicator
/// does not flicker between chunk boundaries.
#[derive(Debug, Clone)]
pub struct SpeakerTracker {
    debounce: Duration,
    current: Option<Speaker>,
    pending: Option<(Option<Speaker>, Instant)>,
}

impl SpeakerTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            current: None,
            pending: None,
        }
    }

    pub fn current(&self) -> Option<Speaker> {
        self.current
    }

    /// When a pending change will apply, if one is waiting
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, at)| at)
    }

    /// Clear immediately and drop any pending change
    pub fn clear(&mut self) {
        self.current = None;
        self.pending = None;
    }

    /// Re-derive the indicator from the pipeline state at `now`
    pub fn update(&mut self, playing: bool, capturing: bool, muted: bool, now: Instant) -> Option<Speaker> {
        let target = if playing {
            Some(Speaker::Ai)
        } else if capturing && !muted {
            Some(Speaker::User)
        } else {
            None
        };

        if target == self.current {
            self.pending = None;
            return self.current;
        }

        if target == Some(Speaker::Ai) || self.current.is_none() || self.debounce.is_zero() {
            self.current = target;
            self.pending = None;
            return self.current;
        }

        let deadline = match self.pending {
            Some((_, deadline)) => deadline,
            None => now + self.debounce,
        };

        if now >= deadline {
            self.current = target;
            self.pending = None;
        } else {
            self.pending = Some((target, deadline));
        }
        self.current
    }
}
