//! Shared playback clock

use parking_lot::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ClockState {
    /// Position at the moment the clock was last started or repositioned
    anchor: Duration,
    /// Set while the clock is running
    started_at: Option<Instant>,
}

/// Wall-clock driven playback position.
///
/// The render stage reads the position every frame; the seek worker pauses the
/// clock and repositions it when a seek commits.
#[derive(Debug)]
pub struct PlaybackClock {
    state: RwLock<ClockState>,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    /// Create a paused clock at position zero
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ClockState {
                anchor: Duration::ZERO,
                started_at: None,
            }),
        }
    }

    pub fn position(&self) -> Duration {
        let state = self.state.read();
        match state.started_at {
            Some(started) => state.anchor + started.elapsed(),
            None => state.anchor,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.read().started_at.is_some()
    }

    pub fn play(&self) {
        let mut state = self.state.write();
        if state.started_at.is_none() {
            state.started_at = Some(Instant::now());
        }
    }

    /// Stop advancing, keeping the current position
    pub fn pause(&self) {
        let mut state = self.state.write();
        if let Some(started) = state.started_at.take() {
            state.anchor += started.elapsed();
        }
    }

    /// Reposition the clock without changing whether it runs
    pub fn update(&self, position: Duration) {
        let mut state = self.state.write();
        state.anchor = position;
        if state.started_at.is_some() {
            state.started_at = Some(Instant::now());
        }
    }
}
