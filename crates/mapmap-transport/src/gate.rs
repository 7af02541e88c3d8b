//! Seek availability gate
//!
//! The gate is closed by the seek worker before it clears the block buffers and
//! reopened as soon as the main buffer holds a frame at the seek target. The
//! render stage waits on it so it never presents frames from a half-cleared
//! buffer.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Open/closed signal shared between the seek worker and the render stage
#[derive(Debug)]
pub struct AvailabilityGate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Default for AvailabilityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityGate {
    /// Create an open gate
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            changed: Condvar::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Mark the main buffer available and wake all waiters
    pub fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.changed.notify_all();
    }

    /// Mark the main buffer unavailable
    pub fn close(&self) {
        *self.open.lock() = false;
    }

    /// Block until the gate is open
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.changed.wait(&mut open);
        }
    }

    /// Block until the gate is open or `timeout` elapses. Returns whether the
    /// gate is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock();
        while !*open {
            if self.changed.wait_until(&mut open, deadline).timed_out() {
                break;
            }
        }
        *open
    }
}
