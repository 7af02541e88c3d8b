//! Pause/resume handshake for the pipeline stage workers
//!
//! Stage workers (read, decode, convert, render) wrap each iteration of their
//! loop in [`WorkerPipeline::begin_cycle`]. A seek pauses the stages that touch
//! the container and buffers with [`WorkerPipeline::pause`], which waits until
//! none of them is mid-cycle. The returned [`PauseGuard`] resumes them when it
//! goes out of scope, whatever path the seek leaves by.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Pipeline stage served by a worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerStage {
    Read,
    Decode,
    Convert,
    Render,
}

impl WorkerStage {
    /// Stages that mutate the container or the block buffers
    pub const DECODING: [WorkerStage; 3] =
        [WorkerStage::Read, WorkerStage::Decode, WorkerStage::Convert];
}

impl fmt::Display for WorkerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerStage::Read => "read",
            WorkerStage::Decode => "decode",
            WorkerStage::Convert => "convert",
            WorkerStage::Render => "render",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct StageState {
    /// Outstanding pause requests
    pause_depth: u32,
    /// Cycles currently running
    active_cycles: u32,
}

/// Coordinates pausing of the stage workers
#[derive(Debug, Default)]
pub struct WorkerPipeline {
    stages: Mutex<HashMap<WorkerStage, StageState>>,
    changed: Condvar,
}

impl WorkerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter one worker cycle, blocking while the stage is paused
    pub fn begin_cycle(&self, stage: WorkerStage) -> WorkerCycle<'_> {
        let mut stages = self.stages.lock();
        while stages.get(&stage).is_some_and(|s| s.pause_depth > 0) {
            self.changed.wait(&mut stages);
        }
        stages.entry(stage).or_default().active_cycles += 1;

        WorkerCycle {
            pipeline: self,
            stage,
        }
    }

    /// Pause `stages` and wait until none of them is mid-cycle
    pub fn pause(&self, stages: &[WorkerStage]) -> PauseGuard<'_> {
        let mut state = self.stages.lock();
        for stage in stages {
            state.entry(*stage).or_default().pause_depth += 1;
        }

        while stages
            .iter()
            .any(|stage| state.get(stage).is_some_and(|s| s.active_cycles > 0))
        {
            self.changed.wait(&mut state);
        }
        debug!("Paused worker stages {:?}", stages);

        PauseGuard {
            pipeline: self,
            stages: stages.to_vec(),
        }
    }

    pub fn is_paused(&self, stage: WorkerStage) -> bool {
        self.stages
            .lock()
            .get(&stage)
            .is_some_and(|s| s.pause_depth > 0)
    }
}

/// An active worker cycle; ends when dropped
#[must_use = "the cycle ends when the guard is dropped"]
pub struct WorkerCycle<'a> {
    pipeline: &'a WorkerPipeline,
    stage: WorkerStage,
}

impl Drop for WorkerCycle<'_> {
    fn drop(&mut self) {
        let mut stages = self.pipeline.stages.lock();
        if let Some(state) = stages.get_mut(&self.stage) {
            state.active_cycles = state.active_cycles.saturating_sub(1);
        }
        self.pipeline.changed.notify_all();
    }
}

/// Paused stages; resumed when dropped
#[must_use = "the stages resume when the guard is dropped"]
pub struct PauseGuard<'a> {
    pipeline: &'a WorkerPipeline,
    stages: Vec<WorkerStage>,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        let mut stages = self.pipeline.stages.lock();
        for stage in &self.stages {
            if let Some(state) = stages.get_mut(stage) {
                state.pause_depth = state.pause_depth.saturating_sub(1);
            }
        }
        self.pipeline.changed.notify_all();
        debug!("Resumed worker stages {:?}", self.stages);
    }
}
