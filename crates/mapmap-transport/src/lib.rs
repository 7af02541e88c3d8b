//! MapFlow Transport - Seek Serialization and Execution
//!
//! This crate provides the transport-control core of the playback engine:
//! - Command manager that serializes concurrent seek/step/stop requests
//! - Seek algorithm that refills the per-stream block buffers around a target
//! - Availability gate shared with the render stage
//! - Test pattern container for running the core without a real demuxer
//!
//! Only seek commands are executed here. Play/pause/stop of the decode
//! pipeline itself belongs to the engine that owns this core.

use thiserror::Error;

pub mod block_buffer;
pub mod clock;
pub mod config;
pub mod container;
pub mod engine;
pub mod frame;
pub mod gate;
pub mod logging;
pub mod manager;
pub mod operation;
mod seek;
pub mod workers;

pub use block_buffer::{BlockBuffer, BlockBuffers, Neighbors};
pub use clock::PlaybackClock;
pub use config::TransportConfig;
pub use container::{MediaContainer, SeekBehavior, TestPatternContainer, TestPatternHandle};
pub use engine::{MediaEngine, PlaybackStatus, TransportEvent};
pub use frame::{MediaFrame, StreamType};
pub use gate::AvailabilityGate;
pub use logging::LogConfig;
pub use manager::{CommandManager, CommandStats, PriorityCommand};
pub use operation::{CancelToken, SeekMode, SeekOperation, SeekTicket};
pub use workers::{PauseGuard, WorkerCycle, WorkerPipeline, WorkerStage};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Seek error: {0}")]
    SeekError(String),

    #[error("Engine is not open")]
    NotOpen,

    #[error("Engine is disposing")]
    Disposed,

    #[error("Conflicting command pending: {0}")]
    CommandPending(PriorityCommand),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
