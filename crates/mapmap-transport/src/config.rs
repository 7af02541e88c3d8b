//! Transport configuration

use crate::frame::StreamType;
use crate::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Tuning for the block buffers and the seek worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Frames kept in the video buffer
    pub video_buffer_capacity: usize,
    /// Chunks kept in the audio buffer
    pub audio_buffer_capacity: usize,
    /// Cues kept in the subtitle buffer
    pub subtitle_buffer_capacity: usize,
    /// Seek ahead of the target so it lands mid-buffer after the refill
    pub skew_seek_target: bool,
    /// Upper bound on packet reads while aligning the main buffer to a target
    pub max_alignment_reads: usize,
    /// How long the seek worker sleeps before re-checking its mailbox
    pub worker_idle_timeout_ms: u64,
    /// How long the render stage waits on a closed availability gate
    pub gate_wait_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            video_buffer_capacity: 12,
            audio_buffer_capacity: 48,
            subtitle_buffer_capacity: 8,
            skew_seek_target: true,
            max_alignment_reads: 4096,
            worker_idle_timeout_ms: 250,
            gate_wait_timeout_ms: 100,
        }
    }
}

impl TransportConfig {
    /// Load a JSON config file. Missing fields take their default value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for stream in StreamType::ALL {
            if self.capacity_for(stream) == 0 {
                return Err(TransportError::Config(format!(
                    "{} buffer capacity must be at least 1",
                    stream
                )));
            }
        }
        if self.worker_idle_timeout_ms == 0 {
            return Err(TransportError::Config(
                "worker idle timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Buffer capacity for a stream type
    pub fn capacity_for(&self, stream: StreamType) -> usize {
        match stream {
            StreamType::Video => self.video_buffer_capacity,
            StreamType::Audio => self.audio_buffer_capacity,
            StreamType::Subtitle => self.subtitle_buffer_capacity,
        }
    }

    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_idle_timeout_ms)
    }

    pub fn gate_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_wait_timeout_ms)
    }
}
