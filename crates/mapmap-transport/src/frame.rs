//! Decoded frame descriptors and stream identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stream (component) type carried by a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamType {
    Video,
    Audio,
    Subtitle,
}

impl StreamType {
    /// All stream types in refill order
    pub const ALL: [StreamType; 3] = [StreamType::Video, StreamType::Audio, StreamType::Subtitle];
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamType::Video => "video",
            StreamType::Audio => "audio",
            StreamType::Subtitle => "subtitle",
        };
        f.write_str(name)
    }
}

/// A decoded block of media: a video frame, an audio chunk or a subtitle cue
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFrame {
    pub stream: StreamType,
    /// Presentation time of the first sample
    pub start_time: Duration,
    pub duration: Duration,
    /// Decoded payload (pixels, samples or text)
    pub data: Vec<u8>,
}

impl MediaFrame {
    /// Create a frame without payload
    pub fn new(stream: StreamType, start_time: Duration, duration: Duration) -> Self {
        Self {
            stream,
            start_time,
            duration,
            data: Vec::new(),
        }
    }

    pub fn end_time(&self) -> Duration {
        self.start_time.saturating_add(self.duration)
    }

    /// True when `position` falls inside `[start, end)`
    pub fn contains(&self, position: Duration) -> bool {
        position >= self.start_time && position < self.end_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_contains_is_half_open() {
        let frame = MediaFrame::new(
            StreamType::Video,
            Duration::from_secs(2),
            Duration::from_secs(1),
        );

        assert!(frame.contains(Duration::from_secs(2)));
        assert!(frame.contains(Duration::from_millis(2999)));
        assert!(!frame.contains(Duration::from_secs(3)));
        assert_eq!(frame.end_time(), Duration::from_secs(3));
    }

    #[test]
    fn test_stream_type_display() {
        assert_eq!(StreamType::Video.to_string(), "video");
        assert_eq!(StreamType::Subtitle.to_string(), "subtitle");
    }
}
