//! Container abstraction and a synthetic test pattern container
//!
//! The container demuxes packets and decodes them into frames. The seek worker
//! drives it while the read and decode stages are paused, so implementations
//! only need `Send`, not `Sync`.

use crate::frame::{MediaFrame, StreamType};
use crate::{Result, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Demuxer/decoder consumed by the seek algorithm
pub trait MediaContainer: Send {
    /// Streams present in the media
    fn streams(&self) -> Vec<StreamType>;

    /// The stream whose buffer governs seek completion and clock alignment
    fn main_stream(&self) -> StreamType;

    /// Seek to `target` and decode the first frame of the main stream.
    ///
    /// Returns `Ok(None)` when nothing can be decoded at the target, e.g. past
    /// the end of the media.
    fn seek(&mut self, target: Duration) -> Result<Option<MediaFrame>>;

    /// Read the next packet and return the stream it belongs to, or `None` at
    /// the end of the media
    fn read(&mut self) -> Result<Option<StreamType>>;

    /// Decode the next frame of `stream`, reading packets as needed
    fn receive_next_frame(&mut self, stream: StreamType) -> Result<Option<MediaFrame>>;

    /// Drop packets that were read but not decoded yet
    fn clear_queued_packets(&mut self, flush_buffers: bool);

    fn is_at_end_of_stream(&self) -> bool;
}

/// How [`TestPatternContainer::seek`] responds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekBehavior {
    /// Seek and decode normally
    #[default]
    Normal,
    /// Report that no frame could be decoded
    NoFrame,
    /// Fail with a container error
    Fail,
}

#[derive(Debug, Default)]
struct HandleState {
    seek_targets: Vec<Duration>,
    behavior: SeekBehavior,
}

/// Shared view into a [`TestPatternContainer`] that stays usable after the
/// container has been moved into an engine
#[derive(Debug, Clone, Default)]
pub struct TestPatternHandle {
    state: Arc<Mutex<HandleState>>,
}

impl TestPatternHandle {
    /// Targets passed to `seek`, in call order
    pub fn seek_targets(&self) -> Vec<Duration> {
        self.state.lock().seek_targets.clone()
    }

    pub fn seek_count(&self) -> usize {
        self.state.lock().seek_targets.len()
    }

    pub fn set_seek_behavior(&self, behavior: SeekBehavior) {
        self.state.lock().behavior = behavior;
    }

    fn record_seek(&self, target: Duration) -> SeekBehavior {
        let mut state = self.state.lock();
        state.seek_targets.push(target);
        state.behavior
    }
}

#[derive(Debug)]
struct PatternStream {
    stream: StreamType,
    frame_duration: Duration,
    /// Start time of the next packet to read
    next_packet: Duration,
    /// Start times of packets read but not decoded
    queued: VecDeque<Duration>,
}

/// Synthetic container with constant-duration frames on every stream.
///
/// Seeks land on the closest keyframe at or before the target, so a keyframe
/// interval longer than the buffer window forces packet-level alignment after
/// the refill.
#[derive(Debug)]
pub struct TestPatternContainer {
    duration: Duration,
    keyframe_interval: Option<Duration>,
    streams: Vec<PatternStream>,
    at_end: bool,
    handle: TestPatternHandle,
}

impl TestPatternContainer {
    /// Create a container of the given length without streams
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            keyframe_interval: None,
            streams: Vec::new(),
            at_end: false,
            handle: TestPatternHandle::default(),
        }
    }

    /// Add a stream producing frames of `frame_duration`
    pub fn with_stream(mut self, stream: StreamType, frame_duration: Duration) -> Self {
        let frame_duration = frame_duration.max(Duration::from_millis(1));
        self.streams.retain(|s| s.stream != stream);
        self.streams.push(PatternStream {
            stream,
            frame_duration,
            next_packet: Duration::ZERO,
            queued: VecDeque::new(),
        });
        self
    }

    pub fn with_keyframe_interval(mut self, interval: Duration) -> Self {
        self.keyframe_interval = Some(interval).filter(|i| !i.is_zero());
        self
    }

    pub fn handle(&self) -> TestPatternHandle {
        self.handle.clone()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn stream_index(&self, stream: StreamType) -> Result<usize> {
        self.streams
            .iter()
            .position(|s| s.stream == stream)
            .ok_or_else(|| TransportError::ContainerError(format!("no {} stream", stream)))
    }
}

fn align_down(position: Duration, step: Duration) -> Duration {
    let step_nanos = step.as_nanos().max(1);
    let aligned = position.as_nanos() / step_nanos * step_nanos;
    Duration::from_nanos(u64::try_from(aligned).unwrap_or(u64::MAX))
}

impl MediaContainer for TestPatternContainer {
    fn streams(&self) -> Vec<StreamType> {
        self.streams.iter().map(|s| s.stream).collect()
    }

    fn main_stream(&self) -> StreamType {
        if self.streams.iter().any(|s| s.stream == StreamType::Video) {
            StreamType::Video
        } else {
            self.streams
                .first()
                .map(|s| s.stream)
                .unwrap_or(StreamType::Video)
        }
    }

    fn seek(&mut self, target: Duration) -> Result<Option<MediaFrame>> {
        match self.handle.record_seek(target) {
            SeekBehavior::Normal => {}
            SeekBehavior::NoFrame => {
                self.at_end = true;
                return Ok(None);
            }
            SeekBehavior::Fail => {
                return Err(TransportError::SeekError(format!(
                    "test pattern refused seek to {:?}",
                    target
                )));
            }
        }

        if target >= self.duration {
            debug!("Seek target {:?} is past the end of the media", target);
            for stream in &mut self.streams {
                stream.next_packet = self.duration;
                stream.queued.clear();
            }
            self.at_end = true;
            return Ok(None);
        }

        let keyframe = match self.keyframe_interval {
            Some(interval) => align_down(target, interval),
            None => target,
        };
        for stream in &mut self.streams {
            stream.next_packet = align_down(keyframe, stream.frame_duration);
            stream.queued.clear();
        }
        self.at_end = false;

        let main = self.main_stream();
        self.receive_next_frame(main)
    }

    fn read(&mut self) -> Result<Option<StreamType>> {
        let duration = self.duration;
        let next = self
            .streams
            .iter_mut()
            .filter(|s| s.next_packet < duration)
            .min_by_key(|s| s.next_packet);

        if let Some(stream) = next {
            stream.queued.push_back(stream.next_packet);
            stream.next_packet += stream.frame_duration;
            trace!("Read {} packet", stream.stream);
            return Ok(Some(stream.stream));
        }

        self.at_end = true;
        Ok(None)
    }

    fn receive_next_frame(&mut self, stream: StreamType) -> Result<Option<MediaFrame>> {
        let index = self.stream_index(stream)?;

        while self.streams[index].queued.is_empty() {
            if self.read()?.is_none() {
                return Ok(None);
            }
        }

        let pattern = &mut self.streams[index];
        let Some(start) = pattern.queued.pop_front() else {
            return Ok(None);
        };

        let mut frame = MediaFrame::new(stream, start, pattern.frame_duration);
        frame.data = start.as_millis().to_le_bytes().to_vec();
        Ok(Some(frame))
    }

    fn clear_queued_packets(&mut self, flush_buffers: bool) {
        for stream in &mut self.streams {
            stream.queued.clear();
        }
        trace!("Cleared queued packets (flush buffers: {})", flush_buffers);
    }

    fn is_at_end_of_stream(&self) -> bool {
        self.at_end
    }
}
