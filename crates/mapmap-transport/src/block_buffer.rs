//! Bounded, time-ordered frame buffers
//!
//! Every stream of the open media owns one [`BlockBuffer`]. The decode stage
//! appends frames ahead of the playback clock, the render stage reads the frame
//! containing the clock position, and the seek algorithm clears and refills the
//! buffers around a new target.

use crate::frame::{MediaFrame, StreamType};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::warn;

/// Frames surrounding a position inside a [`BlockBuffer`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Neighbors<'a> {
    /// Frame immediately before the position (or before the containing frame)
    pub previous: Option<&'a MediaFrame>,
    /// Frame immediately after the position (or after the containing frame)
    pub next: Option<&'a MediaFrame>,
    /// Frame containing the position
    pub current: Option<&'a MediaFrame>,
}

/// Ring of decoded frames for one stream, ordered by start time
#[derive(Debug, Clone)]
pub struct BlockBuffer {
    stream: StreamType,
    capacity: usize,
    frames: VecDeque<MediaFrame>,
}

impl BlockBuffer {
    pub fn new(stream: StreamType, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            stream,
            capacity,
            frames: VecDeque::with_capacity(capacity),
        }
    }

    pub fn stream(&self) -> StreamType {
        self.stream
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    /// Frames in start-time order
    pub fn frames(&self) -> impl Iterator<Item = &MediaFrame> {
        self.frames.iter()
    }

    /// Start time of the oldest frame, zero when empty
    pub fn range_start_time(&self) -> Duration {
        self.frames
            .front()
            .map(|f| f.start_time)
            .unwrap_or(Duration::ZERO)
    }

    /// End time of the newest frame, zero when empty
    pub fn range_end_time(&self) -> Duration {
        self.frames
            .back()
            .map(|f| f.end_time())
            .unwrap_or(Duration::ZERO)
    }

    /// True when `position` lies within `[range_start, range_end]`
    pub fn is_in_range(&self, position: Duration) -> bool {
        !self.frames.is_empty()
            && position >= self.range_start_time()
            && position <= self.range_end_time()
    }

    /// True when at least two frames are buffered and all share one duration
    pub fn is_monotonic(&self) -> bool {
        if self.frames.len() < 2 {
            return false;
        }

        let first = self.frames[0].duration;
        !first.is_zero() && self.frames.iter().all(|f| f.duration == first)
    }

    /// The common frame duration of a monotonic buffer, zero otherwise
    pub fn monotonic_duration(&self) -> Duration {
        if self.is_monotonic() {
            self.frames[0].duration
        } else {
            Duration::ZERO
        }
    }

    /// Insert a frame in start-time order.
    ///
    /// A full buffer drops its oldest frame first. A frame starting at the same
    /// time as a buffered one replaces it.
    pub fn add(&mut self, frame: MediaFrame) {
        if frame.stream != self.stream {
            warn!(
                "Dropping {} frame routed to {} buffer",
                frame.stream, self.stream
            );
            return;
        }

        if let Ok(index) = self
            .frames
            .binary_search_by_key(&frame.start_time, |f| f.start_time)
        {
            self.frames[index] = frame;
            return;
        }

        if self.is_full() {
            self.frames.pop_front();
        }

        let index = self
            .frames
            .partition_point(|f| f.start_time < frame.start_time);
        self.frames.insert(index, frame);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Look up the frames around `position`.
    ///
    /// When a frame contains the position, `previous` and `next` are the frames
    /// adjacent to it. Otherwise they are the closest frames on either side.
    pub fn neighbors(&self, position: Duration) -> Neighbors<'_> {
        let after = self.frames.partition_point(|f| f.start_time <= position);

        let containing = after
            .checked_sub(1)
            .filter(|&i| self.frames[i].contains(position));

        match containing {
            Some(index) => Neighbors {
                previous: index.checked_sub(1).and_then(|i| self.frames.get(i)),
                next: self.frames.get(index + 1),
                current: self.frames.get(index),
            },
            None => Neighbors {
                previous: after.checked_sub(1).and_then(|i| self.frames.get(i)),
                next: self.frames.get(after),
                current: None,
            },
        }
    }
}

/// The set of block buffers for every stream of the open media
#[derive(Debug, Clone)]
pub struct BlockBuffers {
    main: StreamType,
    buffers: BTreeMap<StreamType, BlockBuffer>,
}

impl BlockBuffers {
    /// Create one buffer per `(stream, capacity)` entry.
    ///
    /// The main stream always gets a buffer, even when it is not listed.
    pub fn new(main: StreamType, streams: impl IntoIterator<Item = (StreamType, usize)>) -> Self {
        let mut buffers: BTreeMap<StreamType, BlockBuffer> = streams
            .into_iter()
            .map(|(stream, capacity)| (stream, BlockBuffer::new(stream, capacity)))
            .collect();
        buffers
            .entry(main)
            .or_insert_with(|| BlockBuffer::new(main, 1));

        Self { main, buffers }
    }

    pub fn main_stream(&self) -> StreamType {
        self.main
    }

    pub fn main(&self) -> &BlockBuffer {
        &self.buffers[&self.main]
    }

    pub fn get(&self, stream: StreamType) -> Option<&BlockBuffer> {
        self.buffers.get(&stream)
    }

    pub fn get_mut(&mut self, stream: StreamType) -> Option<&mut BlockBuffer> {
        self.buffers.get_mut(&stream)
    }

    /// Streams with a buffer, in refill order
    pub fn streams(&self) -> Vec<StreamType> {
        self.buffers.keys().copied().collect()
    }

    /// Route a frame into its stream's buffer. Returns false if the stream has
    /// no buffer.
    pub fn add(&mut self, frame: MediaFrame) -> bool {
        match self.buffers.get_mut(&frame.stream) {
            Some(buffer) => {
                buffer.add(frame);
                true
            }
            None => false,
        }
    }
}
