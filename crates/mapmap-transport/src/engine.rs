//! Shared engine context
//!
//! [`MediaEngine`] bundles everything the command manager, the seek worker and
//! the pipeline stages share: the container, the block buffers, the clock, the
//! availability gate, the worker pipeline and the engine status flags.
//!
//! Lock order: container before buffers. The render stage only ever takes the
//! buffers lock.

use crate::block_buffer::BlockBuffers;
use crate::clock::PlaybackClock;
use crate::config::TransportConfig;
use crate::container::MediaContainer;
use crate::frame::StreamType;
use crate::gate::AvailabilityGate;
use crate::workers::WorkerPipeline;
use crate::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Playback status as seen by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stop,
    Play,
    Pause,
    /// The clock is driven by a transport command rather than by playback
    Manual,
}

/// Notifications sent to engine observers
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    SeekingStarted,
    SeekingEnded { position: Duration, success: bool },
}

#[derive(Debug)]
struct EngineStatus {
    is_open: bool,
    is_disposing: bool,
    playback: PlaybackStatus,
    has_media_ended: bool,
}

/// Shared state of an open media engine
pub struct MediaEngine {
    config: TransportConfig,
    main_stream: StreamType,
    container: Mutex<Box<dyn MediaContainer>>,
    buffers: Mutex<BlockBuffers>,
    clock: PlaybackClock,
    gate: AvailabilityGate,
    workers: WorkerPipeline,
    status: RwLock<EngineStatus>,
    /// Last position handed to the renderer, per stream
    render_cache: Mutex<HashMap<StreamType, Duration>>,
    observers: Mutex<Vec<Sender<TransportEvent>>>,
}

impl MediaEngine {
    /// Open an engine over `container`, creating one block buffer per stream
    pub fn open(container: Box<dyn MediaContainer>, config: TransportConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let main_stream = container.main_stream();
        let streams = container.streams();
        let buffers = BlockBuffers::new(
            main_stream,
            streams
                .iter()
                .map(|&stream| (stream, config.capacity_for(stream))),
        );

        info!(
            "Opened media engine: main stream {}, streams {:?}",
            main_stream, streams
        );

        Ok(Arc::new(Self {
            config,
            main_stream,
            container: Mutex::new(container),
            buffers: Mutex::new(buffers),
            clock: PlaybackClock::new(),
            gate: AvailabilityGate::new(),
            workers: WorkerPipeline::new(),
            status: RwLock::new(EngineStatus {
                is_open: true,
                is_disposing: false,
                playback: PlaybackStatus::Pause,
                has_media_ended: false,
            }),
            render_cache: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn main_stream(&self) -> StreamType {
        self.main_stream
    }

    /// Lock the container. Take this before [`MediaEngine::buffers`] when both
    /// are needed.
    pub fn container(&self) -> MutexGuard<'_, Box<dyn MediaContainer>> {
        self.container.lock()
    }

    pub fn buffers(&self) -> MutexGuard<'_, BlockBuffers> {
        self.buffers.lock()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn gate(&self) -> &AvailabilityGate {
        &self.gate
    }

    pub fn workers(&self) -> &WorkerPipeline {
        &self.workers
    }

    pub fn is_open(&self) -> bool {
        self.status.read().is_open
    }

    pub fn is_disposing(&self) -> bool {
        self.status.read().is_disposing
    }

    /// Mark the media closed; further commands are rejected
    pub fn close(&self) {
        self.status.write().is_open = false;
        info!("Media engine closed");
    }

    pub(crate) fn begin_dispose(&self) {
        let mut status = self.status.write();
        status.is_disposing = true;
        status.is_open = false;
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.status.read().playback
    }

    pub fn set_playback_status(&self, playback: PlaybackStatus) {
        self.status.write().playback = playback;
    }

    pub fn has_media_ended(&self) -> bool {
        self.status.read().has_media_ended
    }

    pub fn set_media_ended(&self, ended: bool) {
        self.status.write().has_media_ended = ended;
    }

    /// Remember the position last presented for `stream`
    pub fn record_render(&self, stream: StreamType, position: Duration) {
        self.render_cache.lock().insert(stream, position);
    }

    pub fn last_rendered(&self, stream: StreamType) -> Option<Duration> {
        self.render_cache.lock().get(&stream).copied()
    }

    /// Forget the cached render output of `stream` so the renderer redraws
    pub fn invalidate_render(&self, stream: StreamType) {
        self.render_cache.lock().remove(&stream);
    }

    /// Register an observer for transport events
    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        let (tx, rx) = unbounded();
        self.observers.lock().push(tx);
        rx
    }

    pub(crate) fn notify(&self, event: TransportEvent) {
        let mut observers = self.observers.lock();
        observers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!("Transport event {:?} ({} observers)", event, observers.len());
    }
}
