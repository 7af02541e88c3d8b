//! Command manager
//!
//! Serializes seek, step and stop requests coming from any number of caller
//! threads. At most one seek is queued at a time: later requests overwrite the
//! queued one and share its ticket. A single `seek-worker` thread moves the
//! queued operation to executing and runs the seek algorithm outside the state
//! lock, so callers never block on container work.

use crate::engine::{MediaEngine, PlaybackStatus, TransportEvent};
use crate::operation::{CancelToken, SeekMode, SeekOperation, SeekTicket};
use crate::seek;
use crate::{Result, TransportError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Commands that take precedence over seeking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityCommand {
    Open,
    Close,
    ChangeMedia,
}

impl fmt::Display for PriorityCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriorityCommand::Open => "open",
            PriorityCommand::Close => "close",
            PriorityCommand::ChangeMedia => "change media",
        };
        f.write_str(name)
    }
}

/// Command counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStats {
    /// Calls to `request_seek`
    pub requested: u64,
    /// Requests folded into an already queued operation
    pub coalesced: u64,
    /// Requests refused by a precondition
    pub rejected: u64,
    pub operations_created: u64,
    pub executed: u64,
    /// Executions that reported failure
    pub failed: u64,
}

struct QueuedSeek {
    operation: SeekOperation,
    ticket: SeekTicket,
}

#[derive(Default)]
struct CommandState {
    is_seeking: bool,
    play_after_seek: bool,
    queued: Option<QueuedSeek>,
    executing: bool,
    pending_priority: Option<PriorityCommand>,
    active_cancel: Option<CancelToken>,
    disposed: bool,
    next_operation_id: u64,
    stats: CommandStats,
}

impl CommandState {
    /// Leave the seeking state after the last operation of a burst
    fn settle(&mut self, engine: &MediaEngine, mode: SeekMode, position: Duration, success: bool) {
        self.is_seeking = false;

        if self.play_after_seek {
            engine.clock().play();
            engine.set_playback_status(PlaybackStatus::Play);
        } else if mode == SeekMode::Stop {
            engine.set_playback_status(PlaybackStatus::Stop);
        } else {
            engine.set_playback_status(PlaybackStatus::Pause);
        }
        self.play_after_seek = false;

        engine.notify(TransportEvent::SeekingEnded { position, success });
    }

    /// Remove the queued operation; the caller drops it outside the lock
    fn take_queued(&mut self, engine: &MediaEngine) -> Option<QueuedSeek> {
        let queued = self.queued.take();

        if !self.executing && self.is_seeking {
            self.is_seeking = false;
            if self.play_after_seek && !self.disposed {
                engine.clock().play();
                engine.set_playback_status(PlaybackStatus::Play);
            } else {
                engine.set_playback_status(PlaybackStatus::Pause);
            }
            self.play_after_seek = false;
            engine.notify(TransportEvent::SeekingEnded {
                position: engine.clock().position(),
                success: false,
            });
        }
        queued
    }
}

/// Serializes transport commands for one engine
pub struct CommandManager {
    engine: Arc<MediaEngine>,
    state: Mutex<CommandState>,
    /// Held for the whole of one execution
    execution: Mutex<()>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandManager {
    pub fn new(engine: Arc<MediaEngine>) -> Arc<Self> {
        let (wake_tx, wake_rx) = bounded(1);
        Arc::new(Self {
            engine,
            state: Mutex::new(CommandState::default()),
            execution: Mutex::new(()),
            wake_tx,
            wake_rx,
            worker: Mutex::new(None),
        })
    }

    /// Spawn the seek worker thread
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("Seek worker already running");
            return Ok(());
        }
        if self.state.lock().disposed {
            return Err(TransportError::Disposed);
        }

        let manager = Arc::downgrade(self);
        let wake_rx = self.wake_rx.clone();
        let idle = self.engine.config().worker_idle_timeout();

        let handle = thread::Builder::new()
            .name("seek-worker".to_string())
            .spawn(move || run_worker(manager, wake_rx, idle))?;
        *worker = Some(handle);
        Ok(())
    }

    pub fn engine(&self) -> &Arc<MediaEngine> {
        &self.engine
    }

    /// Request a seek. The ticket resolves once the operation this request
    /// ended up in has executed, or immediately to `false` if rejected.
    pub fn request_seek(&self, position: Duration, mode: SeekMode) -> SeekTicket {
        let mut state = self.state.lock();
        state.stats.requested += 1;

        if let Err(e) = self.check_accepting(&state) {
            state.stats.rejected += 1;
            debug!("Rejected seek to {:?} ({:?}): {}", position, mode, e);
            return SeekTicket::ready(false);
        }

        let current = &mut *state;
        if let Some(queued) = current.queued.as_mut() {
            queued.operation.update(position, mode);
            current.stats.coalesced += 1;
            debug!(
                "Coalesced seek to {:?} ({:?}) into operation {}",
                position,
                mode,
                queued.operation.id()
            );
            return queued.ticket.clone();
        }

        if !state.is_seeking {
            state.is_seeking = true;
            state.play_after_seek =
                self.engine.playback_status() == PlaybackStatus::Play && mode == SeekMode::Normal;
            self.engine.clock().pause();
            self.engine.set_playback_status(PlaybackStatus::Manual);
            self.engine.notify(TransportEvent::SeekingStarted);
        }

        state.next_operation_id += 1;
        let (operation, ticket) = SeekOperation::new(state.next_operation_id, position, mode);
        debug!(
            "Queued seek operation {} to {:?} ({:?})",
            operation.id(),
            position,
            mode
        );
        state.queued = Some(QueuedSeek {
            operation,
            ticket: ticket.clone(),
        });
        state.stats.operations_created += 1;
        drop(state);

        // A full mailbox already guarantees a wake-up.
        let _ = self.wake_tx.try_send(());
        ticket
    }

    fn check_accepting(&self, state: &CommandState) -> Result<()> {
        if state.disposed || self.engine.is_disposing() {
            return Err(TransportError::Disposed);
        }
        if !self.engine.is_open() {
            return Err(TransportError::NotOpen);
        }
        if let Some(command) = state.pending_priority {
            return Err(TransportError::CommandPending(command));
        }
        Ok(())
    }

    /// Execute the queued operation, if any, on the calling thread
    pub fn process_next(&self) -> bool {
        let _execution = self.execution.lock();

        let (operation, cancel) = {
            let mut state = self.state.lock();
            if state.disposed {
                return false;
            }
            let Some(queued) = state.queued.take() else {
                return false;
            };
            let cancel = CancelToken::new();
            state.executing = true;
            state.active_cancel = Some(cancel.clone());
            (queued.operation, cancel)
        };

        debug!(
            "Executing seek operation {} to {:?} ({:?})",
            operation.id(),
            operation.position(),
            operation.mode()
        );
        let outcome = seek::execute(&self.engine, &operation, &cancel);

        {
            let mut state = self.state.lock();
            state.executing = false;
            state.active_cancel = None;
            state.stats.executed += 1;
            if !outcome.success {
                state.stats.failed += 1;
            }

            if state.queued.is_none() && state.is_seeking {
                state.settle(
                    &self.engine,
                    operation.mode(),
                    outcome.position,
                    outcome.success,
                );
            }
        }

        operation.complete(outcome.success);
        true
    }

    /// Drop the queued operation; its ticket resolves to `false`
    pub fn clear_queued(&self) {
        let queued = self.state.lock().take_queued(&self.engine);
        if let Some(queued) = queued {
            debug!("Cleared queued seek operation {}", queued.operation.id());
        }
    }

    /// Mark a higher-priority command as pending. Queued seeks are dropped,
    /// the executing one is asked to stop, and new requests are rejected until
    /// [`CommandManager::end_priority_command`].
    pub fn begin_priority_command(&self, command: PriorityCommand) {
        let queued = {
            let mut state = self.state.lock();
            state.pending_priority = Some(command);
            if let Some(cancel) = &state.active_cancel {
                cancel.cancel();
            }
            state.take_queued(&self.engine)
        };
        info!("Priority command pending: {}", command);
        drop(queued);
    }

    pub fn end_priority_command(&self) {
        if let Some(command) = self.state.lock().pending_priority.take() {
            info!("Priority command finished: {}", command);
        }
    }

    pub fn is_seeking(&self) -> bool {
        self.state.lock().is_seeking
    }

    pub fn has_queued_seek(&self) -> bool {
        self.state.lock().queued.is_some()
    }

    pub fn stats(&self) -> CommandStats {
        self.state.lock().stats
    }

    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        self.engine.subscribe()
    }

    /// Stop accepting commands, drop queued work and join the worker
    pub fn dispose(&self) {
        let queued = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            self.engine.begin_dispose();
            state.disposed = true;
            if let Some(cancel) = &state.active_cancel {
                cancel.cancel();
            }
            state.take_queued(&self.engine)
        };
        drop(queued);

        let _ = self.wake_tx.try_send(());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!("Dispose called from the seek worker, not joining");
            } else if handle.join().is_err() {
                error!("Seek worker panicked");
            }
        }
        info!("Command manager disposed");
    }
}

impl Drop for CommandManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run_worker(manager: Weak<CommandManager>, wake_rx: Receiver<()>, idle: Duration) {
    info!("Seek worker started");

    loop {
        match wake_rx.recv_timeout(idle) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };
        if manager.state.lock().disposed {
            break;
        }
        while manager.process_next() {}
    }

    info!("Seek worker stopped");
}
