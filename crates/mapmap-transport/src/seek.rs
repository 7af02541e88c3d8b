//! Seek execution
//!
//! Runs on the seek worker, outside the command manager's state lock. A seek
//! either repositions the clock inside the already-buffered window (fast path)
//! or pauses the decoding stages, closes the availability gate, seeks the
//! container and refills every block buffer around the target (slow path).

use crate::block_buffer::BlockBuffer;
use crate::container::MediaContainer;
use crate::engine::MediaEngine;
use crate::gate::AvailabilityGate;
use crate::operation::{CancelToken, SeekMode, SeekOperation};
use crate::workers::{PauseGuard, WorkerStage};
use crate::Result;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where a seek left the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SeekOutcome {
    pub position: Duration,
    pub success: bool,
}

/// Decoding stages paused and gate closed for the duration of a slow-path
/// seek. Dropping it reopens the gate and resumes the stages, on every exit
/// path including unwinding.
struct SlowPath<'a> {
    gate: &'a AvailabilityGate,
    _paused: PauseGuard<'a>,
}

impl<'a> SlowPath<'a> {
    fn enter(engine: &'a MediaEngine) -> Self {
        let paused = engine.workers().pause(&WorkerStage::DECODING);
        engine.gate().close();
        Self {
            gate: engine.gate(),
            _paused: paused,
        }
    }
}

impl Drop for SlowPath<'_> {
    fn drop(&mut self) {
        self.gate.open();
    }
}

/// Execute one seek operation. Never fails: faults are logged and reported as
/// an unsuccessful seek with the engine left in a usable state.
pub(crate) fn execute(
    engine: &MediaEngine,
    operation: &SeekOperation,
    cancel: &CancelToken,
) -> SeekOutcome {
    let initial_position = engine.clock().position();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        run(engine, operation, cancel, initial_position)
    }));

    match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            error!("Seek operation {} failed: {}", operation.id(), e);
            recover(engine, initial_position)
        }
        Err(_) => {
            error!("Seek operation {} panicked", operation.id());
            recover(engine, initial_position)
        }
    }
}

/// Commit a position the renderer can still present after a faulted seek.
///
/// The buffers may already hold frames around the new target, so the
/// pre-seek position is clamped into the main buffer range when it has one.
fn recover(engine: &MediaEngine, initial_position: Duration) -> SeekOutcome {
    let position = {
        let buffers = engine.buffers();
        let main = buffers.main();
        if main.is_empty() {
            initial_position
        } else {
            initial_position.clamp(main.range_start_time(), main.range_end_time())
        }
    };

    if position != initial_position {
        warn!(
            "Recovered from failed seek at {:?} instead of {:?}",
            position, initial_position
        );
    }
    engine.clock().update(position);
    SeekOutcome {
        position,
        success: false,
    }
}

fn run(
    engine: &MediaEngine,
    operation: &SeekOperation,
    cancel: &CancelToken,
    initial_position: Duration,
) -> Result<SeekOutcome> {
    let main = engine.main_stream();

    let target = {
        let buffers = engine.buffers();
        let target = resolve_target(
            buffers.main(),
            operation.mode(),
            operation.position(),
            initial_position,
        );

        if buffers.main().is_in_range(target) {
            engine.clock().update(target);
            debug!(
                "Seek operation {} to {:?} served from buffered range",
                operation.id(),
                target
            );
            return Ok(SeekOutcome {
                position: target,
                success: true,
            });
        }
        target
    };

    let _slow_path = SlowPath::enter(engine);
    let mut container = engine.container();
    container.clear_queued_packets(true);

    let seek_target = {
        let buffers = engine.buffers();
        skewed_target(buffers.main(), target, engine.config().skew_seek_target)
    };
    debug!(
        "Seek operation {}: target {:?}, container seek to {:?}",
        operation.id(),
        target,
        seek_target
    );

    let Some(first_frame) = container.seek(seek_target)? else {
        warn!(
            "Container returned no frame for seek to {:?}, keeping {:?}",
            seek_target, initial_position
        );
        engine.clock().update(initial_position);
        return Ok(SeekOutcome {
            position: initial_position,
            success: false,
        });
    };

    engine.set_media_ended(false);
    {
        let mut buffers = engine.buffers();
        for stream in buffers.streams() {
            if let Some(buffer) = buffers.get_mut(stream) {
                buffer.clear();
            }
            engine.invalidate_render(stream);
        }
        buffers.add(first_frame);
    }
    reopen_if_available(engine, target);

    refill(engine, &mut **container, target, cancel)?;
    align(engine, &mut **container, target, cancel)?;

    let outcome = {
        let buffers = engine.buffers();
        result_position(buffers.main(), target, initial_position)
    };
    engine.clock().update(outcome.position);

    info!(
        "Seek operation {} ({:?}) settled at {:?} on {} buffer",
        operation.id(),
        operation.mode(),
        outcome.position,
        main
    );
    Ok(outcome)
}

/// Pull frames for every stream until its buffer is full
fn refill(
    engine: &MediaEngine,
    container: &mut dyn MediaContainer,
    target: Duration,
    cancel: &CancelToken,
) -> Result<()> {
    let streams = engine.buffers().streams();

    for stream in streams {
        loop {
            if cancel.is_cancelled() {
                debug!("Seek refill cancelled");
                return Ok(());
            }
            if engine.buffers().get(stream).map_or(true, |b| b.is_full()) {
                break;
            }

            let Some(frame) = container.receive_next_frame(stream)? else {
                break;
            };
            engine.buffers().add(frame);
            if stream == engine.main_stream() {
                reopen_if_available(engine, target);
            }
        }
    }
    Ok(())
}

/// Read packets until the main buffer covers the target
fn align(
    engine: &MediaEngine,
    container: &mut dyn MediaContainer,
    target: Duration,
    cancel: &CancelToken,
) -> Result<()> {
    let max_reads = engine.config().max_alignment_reads;
    let mut reads = 0;

    while !cancel.is_cancelled()
        && !container.is_at_end_of_stream()
        && reads < max_reads
        && !engine.buffers().main().is_in_range(target)
    {
        reads += 1;
        let Some(stream) = container.read()? else {
            break;
        };

        let wanted = engine
            .buffers()
            .get(stream)
            .is_some_and(|b| !b.is_full() || b.range_end_time() < target);
        if !wanted {
            continue;
        }

        if let Some(frame) = container.receive_next_frame(stream)? {
            engine.buffers().add(frame);
            if stream == engine.main_stream() {
                reopen_if_available(engine, target);
            }
        }
    }

    if reads > 0 {
        debug!("Aligned main buffer after {} packet reads", reads);
    }
    Ok(())
}

fn reopen_if_available(engine: &MediaEngine, target: Duration) {
    let gate = engine.gate();
    if !gate.is_open() && engine.buffers().main().is_in_range(target) {
        gate.open();
        debug!("Main buffer reached {:?}, availability gate open", target);
    }
}

/// Turn a requested position and mode into the position to seek to
pub(crate) fn resolve_target(
    main: &BlockBuffer,
    mode: SeekMode,
    requested: Duration,
    current: Duration,
) -> Duration {
    match mode {
        SeekMode::Normal => requested,
        SeekMode::Stop => Duration::ZERO,
        SeekMode::StepForward | SeekMode::StepBackward => {
            let neighbors = main.neighbors(current);
            let side = if mode == SeekMode::StepBackward {
                neighbors.previous
            } else {
                neighbors.next
            };

            match (side, neighbors.current) {
                (Some(frame), _) => frame.start_time,
                (None, Some(frame)) => frame.start_time.saturating_sub(frame.duration / 2),
                (None, None) => current,
            }
        }
    }
}

/// Move the container seek target back by half a buffer so the target lands
/// in the middle of the refilled window
pub(crate) fn skewed_target(main: &BlockBuffer, target: Duration, enabled: bool) -> Duration {
    if !enabled || target.is_zero() || !main.is_monotonic() {
        return target;
    }

    let half = u32::try_from(main.capacity() / 2).unwrap_or(u32::MAX);
    let skew = main
        .monotonic_duration()
        .checked_mul(half)
        .unwrap_or(Duration::MAX);
    target.saturating_sub(skew)
}

fn result_position(main: &BlockBuffer, target: Duration, initial: Duration) -> SeekOutcome {
    if main.is_empty() {
        if target.is_zero() {
            return SeekOutcome {
                position: target,
                success: true,
            };
        }
        warn!(
            "Main buffer empty after seek to {:?}, keeping {:?}",
            target, initial
        );
        return SeekOutcome {
            position: initial,
            success: false,
        };
    }

    if main.is_in_range(target) {
        return SeekOutcome {
            position: target,
            success: true,
        };
    }

    let start = main.range_start_time();
    let end = main.range_end_time();
    let clamped = target.clamp(start, end);
    warn!(
        "Seek target {:?} not reachable, clamped to {:?} (buffered {:?}..{:?})",
        target, clamped, start, end
    );
    SeekOutcome {
        position: clamped,
        success: true,
    }
}
