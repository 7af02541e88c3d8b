mod common;

use common::ScriptedContainer;
use mapmap_transport::{
    CommandManager, MediaEngine, PlaybackStatus, PriorityCommand, SeekMode, SeekTicket,
    StreamType, TestPatternContainer, TestPatternHandle, TransportConfig, TransportEvent,
    WorkerStage,
};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn setup() -> (Arc<CommandManager>, TestPatternHandle) {
    let container =
        TestPatternContainer::new(secs(120)).with_stream(StreamType::Video, secs(1));
    let handle = container.handle();
    let config = TransportConfig {
        video_buffer_capacity: 10,
        worker_idle_timeout_ms: 20,
        ..Default::default()
    };
    let engine = MediaEngine::open(Box::new(container), config).unwrap();
    (CommandManager::new(engine), handle)
}

#[test]
fn test_coalesced_requests_execute_last_writer() {
    let (manager, handle) = setup();

    let first = manager.request_seek(secs(10), SeekMode::StepBackward);
    let second = manager.request_seek(secs(20), SeekMode::Normal);
    assert!(first.same_request(&second));

    assert!(manager.process_next());
    assert!(!manager.process_next());
    assert!(first.wait());
    assert!(second.wait());

    assert_eq!(handle.seek_targets(), vec![secs(20)]);
    assert_eq!(manager.engine().clock().position(), secs(20));

    let stats = manager.stats();
    assert_eq!(stats.operations_created, 1);
    assert_eq!(stats.executed, 1);
}

#[test]
fn test_concurrent_callers_share_one_operation() {
    let (manager, _handle) = setup();
    let barrier = Arc::new(Barrier::new(8));

    let callers: Vec<_> = (0..8u64)
        .map(|i| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                manager.request_seek(secs(30 + i), SeekMode::Normal)
            })
        })
        .collect();
    let tickets: Vec<SeekTicket> = callers.into_iter().map(|c| c.join().unwrap()).collect();

    assert!(tickets.iter().all(|t| t.same_request(&tickets[0])));
    assert_eq!(manager.stats().operations_created, 1);
    assert_eq!(manager.stats().coalesced, 7);

    manager.process_next();
    let outcomes: Vec<bool> = tickets.into_iter().map(SeekTicket::wait).collect();
    assert!(outcomes.iter().all(|&ok| ok));
}

#[test]
fn test_rejected_when_closed() {
    let (manager, handle) = setup();
    manager.engine().close();

    let ticket = manager.request_seek(secs(5), SeekMode::Normal);
    assert_eq!(ticket.peek(), Some(false));
    assert!(!ticket.wait());
    assert!(!manager.is_seeking());
    assert!(!manager.has_queued_seek());
    assert_eq!(handle.seek_count(), 0);
    assert_eq!(manager.stats().rejected, 1);
}

#[test]
fn test_priority_command_supersedes_queued_seek() {
    let (manager, _handle) = setup();
    let ticket = manager.request_seek(secs(5), SeekMode::Normal);

    manager.begin_priority_command(PriorityCommand::Open);
    assert!(!ticket.wait());
    assert!(!manager.has_queued_seek());
    assert!(!manager.is_seeking());

    manager.end_priority_command();
    let ticket = manager.request_seek(secs(5), SeekMode::Normal);
    assert!(manager.process_next());
    assert!(ticket.wait());
}

#[test]
fn test_worker_executes_requests() {
    let (manager, handle) = setup();
    manager.start().unwrap();

    assert!(manager.request_seek(secs(40), SeekMode::Normal).wait());
    assert_eq!(manager.engine().clock().position(), secs(40));
    assert!(!manager.is_seeking());
    assert_eq!(handle.seek_count(), 1);

    manager.dispose();
}

#[test]
fn test_worker_serializes_concurrent_bursts() {
    let (manager, _handle) = setup();
    manager.start().unwrap();

    let callers: Vec<_> = (0..6u64)
        .map(|i| {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut results = Vec::new();
                for j in 0..5u64 {
                    let target = secs((i * 17 + j * 7) % 110);
                    results.push(manager.request_seek(target, SeekMode::Normal).wait());
                }
                results
            })
        })
        .collect();

    for caller in callers {
        assert!(caller.join().unwrap().into_iter().all(|ok| ok));
    }

    let engine = manager.engine();
    assert!(!manager.is_seeking());
    assert!(engine.gate().is_open());
    let position = engine.clock().position();
    assert!(engine.buffers().main().is_in_range(position));

    let stats = manager.stats();
    assert_eq!(stats.requested, 30);
    assert_eq!(stats.requested, stats.coalesced + stats.operations_created);
    assert_eq!(stats.executed, stats.operations_created);
    manager.dispose();
}

#[test]
fn test_playback_resumes_after_seek() {
    let (manager, _handle) = setup();
    let engine = manager.engine().clone();
    engine.set_playback_status(PlaybackStatus::Play);
    engine.clock().play();

    let ticket = manager.request_seek(secs(30), SeekMode::Normal);
    assert_eq!(engine.playback_status(), PlaybackStatus::Manual);
    assert!(!engine.clock().is_running());

    manager.process_next();
    assert!(ticket.wait());
    assert_eq!(engine.playback_status(), PlaybackStatus::Play);
    assert!(engine.clock().is_running());
    assert!(engine.clock().position() >= secs(30));
}

#[test]
fn test_step_does_not_resume_playback() {
    let (manager, _handle) = setup();
    let engine = manager.engine().clone();
    engine.set_playback_status(PlaybackStatus::Play);

    let ticket = manager.request_seek(secs(30), SeekMode::StepForward);
    manager.process_next();
    ticket.wait();
    assert_eq!(engine.playback_status(), PlaybackStatus::Pause);
    assert!(!engine.clock().is_running());
}

#[test]
fn test_events_bracket_a_seek_burst() {
    let (manager, _handle) = setup();
    let events = manager.subscribe();

    manager.request_seek(secs(10), SeekMode::Normal);
    manager.request_seek(secs(12), SeekMode::Normal);
    manager.process_next();

    let received: Vec<_> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            TransportEvent::SeekingStarted,
            TransportEvent::SeekingEnded {
                position: secs(12),
                success: true
            },
        ]
    );
}

#[test]
fn test_new_burst_after_settle_restarts_seeking() {
    let (manager, _handle) = setup();
    let events = manager.subscribe();

    manager.request_seek(secs(10), SeekMode::Normal);
    manager.process_next();
    let first = manager.request_seek(secs(60), SeekMode::Normal);
    let second = manager.request_seek(secs(61), SeekMode::Normal);
    manager.process_next();
    assert!(first.wait() && second.wait());

    let started = events
        .try_iter()
        .filter(|e| *e == TransportEvent::SeekingStarted)
        .count();
    assert_eq!(started, 2);
    assert_eq!(manager.engine().clock().position(), secs(61));
}

#[test]
fn test_dispose_resolves_queued_and_rejects_new() {
    let (manager, _handle) = setup();
    let queued = manager.request_seek(secs(5), SeekMode::Normal);

    manager.dispose();
    manager.dispose();

    assert!(!queued.wait());
    assert!(manager.engine().is_disposing());
    assert!(!manager.request_seek(secs(5), SeekMode::Normal).wait());
}

#[test]
fn test_drop_stops_worker() {
    let (manager, _handle) = setup();
    manager.start().unwrap();
    let engine = manager.engine().clone();

    drop(manager);

    // The worker may briefly hold the last reference and run the drop itself
    let deadline = Instant::now() + secs(2);
    while !engine.is_disposing() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(engine.is_disposing());
}

/// Start a slow seek on the worker, run `cancel` once the refill is under way
/// and check the engine is left consistent
fn assert_cancelled_mid_refill(cancel: impl FnOnce(&CommandManager)) {
    let (container, script) = ScriptedContainer::new(
        TestPatternContainer::new(secs(120)).with_stream(StreamType::Video, secs(1)),
    );
    let (receives_tx, receives_rx) = crossbeam_channel::bounded(16);
    script.set_delay(Duration::from_millis(50));
    script.notify_receives(receives_tx);

    let config = TransportConfig {
        video_buffer_capacity: 10,
        worker_idle_timeout_ms: 20,
        ..Default::default()
    };
    let engine = MediaEngine::open(Box::new(container), config).unwrap();
    let manager = CommandManager::new(engine.clone());
    manager.start().unwrap();

    let ticket = manager.request_seek(secs(50), SeekMode::Normal);
    while receives_rx.recv_timeout(secs(2)).unwrap() < 2 {}
    cancel(&manager);

    // Target stays covered by the partial refill
    assert!(ticket.wait());
    let position = engine.clock().position();
    assert_eq!(position, secs(50));
    {
        let buffers = engine.buffers();
        assert!(buffers.main().is_in_range(position));
        assert!(!buffers.main().is_full());
    }
    assert!(engine.gate().is_open());
    for stage in WorkerStage::DECODING {
        assert!(!engine.workers().is_paused(stage));
    }
    assert!(!manager.is_seeking());
    manager.dispose();
}

#[test]
fn test_priority_command_cancels_running_seek() {
    assert_cancelled_mid_refill(|manager| {
        manager.begin_priority_command(PriorityCommand::ChangeMedia);
    });
}

#[test]
fn test_dispose_cancels_running_seek() {
    assert_cancelled_mid_refill(|manager| manager.dispose());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_queued_burst_creates_one_operation(
        requests in prop::collection::vec((0u64..120, 0usize..4), 1..12)
    ) {
        let (manager, handle) = setup();
        let modes = [
            SeekMode::Normal,
            SeekMode::StepForward,
            SeekMode::StepBackward,
            SeekMode::Stop,
        ];

        let tickets: Vec<_> = requests
            .iter()
            .map(|&(target, mode)| manager.request_seek(secs(target), modes[mode]))
            .collect();
        prop_assert_eq!(manager.stats().operations_created, 1);

        manager.process_next();
        let outcomes: Vec<bool> = tickets.into_iter().map(SeekTicket::wait).collect();
        prop_assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
        prop_assert!(handle.seek_count() <= 1);
    }
}
