//! MapFlow seek transport demo
//!
//! Plays a synthetic test pattern through the transport core with a decode
//! stage and a render stage running on their own threads, then fires the
//! requested seeks concurrently and steps frame by frame.

mod logging_setup;

use anyhow::{Context, Result};
use clap::Parser;
use mapmap_transport::{
    CommandManager, LogConfig, MediaEngine, PlaybackStatus, SeekMode, StreamType,
    TestPatternContainer, TransportConfig, WorkerStage,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Parser)]
#[command(name = "mapmap-seek")]
#[command(author, version, about = "Exercise the seek transport against a test pattern")]
struct Cli {
    /// Path to a JSON transport config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Length of the test pattern in seconds
    #[arg(long, default_value_t = 600)]
    duration_secs: u64,

    /// Video frame rate of the test pattern
    #[arg(long, default_value_t = 25.0)]
    fps: f64,

    /// Seek targets in seconds, issued concurrently
    #[arg(long = "seek", value_name = "SECONDS")]
    seeks: Vec<f64>,

    /// Frame steps after the seeks; negative values step backward
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    steps: i32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Decode and render stage threads
struct Stages {
    running: Arc<AtomicBool>,
    rendered: Arc<AtomicU64>,
    threads: Vec<JoinHandle<()>>,
}

impl Stages {
    fn start(engine: &Arc<MediaEngine>, frame_interval: Duration) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let rendered = Arc::new(AtomicU64::new(0));

        let decode = {
            let engine = engine.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("decode-stage".to_string())
                .spawn(move || {
                    while running.load(Ordering::Relaxed) {
                        decode_cycle(&engine);
                        thread::sleep(frame_interval / 2);
                    }
                })
                .context("Failed to spawn decode stage")?
        };

        let render = {
            let engine = engine.clone();
            let running = running.clone();
            let rendered = rendered.clone();
            thread::Builder::new()
                .name("render-stage".to_string())
                .spawn(move || {
                    let timeout = engine.config().gate_wait_timeout();
                    while running.load(Ordering::Relaxed) {
                        if !engine.gate().wait_timeout(timeout) {
                            trace!("Render waiting on availability gate");
                            continue;
                        }
                        if render_cycle(&engine) {
                            rendered.fetch_add(1, Ordering::Relaxed);
                        }
                        thread::sleep(frame_interval);
                    }
                })
                .context("Failed to spawn render stage")?
        };

        Ok(Self {
            running,
            rendered,
            threads: vec![decode, render],
        })
    }

    fn stop(self) -> u64 {
        self.running.store(false, Ordering::Relaxed);
        for thread in self.threads {
            if thread.join().is_err() {
                warn!("Stage thread panicked");
            }
        }
        self.rendered.load(Ordering::Relaxed)
    }
}

/// Keep each buffer filled ahead of the clock
fn decode_cycle(engine: &MediaEngine) {
    let _cycle = engine.workers().begin_cycle(WorkerStage::Decode);
    let mut container = engine.container();
    let position = engine.clock().position();
    let streams = engine.buffers().streams();

    for stream in streams {
        let wanted = engine.buffers().get(stream).is_some_and(|buffer| {
            let midpoint = (buffer.range_start_time() + buffer.range_end_time()) / 2;
            !buffer.is_full() || position >= midpoint
        });
        if !wanted || container.is_at_end_of_stream() {
            continue;
        }

        match container.receive_next_frame(stream) {
            Ok(Some(frame)) => {
                engine.buffers().add(frame);
            }
            Ok(None) => {
                if !engine.has_media_ended() {
                    info!("End of media reached");
                }
                engine.set_media_ended(true);
            }
            Err(e) => warn!("Decode failed on {} stream: {}", stream, e),
        }
    }
}

/// Present the main frame under the clock. Returns true when a new frame was
/// presented.
fn render_cycle(engine: &MediaEngine) -> bool {
    let _cycle = engine.workers().begin_cycle(WorkerStage::Render);
    let main = engine.main_stream();
    let position = engine.clock().position();

    let start = {
        let buffers = engine.buffers();
        buffers
            .main()
            .neighbors(position)
            .current
            .map(|frame| frame.start_time)
    };

    match start {
        Some(start) if engine.last_rendered(main) != Some(start) => {
            engine.record_render(main, start);
            trace!("Rendered {} frame at {:?}", main, start);
            true
        }
        _ => false,
    }
}

fn seek_concurrently(manager: &Arc<CommandManager>, targets: &[f64]) -> Vec<(f64, bool)> {
    let callers: Vec<_> = targets
        .iter()
        .map(|&seconds| {
            let manager = manager.clone();
            thread::spawn(move || {
                let target = Duration::from_secs_f64(seconds.max(0.0));
                (seconds, manager.request_seek(target, SeekMode::Normal).wait())
            })
        })
        .collect();

    callers
        .into_iter()
        .map(|caller| caller.join().unwrap_or((f64::NAN, false)))
        .collect()
}

/// Video frame duration for `fps`, rejecting rates with no usable interval
fn frame_interval(fps: f64) -> Result<Duration> {
    let interval = Duration::try_from_secs_f64(1.0 / fps)
        .with_context(|| format!("Invalid --fps {}", fps))?;
    anyhow::ensure!(!interval.is_zero(), "--fps {} is too high", fps);
    Ok(interval)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: cli.log_level.clone(),
        file_output: cli.log_dir.is_some(),
        log_dir: cli
            .log_dir
            .clone()
            .unwrap_or_else(|| LogConfig::default().log_dir),
        ..Default::default()
    };
    let _log_guard = logging_setup::init(&log_config)?;

    let config = match &cli.config {
        Some(path) => TransportConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => TransportConfig::default(),
    };

    let frame_interval = frame_interval(cli.fps)?;
    let container = TestPatternContainer::new(Duration::from_secs(cli.duration_secs))
        .with_stream(StreamType::Video, frame_interval)
        .with_stream(StreamType::Audio, Duration::from_millis(20));

    let engine = MediaEngine::open(Box::new(container), config)
        .context("Failed to open test pattern")?;
    let manager = CommandManager::new(engine.clone());
    manager.start().context("Failed to start seek worker")?;
    let events = manager.subscribe();

    let stages = Stages::start(&engine, frame_interval)?;

    // Prime the buffers, then play
    manager.request_seek(Duration::ZERO, SeekMode::Normal).wait();
    engine.set_playback_status(PlaybackStatus::Play);
    engine.clock().play();
    thread::sleep(frame_interval.saturating_mul(5));

    for (seconds, success) in seek_concurrently(&manager, &cli.seeks) {
        println!("seek {:>8.3}s -> {}", seconds, if success { "ok" } else { "failed" });
    }

    let mode = if cli.steps < 0 {
        SeekMode::StepBackward
    } else {
        SeekMode::StepForward
    };
    for _ in 0..cli.steps.unsigned_abs() {
        let success = manager.request_seek(Duration::ZERO, mode).wait();
        println!(
            "{:?} -> {:?} ({})",
            mode,
            engine.clock().position(),
            if success { "ok" } else { "failed" }
        );
    }

    thread::sleep(frame_interval.saturating_mul(5));
    let rendered = stages.stop();
    manager.dispose();

    for event in events.try_iter() {
        debug!("Transport event: {:?}", event);
    }

    let stats = manager.stats();
    println!("position:   {:?}", engine.clock().position());
    println!("rendered:   {}", rendered);
    println!(
        "requests:   {} ({} coalesced, {} rejected)",
        stats.requested, stats.coalesced, stats.rejected
    );
    println!(
        "operations: {} created, {} executed, {} failed",
        stats.operations_created, stats.executed, stats.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval() {
        assert_eq!(frame_interval(25.0).unwrap(), Duration::from_millis(40));
        assert_eq!(frame_interval(0.5).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_frame_interval_rejects_unusable_rates() {
        for fps in [0.0, -25.0, 1e-300, f64::NAN, f64::INFINITY, 1e300] {
            assert!(frame_interval(fps).is_err(), "fps {} accepted", fps);
        }
    }
}
