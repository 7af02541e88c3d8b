//! Container wrapper with scripted faults, delays and gate observation
#![allow(dead_code)]

use crossbeam_channel::Sender;
use mapmap_transport::{
    MediaContainer, MediaEngine, MediaFrame, StreamType, TestPatternContainer, TransportError,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// What a fault does when it triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Error,
    Panic,
}

#[derive(Default)]
struct ScriptState {
    /// Frame receives allowed before every further receive faults
    fault_after: Option<usize>,
    fault: Option<Fault>,
    delay: Duration,
    receives: usize,
    engine: Option<Weak<MediaEngine>>,
    /// Gate state and main buffer count seen at each receive
    gate_log: Vec<(bool, usize)>,
    receive_tx: Option<Sender<usize>>,
}

/// Shared control over a [`ScriptedContainer`]
#[derive(Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    /// Fault on every receive after the next `receives` successful ones
    pub fn fault_after(&self, receives: usize, fault: Fault) {
        let mut state = self.state.lock();
        state.fault_after = Some(receives);
        state.fault = Some(fault);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// Record the gate state of `engine` on every receive
    pub fn observe(&self, engine: &Arc<MediaEngine>) {
        self.state.lock().engine = Some(Arc::downgrade(engine));
    }

    pub fn take_gate_log(&self) -> Vec<(bool, usize)> {
        std::mem::take(&mut self.state.lock().gate_log)
    }

    /// Report the running receive count on `tx`
    pub fn notify_receives(&self, tx: Sender<usize>) {
        self.state.lock().receive_tx = Some(tx);
    }
}

/// [`TestPatternContainer`] whose frame receives follow a [`Script`]
pub struct ScriptedContainer {
    inner: TestPatternContainer,
    script: Script,
}

impl ScriptedContainer {
    pub fn new(inner: TestPatternContainer) -> (Self, Script) {
        let script = Script::default();
        let container = Self {
            inner,
            script: script.clone(),
        };
        (container, script)
    }
}

impl MediaContainer for ScriptedContainer {
    fn streams(&self) -> Vec<StreamType> {
        self.inner.streams()
    }

    fn main_stream(&self) -> StreamType {
        self.inner.main_stream()
    }

    fn seek(&mut self, target: Duration) -> mapmap_transport::Result<Option<MediaFrame>> {
        self.inner.seek(target)
    }

    fn read(&mut self) -> mapmap_transport::Result<Option<StreamType>> {
        self.inner.read()
    }

    fn receive_next_frame(
        &mut self,
        stream: StreamType,
    ) -> mapmap_transport::Result<Option<MediaFrame>> {
        let (fault, delay, engine, receives, tx) = {
            let mut state = self.script.state.lock();
            state.receives += 1;
            let fault = match state.fault_after.as_mut() {
                Some(0) => state.fault,
                Some(remaining) => {
                    *remaining -= 1;
                    None
                }
                None => None,
            };
            (
                fault,
                state.delay,
                state.engine.as_ref().and_then(Weak::upgrade),
                state.receives,
                state.receive_tx.clone(),
            )
        };

        if let Some(engine) = engine {
            let observed = (engine.gate().is_open(), engine.buffers().main().count());
            self.script.state.lock().gate_log.push(observed);
        }
        if let Some(tx) = tx {
            let _ = tx.try_send(receives);
        }
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        match fault {
            Some(Fault::Error) => Err(TransportError::ContainerError(
                "scripted decode fault".to_string(),
            )),
            Some(Fault::Panic) => panic!("scripted decoder panic"),
            None => self.inner.receive_next_frame(stream),
        }
    }

    fn clear_queued_packets(&mut self, flush_buffers: bool) {
        self.inner.clear_queued_packets(flush_buffers);
    }

    fn is_at_end_of_stream(&self) -> bool {
        self.inner.is_at_end_of_stream()
    }
}
