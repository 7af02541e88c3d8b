//! Seek operations and their completion handles

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// How a seek target is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekMode {
    /// Seek to the requested position
    #[default]
    Normal,
    /// Move to the next buffered frame of the main stream
    StepForward,
    /// Move to the previous buffered frame of the main stream
    StepBackward,
    /// Return to the start of the media
    Stop,
}

/// A queued seek request.
///
/// While queued, later requests overwrite its position and mode. Completion is
/// signalled exactly once: explicitly through [`SeekOperation::complete`], or
/// as a failure when the operation is dropped without being completed.
#[derive(Debug)]
pub struct SeekOperation {
    id: u64,
    position: Duration,
    mode: SeekMode,
    completion: Option<oneshot::Sender<bool>>,
}

impl SeekOperation {
    /// Create an operation and the ticket its callers wait on
    pub(crate) fn new(id: u64, position: Duration, mode: SeekMode) -> (Self, SeekTicket) {
        let (tx, rx) = oneshot::channel();
        let operation = Self {
            id,
            position,
            mode,
            completion: Some(tx),
        };
        (operation, SeekTicket::pending(rx))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn mode(&self) -> SeekMode {
        self.mode
    }

    /// Coalesce a newer request into this one
    pub(crate) fn update(&mut self, position: Duration, mode: SeekMode) {
        self.position = position;
        self.mode = mode;
    }

    /// Signal the outcome to every waiting caller and release the operation
    pub(crate) fn complete(mut self, success: bool) {
        if let Some(tx) = self.completion.take() {
            // No ticket left alive is fine: nobody is waiting.
            let _ = tx.send(success);
        }
    }
}

/// Awaitable outcome of a seek request.
///
/// Tickets are cheap to clone; every caller coalesced into one operation holds
/// a clone of the same ticket and observes the same result. The ticket can be
/// awaited from async code or waited on from a plain thread.
#[derive(Clone)]
pub struct SeekTicket {
    inner: Shared<BoxFuture<'static, bool>>,
}

impl std::fmt::Debug for SeekTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeekTicket")
            .field("result", &self.inner.peek())
            .finish()
    }
}

impl SeekTicket {
    fn pending(rx: oneshot::Receiver<bool>) -> Self {
        // A dropped sender means the operation was discarded unexecuted.
        let inner = rx.map(|result| result.unwrap_or(false)).boxed().shared();
        Self { inner }
    }

    /// An already-resolved ticket, used for rejected requests
    pub fn ready(success: bool) -> Self {
        let inner = future::ready(success).boxed().shared();
        // Resolve eagerly so `peek` reports the outcome right away.
        let _ = inner.clone().now_or_never();
        Self { inner }
    }

    /// Block the calling thread until the seek completes
    pub fn wait(self) -> bool {
        futures::executor::block_on(self)
    }

    /// The outcome, if some clone of this ticket has already observed it
    pub fn peek(&self) -> Option<bool> {
        self.inner.peek().copied()
    }

    /// True when both tickets resolve from the same operation
    pub fn same_request(&self, other: &SeekTicket) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Future for SeekTicket {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        self.inner.poll_unpin(cx)
    }
}

/// Cooperative cancellation flag checked between frame reads
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
