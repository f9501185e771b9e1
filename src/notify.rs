//! Single-shot write notifications.
//!
//! Every write is represented by a [`Notifier`], owned by the sink, and a [`WriteFuture`], owned
//! by the caller. Settling a notifier consumes it, so a write can never be resolved twice.

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use atomic_waker::AtomicWaker;
use futures_core::future::FusedFuture;
use futures_core::ready;
use pin_project_lite::pin_project;

use crate::SinkError;

/// The outcome of a single write: the number of bytes written, or why it failed.
pub type WriteResult = Result<usize, SinkError>;

/// Create a connected notifier and future.
pub(crate) fn channel() -> (Notifier, WriteFuture) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Pending),
        waker: AtomicWaker::new(),
    });
    let notifier = Notifier {
        slot: Some(Arc::clone(&slot)),
        hook: None,
    };
    let future = WriteFuture {
        state: FutureState::Waiting(slot),
    };
    (notifier, future)
}

/// Shared between a notifier and its future.
struct Slot {
    state: Mutex<SlotState>,
    waker: AtomicWaker,
}

enum SlotState {
    Pending,
    Settled(WriteResult),
    Taken,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The settling side of a write.
pub(crate) struct Notifier {
    // Only `None` once settled.
    slot: Option<Arc<Slot>>,
    hook: Option<Box<dyn FnOnce() + Send>>,
}

impl Notifier {
    /// Run `hook` right after this notifier is settled, whatever the outcome.
    pub(crate) fn then(&mut self, hook: impl FnOnce() + Send + 'static) {
        debug_assert!(self.hook.is_none(), "notifier already has a hook");
        self.hook = Some(Box::new(hook));
    }

    /// Resolve the write, waking its future and then running the hook.
    ///
    /// Must not be called while holding the sink's state lock, since the hook may take it.
    pub(crate) fn settle(mut self, result: WriteResult) {
        if let Some(slot) = self.slot.take() {
            fill(&slot, result);
        }
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}

fn fill(slot: &Slot, result: WriteResult) {
    {
        let mut state = slot.lock();
        assert!(
            matches!(*state, SlotState::Pending),
            "write notifier settled twice"
        );
        *state = SlotState::Settled(result);
    }
    slot.waker.wake();
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Only reached without settling while unwinding. The hook is skipped as the sink's lock may
        // still be held.
        if let Some(slot) = self.slot.take() {
            fill(&slot, Err(SinkError::Closed));
        }
    }
}

impl Debug for Notifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("settled", &self.slot.is_none())
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

/// Future for [`WritableByteSink::write`](crate::WritableByteSink::write) and
/// [`WritableByteSink::end`](crate::WritableByteSink::end).
///
/// Resolves to the total number of bytes written once the whole buffer has reached the handle, or
/// to the error that prevented it. The write makes progress whether or not this future is polled,
/// and dropping it does not cancel the write.
#[must_use = "dropping a `WriteFuture` discards the outcome of the write"]
pub struct WriteFuture {
    state: FutureState,
}

enum FutureState {
    Ready(WriteResult),
    Waiting(Arc<Slot>),
    Done,
}

impl WriteFuture {
    pub(crate) fn ready(result: WriteResult) -> Self {
        Self {
            state: FutureState::Ready(result),
        }
    }

    /// Whether the write has already completed or failed, so that polling would return
    /// [`Poll::Ready`].
    #[must_use]
    pub fn is_settled(&self) -> bool {
        match &self.state {
            FutureState::Ready(_) => true,
            FutureState::Waiting(slot) => !matches!(*slot.lock(), SlotState::Pending),
            FutureState::Done => false,
        }
    }
}

impl Future for WriteFuture {
    type Output = WriteResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match mem::replace(&mut self.state, FutureState::Done) {
            FutureState::Ready(result) => Poll::Ready(result),
            FutureState::Waiting(slot) => {
                slot.waker.register(cx.waker());
                let settled = {
                    let mut state = slot.lock();
                    match mem::replace(&mut *state, SlotState::Taken) {
                        SlotState::Settled(result) => Some(result),
                        other => {
                            *state = other;
                            None
                        }
                    }
                };
                match settled {
                    Some(result) => Poll::Ready(result),
                    None => {
                        self.state = FutureState::Waiting(slot);
                        Poll::Pending
                    }
                }
            }
            FutureState::Done => panic!("`WriteFuture` polled after completion"),
        }
    }
}

impl FusedFuture for WriteFuture {
    fn is_terminated(&self) -> bool {
        matches!(self.state, FutureState::Done)
    }
}

impl Debug for WriteFuture {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            FutureState::Ready(result) => return f.debug_tuple("WriteFuture").field(result).finish(),
            FutureState::Waiting(_) if self.is_settled() => "settled",
            FutureState::Waiting(_) => "pending",
            FutureState::Done => "done",
        };
        f.debug_tuple("WriteFuture").field(&state).finish()
    }
}

pin_project! {
    /// Future for [`WritableByteSink::flush`](crate::WritableByteSink::flush).
    #[derive(Debug)]
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct Flush {
        #[pin]
        inner: WriteFuture,
    }
}

impl Flush {
    pub(crate) fn new(inner: WriteFuture) -> Self {
        Self { inner }
    }
}

impl Future for Flush {
    type Output = Result<(), SinkError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(self.project().inner.poll(cx));
        Poll::Ready(result.map(drop))
    }
}

impl FusedFuture for Flush {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}
