use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};
use writable_sink_core::{ClosePolicy, Handle, Reactor, WritableCallback};

use crate::notify::{self, Flush, Notifier, WriteFuture, WriteResult};
use crate::request::{self, Progress, WriteRequest};
use crate::{Builder, SinkError};

/// A non-blocking byte sink that queues whatever its handle cannot accept immediately.
///
/// Each [`write`](Self::write) first tries to hand its bytes straight to the handle. Whatever the
/// handle does not accept is queued, and the sink arms its reactor registration; the reactor then
/// calls back into the sink each time the handle is writable, and the queue is drained in order.
/// Bytes reach the handle in exactly the order they were submitted.
///
/// While the queue is empty the registration is disarmed, so an idle sink is never woken.
///
/// Dropping the sink tears it down: pending writes fail with [`SinkError::Closed`] and the
/// registration is cancelled.
///
/// # Examples
///
/// ```
/// use futures_lite::future::block_on;
/// use writable_sink::{ManualReactor, WritableByteSink};
///
/// let sink = WritableByteSink::new(std::io::sink(), ManualReactor::new())?;
/// assert_eq!(block_on(sink.write(b"hello"))?, 5);
/// assert_eq!(block_on(sink.end(b"bye"))?, 3);
/// assert!(sink.handle().is_none());
/// # Ok::<_, writable_sink::SinkError>(())
/// ```
pub struct WritableByteSink<H, R>
where
    H: Handle + 'static,
    R: Reactor<H> + Send + Sync + 'static,
{
    shared: Arc<Shared<H, R>>,
}

/// State shared between the sink and its reactor callback.
struct Shared<H, R: Reactor<H>> {
    state: Mutex<State<H, R::Token>>,
    reactor: R,
    chunk_size: Option<usize>,
    close_policy: ClosePolicy,
    max_stalls: Option<u32>,
}

struct State<H, T> {
    // `None` once torn down.
    handle: Option<Arc<H>>,
    // Cleared by `end` and teardown.
    writable: bool,
    queue: VecDeque<WriteRequest>,
    // `None` once cancelled.
    token: Option<T>,
    armed: bool,
    // A write to the handle is running with the lock released.
    in_flight: bool,
    // Consecutive drain notifications without progress.
    stalls: u32,
}

/// Notifiers to settle once the state lock is released.
#[derive(Default)]
struct Completions {
    settled: Vec<(Notifier, WriteResult)>,
}

impl Completions {
    fn push(&mut self, notifier: Notifier, result: WriteResult) {
        self.settled.push((notifier, result));
    }

    fn fire(self) {
        for (notifier, result) in self.settled {
            notifier.settle(result);
        }
    }
}

impl<H, R> WritableByteSink<H, R>
where
    H: Handle + 'static,
    R: Reactor<H> + Send + Sync + 'static,
{
    /// Adopt `handle` with the default configuration and register it with `reactor`.
    ///
    /// # Errors
    ///
    /// Fails with [`SinkError::InvalidHandle`] if [`Handle::prepare`] rejects the handle or the
    /// reactor cannot register it.
    pub fn new(handle: H, reactor: R) -> Result<Self, SinkError> {
        Builder::new().build(handle, reactor)
    }

    /// Create a [`Builder`] to configure a sink.
    #[must_use]
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn with_config(handle: H, reactor: R, config: Builder) -> Result<Self, SinkError> {
        handle.prepare().map_err(SinkError::invalid_handle)?;
        let close_policy = config
            .close_policy
            .unwrap_or_else(|| ClosePolicy::for_handle(&handle));
        let handle = Arc::new(handle);

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                handle: Some(Arc::clone(&handle)),
                writable: true,
                queue: VecDeque::new(),
                token: None,
                armed: false,
                in_flight: false,
                stalls: 0,
            }),
            reactor,
            chunk_size: config.chunk_size.map(|size| size.get()),
            close_policy,
            max_stalls: config.max_stalls.map(|stalls| stalls.get()),
        });

        let weak = Arc::downgrade(&shared);
        let callback: WritableCallback = Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.drain();
            }
        });
        let token = shared
            .reactor
            .register(&*handle, callback)
            .map_err(SinkError::invalid_handle)?;
        shared.lock().token = Some(token);

        debug!(
            ?close_policy,
            chunk_size = ?shared.chunk_size,
            max_stalls = ?shared.max_stalls,
            "sink created"
        );
        Ok(Self { shared })
    }

    /// Write all of `data` to the handle.
    ///
    /// The returned future resolves to `data.len()` once every byte has been accepted by the
    /// handle. If the handle accepts everything straight away, the future is already complete.
    /// Writes that cannot complete immediately are queued and flushed in submission order.
    ///
    /// Fails immediately with [`SinkError::Closed`] if the sink has been ended or closed, without
    /// touching the handle. Fails with [`SinkError::Write`] if the handle fails before the write
    /// completes.
    pub fn write(&self, data: &[u8]) -> WriteFuture {
        self.shared.submit(data, false)
    }

    /// Write `data` as the final bytes, then close the sink.
    ///
    /// The sink stops accepting writes as soon as this is called. The close happens after `data`
    /// has been flushed, so everything written before it still reaches the handle.
    pub fn end(&self, data: &[u8]) -> WriteFuture {
        self.shared.submit(data, true)
    }

    /// Wait until everything written so far has been accepted by the handle.
    ///
    /// Fails with [`SinkError::Closed`] if the sink has been ended or closed.
    pub fn flush(&self) -> Flush {
        Flush::new(self.shared.submit(&[], false))
    }

    /// Shut the handle down and release it, failing every pending write with
    /// [`SinkError::Closed`].
    ///
    /// Under [`ClosePolicy::HalfClose`] only the write direction is shut down before the handle is
    /// released. Under [`ClosePolicy::FullClose`] the handle is closed with [`Handle::close`], even
    /// if references returned by [`handle`](Self::handle) are still alive. Errors from either are
    /// ignored. Calling this more than once has no effect.
    pub fn close(&self) {
        self.shared.close();
    }

    /// The handle, unless the sink has been closed.
    ///
    /// Writing through the returned reference bypasses the queue. It does not outlive the sink's
    /// ownership of the resource: once the sink closes under [`ClosePolicy::FullClose`], the
    /// handle is closed for every holder.
    #[must_use]
    pub fn handle(&self) -> Option<Arc<H>> {
        self.shared.lock().handle.clone()
    }

    /// Whether the sink still accepts writes.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.shared.lock().writable
    }

    /// The number of queued writes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// The number of queued bytes not yet accepted by the handle.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.shared
            .lock()
            .queue
            .iter()
            .map(|request| request.remaining().len())
            .sum()
    }

    /// How the handle is shut down on [`close`](Self::close).
    #[must_use]
    pub fn close_policy(&self) -> ClosePolicy {
        self.shared.close_policy
    }
}

impl<H, R> Drop for WritableByteSink<H, R>
where
    H: Handle + 'static,
    R: Reactor<H> + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shared.teardown(SinkError::Closed);
    }
}

impl<H, R> Debug for WritableByteSink<H, R>
where
    H: Handle + 'static,
    R: Reactor<H> + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("WritableByteSink")
            .field("open", &state.handle.is_some())
            .field("writable", &state.writable)
            .field("pending", &state.queue.len())
            .field("armed", &state.armed)
            .field("close_policy", &self.shared.close_policy)
            .finish()
    }
}

impl<H, R> Shared<H, R>
where
    H: Handle + 'static,
    R: Reactor<H> + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, State<H, R::Token>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(self: &Arc<Self>, data: &[u8], end: bool) -> WriteFuture {
        let mut state = self.lock();
        if !state.writable {
            trace!(len = data.len(), "write rejected: sink is closed");
            return WriteFuture::ready(Err(SinkError::Closed));
        }
        if end {
            state.writable = false;
        }

        let direct = state.queue.is_empty() && !state.in_flight;
        let mut written = 0;
        if direct && !data.is_empty() {
            let handle = match &state.handle {
                Some(handle) => Arc::clone(handle),
                None => return WriteFuture::ready(Err(SinkError::Closed)),
            };
            state.in_flight = true;
            drop(state);
            let progress = request::attempt(&*handle, data, self.chunk_size);
            state = self.lock();
            state.in_flight = false;

            match progress {
                Progress::Wrote(n) => written = n,
                Progress::Blocked => {}
                Progress::Failed(e) => {
                    debug!(error = %e, "handle failed");
                    let error = SinkError::write(e);
                    let mut completions = Completions::default();
                    let released = self.teardown_locked(&mut state, &error, &mut completions);
                    drop(state);
                    self.release(released);
                    completions.fire();
                    return WriteFuture::ready(Err(error));
                }
            }

            if state.handle.is_none() && written < data.len() {
                // Torn down while the write was running.
                return WriteFuture::ready(Err(SinkError::Closed));
            }
        }

        if written == data.len() && direct {
            trace!(len = data.len(), "write completed directly");
            // Writes may have been queued while ours was in flight.
            self.sync_registration(&mut state);
            drop(state);
            if end {
                self.close();
            }
            return WriteFuture::ready(Ok(written));
        }

        let (mut notifier, future) = notify::channel();
        if end {
            let weak = Arc::downgrade(self);
            notifier.then(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.close();
                }
            });
        }
        let request = WriteRequest::new(&data[written..], written, notifier);
        trace!(len = data.len(), written, "write queued");
        if direct {
            // Anything queued while our write was in flight was submitted after it.
            state.queue.push_front(request);
        } else {
            state.queue.push_back(request);
        }
        self.sync_registration(&mut state);
        future
    }

    /// The reactor callback: flush queued writes until the queue empties or the handle pushes back.
    fn drain(&self) {
        let mut completions = Completions::default();
        let mut released = None;
        let mut state = self.lock();
        if state.in_flight {
            return;
        }

        while let Some(mut request) = state.queue.pop_front() {
            if request.remaining().is_empty() {
                let written = request.written();
                completions.push(request.notifier, Ok(written));
                continue;
            }
            let handle = match &state.handle {
                Some(handle) => Arc::clone(handle),
                None => {
                    completions.push(request.notifier, Err(SinkError::Closed));
                    continue;
                }
            };

            state.in_flight = true;
            drop(state);
            let progress = request::attempt(&*handle, request.remaining(), self.chunk_size);
            state = self.lock();
            state.in_flight = false;

            let failure = match progress {
                Progress::Wrote(n) => {
                    state.stalls = 0;
                    request.advance(n);
                    None
                }
                Progress::Blocked => {
                    state.stalls += 1;
                    match self.max_stalls {
                        Some(max) if state.stalls > max => Some(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "write stalled",
                        )),
                        _ => None,
                    }
                }
                Progress::Failed(e) => Some(e),
            };

            if let Some(e) = failure {
                debug!(error = %e, "handle failed");
                let error = SinkError::write(e);
                completions.push(request.notifier, Err(error.clone()));
                released = self.teardown_locked(&mut state, &error, &mut completions);
                break;
            }

            if request.remaining().is_empty() {
                let written = request.written();
                completions.push(request.notifier, Ok(written));
                continue;
            }
            if state.handle.is_none() {
                // Torn down while the write was running.
                completions.push(request.notifier, Err(SinkError::Closed));
                break;
            }

            trace!(
                remaining = request.remaining().len(),
                written = request.written(),
                stalls = state.stalls,
                "handle pushed back"
            );
            state.queue.push_front(request);
            break;
        }

        self.sync_registration(&mut state);
        drop(state);
        self.release(released);
        completions.fire();
    }

    /// Arm the registration iff there is pending work.
    fn sync_registration(&self, state: &mut State<H, R::Token>) {
        let wanted = !state.queue.is_empty();
        if wanted == state.armed {
            return;
        }
        if let Some(token) = &state.token {
            if wanted {
                self.reactor.arm(token);
            } else {
                self.reactor.disarm(token);
            }
            state.armed = wanted;
        }
    }

    fn close(&self) {
        let handle = self.lock().handle.clone();
        if let Some(handle) = handle {
            if self.close_policy == ClosePolicy::HalfClose {
                if let Err(e) = handle.shutdown_write() {
                    trace!(error = %e, "ignoring half-close failure");
                }
            }
        }
        self.teardown(SinkError::Closed);
    }

    fn teardown(&self, error: SinkError) {
        let mut completions = Completions::default();
        let mut state = self.lock();
        let released = self.teardown_locked(&mut state, &error, &mut completions);
        drop(state);
        self.release(released);
        completions.fire();
    }

    /// Drop the sink's reference to a released handle, closing it first under
    /// [`ClosePolicy::FullClose`] so that other references cannot keep it open.
    fn release(&self, handle: Option<Arc<H>>) {
        if let Some(handle) = handle {
            if self.close_policy == ClosePolicy::FullClose {
                if let Err(e) = handle.close() {
                    trace!(error = %e, "ignoring close failure");
                }
            }
        }
    }

    /// Release the handle, fail everything queued with `error` and cancel the registration.
    ///
    /// Returns the released handle so that it can be closed after the lock.
    fn teardown_locked(
        &self,
        state: &mut State<H, R::Token>,
        error: &SinkError,
        completions: &mut Completions,
    ) -> Option<Arc<H>> {
        state.writable = false;
        let released = state.handle.take();
        let failed = mem::take(&mut state.queue);
        if released.is_some() || !failed.is_empty() {
            debug!(pending = failed.len(), %error, "sink torn down");
        }
        for request in failed {
            completions.push(request.notifier, Err(error.clone()));
        }
        if let Some(token) = state.token.take() {
            self.reactor.cancel(token);
        }
        state.armed = false;
        released
    }
}
