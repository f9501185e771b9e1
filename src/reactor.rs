use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::sync::atomic::{self, AtomicUsize};
use std::sync::{Mutex, MutexGuard, PoisonError};

use concurrent_queue::ConcurrentQueue;
use writable_sink_core::{Reactor, WritableCallback};

/// A reactor driven by hand, for handles that need no readiness polling.
///
/// Every armed registration is treated as writable: [`dispatch`](Self::dispatch) invokes the
/// callback of each registration that was armed when it was called. This suits in-memory handles
/// and tests, where the caller decides when "the handle became writable".
///
/// Callbacks run on the thread calling `dispatch`, with no lock held, so they may freely arm,
/// disarm or cancel registrations.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use writable_sink::ManualReactor;
///
/// let reactor = ManualReactor::new();
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&calls);
/// let token = reactor.register(Box::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// assert_eq!(reactor.dispatch(), 0);
/// reactor.arm(&token);
/// assert_eq!(reactor.dispatch(), 1);
/// reactor.disarm(&token);
/// assert_eq!(reactor.dispatch(), 0);
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// ```
pub struct ManualReactor {
    entries: Mutex<HashMap<usize, Entry>>,
    /// Keys of registrations waiting to be dispatched. Each key is in here at most once.
    ready: ConcurrentQueue<usize>,
    next_key: AtomicUsize,
}

struct Entry {
    armed: bool,
    /// Whether the key is in the ready queue.
    queued: bool,
    /// Taken while the callback runs.
    callback: Option<WritableCallback>,
}

/// A registration with a [`ManualReactor`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ManualToken {
    key: usize,
}

impl ManualReactor {
    /// Create a reactor with no registrations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ready: ConcurrentQueue::unbounded(),
            next_key: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<usize, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, key: usize, entry: &mut Entry) {
        if !entry.queued {
            entry.queued = true;
            self.ready
                .push(key)
                .expect("the ready queue is unbounded and never closed");
        }
    }

    /// Add a disarmed registration.
    pub fn register(&self, callback: WritableCallback) -> ManualToken {
        let key = self.next_key.fetch_add(1, atomic::Ordering::Relaxed);
        self.lock().insert(
            key,
            Entry {
                armed: false,
                queued: false,
                callback: Some(callback),
            },
        );
        ManualToken { key }
    }

    /// Make the registration eligible for dispatch.
    pub fn arm(&self, token: &ManualToken) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(&token.key) {
            entry.armed = true;
            self.enqueue(token.key, entry);
        }
    }

    /// Stop dispatching to the registration until it is armed again.
    pub fn disarm(&self, token: &ManualToken) {
        if let Some(entry) = self.lock().get_mut(&token.key) {
            entry.armed = false;
        }
    }

    /// Remove the registration and drop its callback.
    ///
    /// If the callback is running, it is dropped once it returns.
    pub fn cancel(&self, token: ManualToken) {
        let removed = self.lock().remove(&token.key);
        drop(removed);
    }

    /// Invoke the callback of every registration that was armed when this was called.
    ///
    /// Registrations that are still armed after their callback returns are dispatched again on the
    /// next call, not this one. Returns the number of callbacks invoked.
    pub fn dispatch(&self) -> usize {
        let mut invoked = 0;
        for _ in 0..self.ready.len() {
            let key = match self.ready.pop() {
                Ok(key) => key,
                Err(_) => break,
            };

            let callback = {
                let mut entries = self.lock();
                let entry = match entries.get_mut(&key) {
                    Some(entry) => entry,
                    None => continue,
                };
                entry.queued = false;
                if !entry.armed {
                    continue;
                }
                match entry.callback.take() {
                    Some(callback) => callback,
                    // Already running on another thread, which will requeue it.
                    None => continue,
                }
            };

            let mut callback = callback;
            callback();
            invoked += 1;

            let mut entries = self.lock();
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.callback = Some(callback);
                    if entry.armed {
                        self.enqueue(key, entry);
                    }
                }
                None => {
                    drop(entries);
                    drop(callback);
                }
            }
        }
        invoked
    }

    /// Dispatch until no registration is armed or `max_rounds` rounds have run.
    ///
    /// Returns the total number of callbacks invoked.
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        let mut invoked = 0;
        for _ in 0..max_rounds {
            match self.dispatch() {
                0 => break,
                n => invoked += n,
            }
        }
        invoked
    }

    /// The number of armed registrations.
    #[must_use]
    pub fn armed(&self) -> usize {
        self.lock().values().filter(|entry| entry.armed).count()
    }

    /// The number of live registrations.
    #[must_use]
    pub fn registrations(&self) -> usize {
        self.lock().len()
    }
}

impl Default for ManualReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ManualReactor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualReactor")
            .field("registrations", &self.registrations())
            .field("armed", &self.armed())
            .field("ready", &self.ready.len())
            .finish()
    }
}

impl<H: ?Sized> Reactor<H> for ManualReactor {
    type Token = ManualToken;

    fn register(&self, _handle: &H, callback: WritableCallback) -> io::Result<Self::Token> {
        Ok(ManualReactor::register(self, callback))
    }
    fn arm(&self, token: &Self::Token) {
        ManualReactor::arm(self, token);
    }
    fn disarm(&self, token: &Self::Token) {
        ManualReactor::disarm(self, token);
    }
    fn cancel(&self, token: Self::Token) {
        ManualReactor::cancel(self, token);
    }
}
