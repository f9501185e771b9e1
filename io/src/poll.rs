use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use writable_sink_core::{Reactor, WritableCallback};

use crate::sys;

/// A [`Reactor`] driven by `poll(2)`.
///
/// Each call to [`turn`](Self::turn) waits until at least one armed registration is writable and
/// invokes the callbacks of all the writable ones. Disarmed registrations are not polled at all, so
/// idle sinks cost nothing.
///
/// Callbacks are invoked with the reactor's internal lock released, so they are free to arm,
/// disarm or cancel any registration, including their own.
///
/// # Examples
///
/// ```
/// # #[cfg(unix)] {
/// use std::os::unix::net::UnixStream;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use writable_sink_io::PollReactor;
///
/// let (socket, _peer) = UnixStream::pair()?;
/// let reactor = PollReactor::new();
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&calls);
/// let token = reactor.register(&socket, Box::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }))?;
///
/// assert_eq!(reactor.turn(Some(Duration::from_millis(10)))?, 0);
/// reactor.arm(&token);
/// assert_eq!(reactor.turn(Some(Duration::from_millis(10)))?, 1);
/// reactor.cancel(token);
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// # }
/// # std::io::Result::Ok(())
/// ```
#[derive(Debug, Default)]
pub struct PollReactor {
    registry: Mutex<Registry>,
}

/// A registration with a [`PollReactor`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PollToken {
    key: usize,
}

#[derive(Debug, Default)]
struct Registry {
    next_key: usize,
    entries: HashMap<usize, Entry>,
}

struct Entry {
    fd: RawFd,
    armed: bool,
    // Taken out while the callback runs.
    callback: Option<WritableCallback>,
}

impl Debug for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("fd", &self.fd)
            .field("armed", &self.armed)
            .field("running", &self.callback.is_none())
            .finish()
    }
}

impl PollReactor {
    /// Create a reactor with no registrations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The number of registrations, armed or not.
    #[must_use]
    pub fn registrations(&self) -> usize {
        self.lock().entries.len()
    }

    /// The number of armed registrations.
    #[must_use]
    pub fn armed(&self) -> usize {
        self.lock().entries.values().filter(|entry| entry.armed).count()
    }

    /// Wait for armed registrations to become writable and dispatch their callbacks, returning how
    /// many callbacks ran.
    ///
    /// `None` waits indefinitely. If nothing is armed this returns `Ok(0)` immediately without
    /// waiting. A wait interrupted by a signal also returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Fails if `poll(2)` itself fails.
    pub fn turn(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let (keys, mut fds): (Vec<usize>, Vec<libc::pollfd>) = self
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.armed)
            .map(|(&key, entry)| {
                let pollfd = libc::pollfd {
                    fd: entry.fd,
                    events: libc::POLLOUT,
                    revents: 0,
                };
                (key, pollfd)
            })
            .unzip();

        if fds.is_empty() {
            return Ok(0);
        }

        match sys::poll(&mut fds, timeout) {
            Ok(0) => return Ok(0),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        let mut dispatched = 0;
        for (key, pollfd) in keys.into_iter().zip(&fds) {
            if pollfd.revents == 0 {
                continue;
            }

            let callback = match self.lock().entries.get_mut(&key) {
                Some(entry) if entry.armed => entry.callback.take(),
                _ => None,
            };
            let mut callback = match callback {
                Some(callback) => callback,
                None => continue,
            };

            tracing::trace!(key, fd = pollfd.fd, revents = pollfd.revents, "handle writable");
            callback();
            dispatched += 1;

            let mut registry = self.lock();
            if let Some(entry) = registry.entries.get_mut(&key) {
                entry.callback = Some(callback);
            } else {
                // Cancelled while running; drop it outside the lock.
                drop(registry);
                drop(callback);
            }
        }
        Ok(dispatched)
    }

    /// Register interest in the writability of `handle`. The registration starts disarmed.
    ///
    /// # Errors
    ///
    /// Fails if the handle's descriptor is negative.
    pub fn register<H: AsRawFd + ?Sized>(
        &self,
        handle: &H,
        callback: WritableCallback,
    ) -> io::Result<PollToken> {
        let fd = handle.as_raw_fd();
        if fd < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot poll a negative file descriptor",
            ));
        }

        let mut registry = self.lock();
        let key = registry.next_key;
        registry.next_key += 1;
        registry.entries.insert(
            key,
            Entry {
                fd,
                armed: false,
                callback: Some(callback),
            },
        );
        tracing::trace!(key, fd, "registered");
        Ok(PollToken { key })
    }

    /// Start polling the registration.
    pub fn arm(&self, token: &PollToken) {
        if let Some(entry) = self.lock().entries.get_mut(&token.key) {
            entry.armed = true;
        }
    }

    /// Stop polling the registration until it is armed again.
    pub fn disarm(&self, token: &PollToken) {
        if let Some(entry) = self.lock().entries.get_mut(&token.key) {
            entry.armed = false;
        }
    }

    /// Remove the registration, dropping its callback.
    pub fn cancel(&self, token: PollToken) {
        let removed = self.lock().entries.remove(&token.key);
        tracing::trace!(key = token.key, "cancelled");
        drop(removed);
    }
}

impl<H: AsRawFd + ?Sized> Reactor<H> for PollReactor {
    type Token = PollToken;

    fn register(&self, handle: &H, callback: WritableCallback) -> io::Result<PollToken> {
        PollReactor::register(self, handle, callback)
    }
    fn arm(&self, token: &PollToken) {
        PollReactor::arm(self, token);
    }
    fn disarm(&self, token: &PollToken) {
        PollReactor::disarm(self, token);
    }
    fn cancel(&self, token: PollToken) {
        PollReactor::cancel(self, token);
    }
}
