use std::num::{NonZeroU32, NonZeroUsize};

use writable_sink_core::{ClosePolicy, Handle, Reactor};

use crate::{SinkError, WritableByteSink};

/// Configuration for a [`WritableByteSink`].
///
/// # Examples
///
/// ```
/// use std::num::NonZeroUsize;
/// use writable_sink::{Builder, ClosePolicy, ManualReactor};
///
/// let sink = Builder::new()
///     .chunk_size(NonZeroUsize::new(8192).unwrap())
///     .close_policy(ClosePolicy::FullClose)
///     .build(std::io::sink(), ManualReactor::new())?;
/// assert_eq!(sink.close_policy(), ClosePolicy::FullClose);
/// # Ok::<_, writable_sink::SinkError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Builder {
    pub(crate) chunk_size: Option<NonZeroUsize>,
    pub(crate) close_policy: Option<ClosePolicy>,
    pub(crate) max_stalls: Option<NonZeroU32>,
}

impl Builder {
    /// A builder with the default configuration: no chunk size bound, the close policy chosen from
    /// [`Handle::is_duplex`], and no bound on stalls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Never pass more than `size` bytes to a single [`Handle::write`] call.
    #[must_use]
    pub fn chunk_size(mut self, size: NonZeroUsize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Override how the handle is shut down on [`close`](WritableByteSink::close).
    #[must_use]
    pub fn close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close_policy = Some(policy);
        self
    }

    /// Fail the sink with [`ErrorKind::TimedOut`](std::io::ErrorKind::TimedOut) once more than
    /// `stalls` consecutive writability notifications fail to write a single byte.
    #[must_use]
    pub fn max_stalls(mut self, stalls: NonZeroU32) -> Self {
        self.max_stalls = Some(stalls);
        self
    }

    /// Adopt `handle` and register it with `reactor`.
    ///
    /// # Errors
    ///
    /// Fails with [`SinkError::InvalidHandle`] if [`Handle::prepare`] rejects the handle or the
    /// reactor cannot register it.
    pub fn build<H, R>(self, handle: H, reactor: R) -> Result<WritableByteSink<H, R>, SinkError>
    where
        H: Handle + 'static,
        R: Reactor<H> + Send + Sync + 'static,
    {
        WritableByteSink::with_config(handle, reactor, self)
    }
}
