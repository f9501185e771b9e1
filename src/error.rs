use std::io;
use std::sync::Arc;

use thiserror::Error;

/// An error produced by a [`WritableByteSink`](crate::WritableByteSink).
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The handle was rejected when the sink was constructed: it is not a stream, is not writable,
    /// or could not be registered with the reactor.
    #[error("invalid handle: {0}")]
    InvalidHandle(#[source] Arc<io::Error>),

    /// The sink was no longer accepting writes, or it was closed before the write completed.
    #[error("sink is closed")]
    Closed,

    /// The handle failed. The same error is delivered to every write that was outstanding at the
    /// time.
    #[error("write failed: {0}")]
    Write(#[source] Arc<io::Error>),
}

impl SinkError {
    pub(crate) fn invalid_handle(error: io::Error) -> Self {
        Self::InvalidHandle(Arc::new(error))
    }

    pub(crate) fn write(error: io::Error) -> Self {
        Self::Write(Arc::new(error))
    }

    /// The I/O error kind corresponding to this error.
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::InvalidHandle(_) => io::ErrorKind::InvalidInput,
            Self::Closed => io::ErrorKind::NotConnected,
            Self::Write(e) => e.kind(),
        }
    }

    /// Whether this is [`SinkError::Closed`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The underlying I/O error, for [`InvalidHandle`](Self::InvalidHandle) and
    /// [`Write`](Self::Write).
    #[must_use]
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::InvalidHandle(e) | Self::Write(e) => Some(&**e),
            Self::Closed => None,
        }
    }
}

impl From<SinkError> for io::Error {
    fn from(error: SinkError) -> Self {
        io::Error::new(error.kind(), error)
    }
}
