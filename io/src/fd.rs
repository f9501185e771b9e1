use std::convert::TryFrom;
use std::fmt::{self, Debug, Formatter};
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use writable_sink_core::Handle;

use crate::sys;

/// The kind of stream a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FdKind {
    /// A socket of any domain. Sockets are duplex and support half-closing.
    Socket,
    /// A pipe or FIFO.
    Pipe,
    /// A character device such as a terminal or `/dev/null`.
    CharDevice,
    /// A regular file.
    File,
}

impl FdKind {
    fn of(fd: RawFd) -> io::Result<Self> {
        match sys::file_type(fd)? {
            libc::S_IFSOCK => Ok(Self::Socket),
            libc::S_IFIFO => Ok(Self::Pipe),
            libc::S_IFCHR => Ok(Self::CharDevice),
            libc::S_IFREG => Ok(Self::File),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file descriptor is not a stream",
            )),
        }
    }
}

/// An owned Unix file descriptor used as the handle of a sink.
///
/// Preparing the handle checks that the descriptor was opened for writing and switches it to
/// non-blocking mode. Writes go straight to the kernel: nothing is buffered in user space, so the
/// sink alone decides what to do when the descriptor is full. TCP sockets also have Nagle's
/// algorithm disabled.
///
/// [`close`](Handle::close) closes the descriptor even if the handle is shared; writes through
/// any remaining reference then fail with [`io::ErrorKind::BrokenPipe`].
///
/// # Examples
///
/// ```
/// # #[cfg(unix)] {
/// use std::os::unix::net::UnixStream;
/// use writable_sink_io::{FdHandle, FdKind};
///
/// let (ours, _theirs) = UnixStream::pair()?;
/// let handle = FdHandle::from_fd(ours)?;
/// assert_eq!(handle.kind(), FdKind::Socket);
/// # }
/// # std::io::Result::Ok(())
/// ```
pub struct FdHandle {
    // `None` once closed.
    fd: RwLock<Option<OwnedFd>>,
    kind: FdKind,
}

impl FdHandle {
    /// Adopt a descriptor.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::InvalidInput`] if the descriptor is not a socket, pipe,
    /// character device or regular file.
    pub fn from_fd(fd: impl Into<OwnedFd>) -> io::Result<Self> {
        let fd = fd.into();
        let kind = FdKind::of(fd.as_raw_fd())?;
        Ok(Self {
            fd: RwLock::new(Some(fd)),
            kind,
        })
    }

    fn fd(&self) -> RwLockReadGuard<'_, Option<OwnedFd>> {
        self.fd.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_fd<T>(&self, f: impl FnOnce(RawFd) -> io::Result<T>) -> io::Result<T> {
        match &*self.fd() {
            Some(fd) => f(fd.as_raw_fd()),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "file descriptor is closed",
            )),
        }
    }

    /// The kind of stream this descriptor refers to.
    #[must_use]
    pub fn kind(&self) -> FdKind {
        self.kind
    }

    /// Give up ownership of the descriptor, unless it has been closed.
    #[must_use]
    pub fn into_inner(self) -> Option<OwnedFd> {
        self.fd.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Handle for FdHandle {
    fn prepare(&self) -> io::Result<()> {
        self.with_fd(|fd| {
            if sys::access_mode(fd)? == libc::O_RDONLY {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "file descriptor is not writable",
                ));
            }
            if self.kind == FdKind::Socket {
                sys::suppress_sigpipe(fd)?;
                if sys::is_tcp(fd)? {
                    sys::set_nodelay(fd)?;
                }
            }
            sys::set_nonblocking(fd)?;
            tracing::trace!(fd, kind = ?self.kind, "prepared descriptor");
            Ok(())
        })
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.with_fd(|fd| sys::write(fd, buf, self.kind == FdKind::Socket))
    }

    fn at_eof(&self) -> bool {
        match &*self.fd() {
            Some(fd) => sys::hung_up(fd.as_raw_fd()),
            None => true,
        }
    }

    fn is_duplex(&self) -> bool {
        self.kind == FdKind::Socket
    }

    fn shutdown_write(&self) -> io::Result<()> {
        match (&*self.fd(), self.kind) {
            (Some(fd), FdKind::Socket) => sys::shutdown_write(fd.as_raw_fd()),
            _ => Ok(()),
        }
    }

    fn close(&self) -> io::Result<()> {
        // Waits for any write in progress.
        let fd = self
            .fd
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(fd) = fd {
            tracing::trace!(fd = fd.as_raw_fd(), "closing descriptor");
        }
        Ok(())
    }
}

impl Debug for FdHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdHandle")
            .field("fd", &self.as_raw_fd())
            .field("kind", &self.kind)
            .finish()
    }
}

impl AsRawFd for FdHandle {
    /// Returns `-1` once the descriptor has been closed.
    fn as_raw_fd(&self) -> RawFd {
        self.fd().as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }
}

macro_rules! try_from_fd {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<$ty> for FdHandle {
                type Error = io::Error;

                fn try_from(value: $ty) -> io::Result<Self> {
                    Self::from_fd(value)
                }
            }
        )*
    };
}

try_from_fd!(OwnedFd, File, UnixStream, std::net::TcpStream);

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::OpenOptions;
    use std::io::Read;

    use writable_sink_core::ClosePolicy;

    use crate::test_utils::pipe;

    #[test]
    fn pipe_write_end() {
        let (mut read, write) = pipe();
        let handle = FdHandle::try_from(write).unwrap();
        assert_eq!(handle.kind(), FdKind::Pipe);
        assert!(!handle.is_duplex());
        assert_eq!(ClosePolicy::for_handle(&handle), ClosePolicy::FullClose);

        handle.prepare().unwrap();
        assert_eq!(handle.write(b"hello").unwrap(), 5);
        assert!(!handle.at_eof());
        drop(handle);

        let mut received = Vec::new();
        read.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"hello");
    }

    #[test]
    fn read_end_is_rejected() {
        let (read, _write) = pipe();
        let handle = FdHandle::from_fd(read).unwrap();
        let err = handle.prepare().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "file descriptor is not writable");
    }

    #[test]
    fn read_only_file_is_rejected() {
        let file = OpenOptions::new().read(true).open("/dev/null").unwrap();
        let handle = FdHandle::from_fd(file).unwrap();
        assert_eq!(handle.kind(), FdKind::CharDevice);
        assert_eq!(
            handle.prepare().unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn directory_is_not_a_stream() {
        let dir = File::open("/").unwrap();
        let err = FdHandle::from_fd(dir).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "file descriptor is not a stream");
    }

    #[test]
    fn full_pipe_would_block() {
        let (_read, write) = pipe();
        let handle = FdHandle::from_fd(write).unwrap();
        handle.prepare().unwrap();

        let chunk = [0; 4096];
        let err = loop {
            match handle.write(&chunk) {
                Ok(_) => {}
                Err(e) => break e,
            }
        };
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(!handle.at_eof());
    }

    #[test]
    fn closed_reader_is_eof() {
        let (read, write) = pipe();
        let handle = FdHandle::from_fd(write).unwrap();
        handle.prepare().unwrap();
        drop(read);

        assert!(handle.at_eof());
        assert_eq!(
            handle.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn socket_half_close() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let handle = FdHandle::from_fd(ours).unwrap();
        assert!(handle.is_duplex());
        handle.prepare().unwrap();
        assert_eq!(handle.write(b"bye").unwrap(), 3);
        handle.shutdown_write().unwrap();

        let mut received = Vec::new();
        theirs.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"bye");
    }

    #[test]
    fn close_through_a_shared_reference() {
        let (mut read, write) = pipe();
        let handle = std::sync::Arc::new(FdHandle::from_fd(write).unwrap());
        let kept = std::sync::Arc::clone(&handle);
        handle.prepare().unwrap();
        assert_eq!(handle.write(b"last").unwrap(), 4);

        handle.close().unwrap();
        assert_eq!(kept.as_raw_fd(), -1);
        assert!(kept.at_eof());
        assert_eq!(
            kept.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );

        // The write end is gone although `kept` is alive.
        let mut received = Vec::new();
        read.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"last");
        drop(handle);
        assert!(std::sync::Arc::try_unwrap(kept)
            .unwrap()
            .into_inner()
            .is_none());
    }

    #[test]
    fn tcp_sockets_disable_nagle() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let _accepted = listener.accept().unwrap();
        stream.set_nodelay(false).unwrap();
        let observer = stream.try_clone().unwrap();

        let handle = FdHandle::try_from(stream).unwrap();
        assert_eq!(handle.kind(), FdKind::Socket);
        handle.prepare().unwrap();
        assert!(observer.nodelay().unwrap());
    }

    #[test]
    fn unix_sockets_are_not_tcp() {
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let handle = FdHandle::from_fd(ours).unwrap();
        handle.prepare().unwrap();
    }
}
