use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

/// A writable I/O resource that can be written to without blocking.
///
/// All methods take `&self` so that a sink can perform a write without holding its own lock: the
/// handle must tolerate being written to through a shared reference, as `&TcpStream` does.
///
/// Once a handle has been given to a sink, nothing else may read from, write to or close it. Doing
/// so is not memory-unsafe, but the ordering and delivery guarantees of the sink no longer hold.
pub trait Handle: Send + Sync {
    /// Validate that this handle is a writable stream and put it into non-blocking mode.
    ///
    /// This is called exactly once, when a sink adopts the handle. The default implementation
    /// accepts the handle as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is not a stream, is not writable, or could not be made
    /// non-blocking.
    fn prepare(&self) -> io::Result<()> {
        Ok(())
    }

    /// Attempt a single non-blocking write of `buf`, returning how many bytes were accepted.
    ///
    /// When the handle is full this should fail with [`io::ErrorKind::WouldBlock`] or return
    /// `Ok(0)`; the sink treats both as transient backpressure unless [`at_eof`](Self::at_eof)
    /// reports otherwise.
    ///
    /// # Errors
    ///
    /// [`Interrupted`](io::ErrorKind::Interrupted) is retried immediately. Any other error except
    /// [`WouldBlock`](io::ErrorKind::WouldBlock) is terminal for the sink.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Whether the handle has been closed or reached end-of-stream, so that a zero-length write
    /// is a failure and not backpressure.
    ///
    /// The default implementation returns `false`.
    fn at_eof(&self) -> bool {
        false
    }

    /// Whether the handle is duplex, i.e. it also has a read direction that a half-close would
    /// leave open.
    ///
    /// The default implementation returns `false`.
    fn is_duplex(&self) -> bool {
        false
    }

    /// Shut down the write direction of the handle.
    ///
    /// The default implementation does nothing.
    ///
    /// # Errors
    ///
    /// Errors are reported but sinks ignore them, since the other end may already be gone.
    fn shutdown_write(&self) -> io::Result<()> {
        Ok(())
    }

    /// Close the underlying resource, even while other references to this handle are alive.
    ///
    /// A sink with [`ClosePolicy::FullClose`](crate::ClosePolicy::FullClose) calls this once when it
    /// releases the handle, so that the peer sees end-of-stream regardless of who else holds the
    /// handle. Writes after this should fail. The default implementation does nothing and leaves
    /// closing to `Drop`.
    ///
    /// # Errors
    ///
    /// Errors are reported but sinks ignore them.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

macro_rules! forward_handle {
    ($($ty:ty),*) => {
        $(
            impl<H: Handle + ?Sized> Handle for $ty {
                #[inline]
                fn prepare(&self) -> io::Result<()> {
                    (**self).prepare()
                }
                #[inline]
                fn write(&self, buf: &[u8]) -> io::Result<usize> {
                    (**self).write(buf)
                }
                #[inline]
                fn at_eof(&self) -> bool {
                    (**self).at_eof()
                }
                #[inline]
                fn is_duplex(&self) -> bool {
                    (**self).is_duplex()
                }
                #[inline]
                fn shutdown_write(&self) -> io::Result<()> {
                    (**self).shutdown_write()
                }
                #[inline]
                fn close(&self) -> io::Result<()> {
                    (**self).close()
                }
            }
        )*
    };
}

forward_handle!(Arc<H>, Box<H>);

impl Handle for io::Sink {
    #[inline]
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

impl Handle for TcpStream {
    fn prepare(&self) -> io::Result<()> {
        // Surfaces a pending connection error before any data is queued.
        if let Some(e) = self.take_error()? {
            return Err(e);
        }
        // Segments go out as soon as the sink writes them.
        self.set_nodelay(true)?;
        self.set_nonblocking(true)
    }
    #[inline]
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }
    #[inline]
    fn is_duplex(&self) -> bool {
        true
    }
    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[cfg(unix)]
impl Handle for std::os::unix::net::UnixStream {
    fn prepare(&self) -> io::Result<()> {
        if let Some(e) = self.take_error()? {
            return Err(e);
        }
        self.set_nonblocking(true)
    }
    #[inline]
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }
    #[inline]
    fn is_duplex(&self) -> bool {
        true
    }
    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[cfg(test)]
#[allow(dead_code)]
fn test_impls_traits() {
    fn assert_impls<H: Handle>() {}

    assert_impls::<io::Sink>();
    assert_impls::<Arc<io::Sink>>();
    assert_impls::<Box<dyn Handle>>();
    assert_impls::<Arc<Box<TcpStream>>>();
}
