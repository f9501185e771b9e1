use std::cmp;
use std::io;
use std::mem::{self, MaybeUninit};
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::c_int;

cfg_if::cfg_if! {
    if #[cfg(target_vendor = "apple")] {
        // Apple kernels fail writes above `INT_MAX` with `EINVAL`.
        #[allow(clippy::cast_sign_loss)]
        const MAX_WRITE: usize = (c_int::MAX - 1) as usize;
    } else {
        // A larger result would not fit in `ssize_t`.
        const MAX_WRITE: usize = isize::MAX as usize;
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
    } else {
        const SEND_FLAGS: c_int = 0;
    }
}

fn cvt(ret: c_int) -> io::Result<c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// The file type bits of the descriptor's mode.
pub(crate) fn file_type(fd: RawFd) -> io::Result<libc::mode_t> {
    let mut stat = MaybeUninit::<libc::stat>::uninit();
    cvt(unsafe { libc::fstat(fd, stat.as_mut_ptr()) })?;
    Ok(unsafe { stat.assume_init() }.st_mode & libc::S_IFMT)
}

/// The `O_ACCMODE` bits the descriptor was opened with.
pub(crate) fn access_mode(fd: RawFd) -> io::Result<c_int> {
    Ok(cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })? & libc::O_ACCMODE)
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    if flags & libc::O_NONBLOCK == 0 {
        cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    }
    Ok(())
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))] {
        pub(crate) fn suppress_sigpipe(fd: RawFd) -> io::Result<()> {
            let on: c_int = 1;
            cvt(unsafe {
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_NOSIGPIPE,
                    &on as *const c_int as *const libc::c_void,
                    mem::size_of::<c_int>() as libc::socklen_t,
                )
            })?;
            Ok(())
        }
    } else {
        pub(crate) fn suppress_sigpipe(_fd: RawFd) -> io::Result<()> {
            Ok(())
        }
    }
}

fn socket_option(fd: RawFd, level: c_int, name: c_int) -> io::Result<c_int> {
    let mut value: c_int = 0;
    #[allow(clippy::cast_possible_truncation)]
    let mut len = mem::size_of::<c_int>() as libc::socklen_t;
    cvt(unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            (&mut value as *mut c_int).cast(),
            &mut len,
        )
    })?;
    Ok(value)
}

/// Whether the socket is a TCP stream.
pub(crate) fn is_tcp(fd: RawFd) -> io::Result<bool> {
    if socket_option(fd, libc::SOL_SOCKET, libc::SO_TYPE)? != libc::SOCK_STREAM {
        return Ok(false);
    }
    let mut addr = MaybeUninit::<libc::sockaddr_storage>::zeroed();
    #[allow(clippy::cast_possible_truncation)]
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    cvt(unsafe { libc::getsockname(fd, addr.as_mut_ptr().cast(), &mut len) })?;
    let family = c_int::from(unsafe { addr.assume_init() }.ss_family);
    Ok(family == libc::AF_INET || family == libc::AF_INET6)
}

/// Disable Nagle's algorithm.
pub(crate) fn set_nodelay(fd: RawFd) -> io::Result<()> {
    let on: c_int = 1;
    #[allow(clippy::cast_possible_truncation)]
    let len = mem::size_of::<c_int>() as libc::socklen_t;
    cvt(unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            (&on as *const c_int).cast(),
            len,
        )
    })?;
    Ok(())
}

pub(crate) fn write(fd: RawFd, buf: &[u8], socket: bool) -> io::Result<usize> {
    let len = cmp::min(buf.len(), MAX_WRITE);
    let ret = unsafe {
        if socket {
            libc::send(fd, buf.as_ptr().cast(), len, SEND_FLAGS)
        } else {
            libc::write(fd, buf.as_ptr().cast(), len)
        }
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        #[allow(clippy::cast_sign_loss)]
        let written = ret as usize;
        Ok(written)
    }
}

/// Whether the peer has hung up or the descriptor is in an error state, without blocking.
pub(crate) fn hung_up(fd: RawFd) -> bool {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    match poll(std::slice::from_mut(&mut pollfd), Some(Duration::from_secs(0))) {
        Ok(0) => false,
        Ok(_) => pollfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0,
        Err(_) => true,
    }
}

pub(crate) fn shutdown_write(fd: RawFd) -> io::Result<()> {
    cvt(unsafe { libc::shutdown(fd, libc::SHUT_WR) })?;
    Ok(())
}

/// Wait for events on `fds`, returning how many have non-zero `revents`.
///
/// `None` waits indefinitely. Sub-millisecond timeouts round up so that they still sleep.
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout = match timeout {
        None => -1,
        Some(timeout) => {
            let millis = (timeout.as_nanos() + 999_999) / 1_000_000;
            #[allow(clippy::cast_possible_truncation)]
            let millis = cmp::min(millis, c_int::MAX as u128) as c_int;
            millis
        }
    };
    let ready = cvt(unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) })?;
    #[allow(clippy::cast_sign_loss)]
    let ready = ready as usize;
    Ok(ready)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_length_fits_the_platform() {
        assert!(MAX_WRITE <= isize::MAX as usize);
        #[cfg(target_vendor = "apple")]
        assert!(MAX_WRITE < c_int::MAX as usize);
    }
}
