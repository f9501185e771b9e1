//! Unix file-descriptor handles and a `poll(2)` reactor for writable-sink.
//!
//! [`FdHandle`] adopts any socket, pipe, character device or regular file opened for writing.
//! [`PollReactor`] watches such descriptors for writability. Both are only available on Unix;
//! on other platforms this crate is empty.

#![warn(
    clippy::pedantic,
    rust_2018_idioms,
    missing_docs,
    unused_qualifications,
    missing_debug_implementations,
    explicit_outlives_requirements,
    unused_lifetimes
)]
#![allow(clippy::module_name_repetitions)]

mod sys;

#[cfg(unix)]
mod fd;
#[cfg(unix)]
pub use fd::*;

#[cfg(unix)]
mod poll;
#[cfg(unix)]
pub use poll::*;

#[cfg(all(test, unix))]
mod test_utils {
    use std::fs::File;
    use std::os::unix::io::FromRawFd;

    pub(crate) fn pipe() -> (File, File) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) }
    }
}
