use std::fmt::{self, Debug, Formatter};
use std::io;

use writable_sink_core::Handle;

use crate::notify::Notifier;

/// A write waiting in a sink's queue.
///
/// `written + remaining().len()` always equals the length of the original write.
pub(crate) struct WriteRequest {
    buf: Box<[u8]>,
    // Index into `buf` of the first unwritten byte.
    pos: usize,
    // Bytes written before this request was queued plus those written since.
    written: usize,
    pub(crate) notifier: Notifier,
}

impl WriteRequest {
    /// Queue the unwritten `rest` of a write that has already had `written` bytes accepted.
    pub(crate) fn new(rest: &[u8], written: usize, notifier: Notifier) -> Self {
        Self {
            buf: rest.into(),
            pos: 0,
            written,
            notifier,
        }
    }

    pub(crate) fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub(crate) fn written(&self) -> usize {
        self.written
    }

    /// Record that the first `n` remaining bytes were accepted by the handle.
    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining().len());
        self.pos += n;
        self.written += n;
    }
}

impl Debug for WriteRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("remaining", &self.remaining().len())
            .field("written", &self.written)
            .finish()
    }
}

/// What a single non-blocking write attempt achieved.
#[derive(Debug)]
pub(crate) enum Progress {
    /// The handle accepted this many bytes, at least one.
    Wrote(usize),
    /// The handle is full for now.
    Blocked,
    /// The handle can never accept more bytes.
    Failed(io::Error),
}

/// Attempt to write `buf`, which must not be empty, bounded by `chunk_size`.
///
/// Interrupted writes are retried straight away.
pub(crate) fn attempt<H: Handle + ?Sized>(
    handle: &H,
    buf: &[u8],
    chunk_size: Option<usize>,
) -> Progress {
    debug_assert!(!buf.is_empty());
    let buf = match chunk_size {
        Some(chunk_size) if chunk_size < buf.len() => &buf[..chunk_size],
        _ => buf,
    };
    let result = loop {
        match handle.write(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            result => break result,
        }
    };
    match result {
        Ok(0) if handle.at_eof() => Progress::Failed(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "handle reached end of stream",
        )),
        Ok(0) => Progress::Blocked,
        Ok(n) => Progress::Wrote(n.min(buf.len())),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Progress::Blocked,
        Err(e) => Progress::Failed(e),
    }
}
