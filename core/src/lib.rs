//! Core traits consumed by the writable-sink write-queue engine.
//!
//! The engine never performs I/O readiness tracking or raw syscalls itself. Instead it talks to a
//! [`Handle`], which performs single non-blocking writes, and a [`Reactor`], which tells it when
//! the handle is writable again.
//!
//! See the `writable-sink` crate for the engine built on these.
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

mod handle;
pub use handle::*;

mod reactor;
pub use reactor::*;

/// How a sink shuts its handle down when it is closed gracefully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClosePolicy {
    /// Shut down only the write direction, leaving the read direction of a duplex resource open.
    HalfClose,
    /// Release the handle entirely.
    FullClose,
}

impl ClosePolicy {
    /// The policy appropriate for a handle: [`HalfClose`](Self::HalfClose) for duplex resources,
    /// [`FullClose`](Self::FullClose) otherwise.
    #[must_use]
    pub fn for_handle<H: Handle + ?Sized>(handle: &H) -> Self {
        if handle.is_duplex() {
            Self::HalfClose
        } else {
            Self::FullClose
        }
    }
}

impl Default for ClosePolicy {
    fn default() -> Self {
        Self::FullClose
    }
}
