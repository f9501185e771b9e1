//! A non-blocking, backpressure-aware byte sink.
//!
//! [`WritableByteSink`] wraps a writable [`Handle`] such as a socket or pipe. Writes are attempted
//! immediately; whatever the handle cannot take right away is queued and flushed, in submission
//! order, each time a [`Reactor`] reports the handle writable. Every write returns a
//! [`WriteFuture`] that resolves once all of its bytes have been accepted.
//!
//! # Features
//!
//! - `os`: Enables the [`os`] module, with file-descriptor handles and a `poll(2)` reactor for
//! Unix. On by default.
//!
//! # Examples
//!
//! ```
//! use futures_lite::future::block_on;
//! use writable_sink::{ManualReactor, WritableByteSink};
//!
//! let sink = WritableByteSink::new(std::io::sink(), ManualReactor::new())?;
//! let first = sink.write(b"hello ");
//! let second = sink.write(b"world");
//! block_on(sink.flush())?;
//! assert_eq!(block_on(first)? + block_on(second)?, 11);
//! # Ok::<_, writable_sink::SinkError>(())
//! ```
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

#[doc(no_inline)]
pub use writable_sink_core::{ClosePolicy, Handle, Reactor, WritableCallback};

mod builder;
pub use builder::Builder;

mod error;
pub use error::SinkError;

mod notify;
pub use notify::{Flush, WriteFuture, WriteResult};

mod reactor;
pub use reactor::{ManualReactor, ManualToken};

mod request;

mod sink;
pub use sink::WritableByteSink;

/// Handles and reactors backed by the operating system.
#[cfg(feature = "os")]
pub mod os {
    #[doc(no_inline)]
    pub use writable_sink_io::*;
}

#[cfg(test)]
mod test_utils;
