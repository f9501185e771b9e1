#![cfg(all(unix, feature = "os"))]

use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures_lite::future::block_on;
use writable_sink::os::{FdHandle, FdKind, PollReactor};
use writable_sink::{ClosePolicy, Handle, WritableByteSink, WriteFuture};

type Sink = WritableByteSink<FdHandle, Arc<PollReactor>>;

fn socket_sink() -> (Sink, Arc<PollReactor>, UnixStream) {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let handle = FdHandle::try_from(ours).unwrap();
    assert_eq!(handle.kind(), FdKind::Socket);

    let reactor = Arc::new(PollReactor::new());
    let sink = WritableByteSink::new(handle, Arc::clone(&reactor)).unwrap();
    (sink, reactor, theirs)
}

/// A sink over the write end of a fresh pipe, and the read end.
fn pipe_sink() -> (Sink, Arc<PollReactor>, File) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let (read, write) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };

    let handle = FdHandle::try_from(write).unwrap();
    assert_eq!(handle.kind(), FdKind::Pipe);

    let reactor = Arc::new(PollReactor::new());
    let sink = WritableByteSink::new(handle, Arc::clone(&reactor)).unwrap();
    (sink, reactor, read)
}

fn set_nonblocking(file: &File) {
    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    assert!(flags >= 0);
    assert_eq!(
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) },
        0
    );
}

fn drive(reactor: &PollReactor, future: &WriteFuture) {
    for _ in 0..10_000 {
        if future.is_settled() {
            return;
        }
        reactor.turn(Some(Duration::from_millis(100))).unwrap();
    }
    panic!("write never settled");
}

#[test]
fn large_payload_arrives_intact() {
    let (sink, reactor, mut peer) = socket_sink();
    assert_eq!(sink.close_policy(), ClosePolicy::HalfClose);

    let reader = thread::spawn(move || {
        let mut received = Vec::new();
        peer.read_to_end(&mut received).unwrap();
        received
    });

    let payload: Vec<u8> = (0..4 << 20).map(|i: u32| (i % 251) as u8).collect();
    let first = sink.write(&payload[..1 << 20]);
    let second = sink.write(&payload[1 << 20..]);
    drive(&reactor, &second);

    assert_eq!(block_on(first).unwrap(), 1 << 20);
    assert_eq!(block_on(second).unwrap(), 3 << 20);
    assert_eq!(reactor.armed(), 0);

    // Half-closing lets the reader see end of stream.
    assert_eq!(block_on(sink.end(&[])).unwrap(), 0);
    assert_eq!(reactor.registrations(), 0);
    assert!(reader.join().unwrap() == payload);
}

#[test]
fn peer_hang_up_fails_pending_writes() {
    let (sink, reactor, peer) = socket_sink();
    drop(peer);

    let future = sink.write(&vec![0; 1 << 20]);
    drive(&reactor, &future);
    let error = block_on(future).unwrap_err();
    let kind = error.kind();
    assert!(
        kind == io::ErrorKind::BrokenPipe || kind == io::ErrorKind::ConnectionReset,
        "unexpected {:?}",
        error
    );
    assert!(!sink.is_writable());
    assert_eq!(reactor.registrations(), 0);
}

#[test]
fn pipe_round_trip() {
    let (sink, reactor, mut read) = pipe_sink();
    assert_eq!(sink.close_policy(), ClosePolicy::FullClose);

    let reader = thread::spawn(move || {
        let mut received = Vec::new();
        read.read_to_end(&mut received).unwrap();
        received
    });

    let payload: Vec<u8> = (0..1 << 20).map(|i: u32| (i % 239) as u8).collect();
    let future = sink.end(&payload);
    drive(&reactor, &future);
    assert_eq!(block_on(future).unwrap(), payload.len());
    assert_eq!(reactor.registrations(), 0);
    assert!(reader.join().unwrap() == payload);
}

#[test]
fn kept_handle_does_not_hold_pipe_open() {
    let (sink, reactor, mut read) = pipe_sink();
    let kept = sink.handle().unwrap();

    assert_eq!(block_on(sink.write(b"hello")).unwrap(), 5);
    sink.close();
    assert_eq!(reactor.registrations(), 0);

    // With the write end still open this would fail with `WouldBlock` instead of ending.
    set_nonblocking(&read);
    let mut received = Vec::new();
    read.read_to_end(&mut received).unwrap();
    assert_eq!(received, b"hello");

    let error = kept.write(b"late").unwrap_err();
    assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
}

#[test]
fn reader_gone_fails_with_broken_pipe() {
    let (sink, reactor, read) = pipe_sink();

    // Larger than any pipe buffer, so most of it is queued.
    let first = sink.write(&vec![0; 1 << 20]);
    let second = sink.write(b"behind");
    assert!(!first.is_settled());
    assert_eq!(sink.pending(), 2);

    drop(read);
    drive(&reactor, &second);

    let first = block_on(first).unwrap_err();
    let second = block_on(second).unwrap_err();
    assert_eq!(first.kind(), io::ErrorKind::BrokenPipe);
    assert_eq!(second.kind(), io::ErrorKind::BrokenPipe);
    assert!(!sink.is_writable());
    assert!(sink.handle().is_none());
    assert_eq!(reactor.registrations(), 0);
}
