use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use writable_sink_core::Handle;

/// What a [`ScriptedHandle`] does on one call to `write`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    /// Accept up to this many bytes.
    Accept(usize),
    /// Fail with `WouldBlock`.
    Block,
    /// Return `Ok(0)` while still open.
    Zero,
    /// Return `Ok(0)` and report end-of-stream from then on.
    Eof,
    /// Fail with this kind of error.
    Fail(io::ErrorKind),
}

/// Everything a test can observe about a [`ScriptedHandle`], shared with it.
#[derive(Debug, Default)]
pub(crate) struct Probe {
    state: Mutex<ProbeState>,
}

#[derive(Debug, Default)]
struct ProbeState {
    script: VecDeque<Step>,
    // Bytes accepted per call once the script runs out. `None` accepts everything.
    limit: Option<usize>,
    eof: bool,
    calls: usize,
    chunks: Vec<Vec<u8>>,
    shutdowns: usize,
    closes: usize,
    released: bool,
}

impl Probe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap()
    }

    /// Every non-empty chunk the handle accepted, in order.
    pub(crate) fn chunks(&self) -> Vec<Vec<u8>> {
        self.lock().chunks.clone()
    }

    /// All accepted bytes, concatenated.
    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.lock().chunks.concat()
    }

    /// How many times `write` was called.
    pub(crate) fn calls(&self) -> usize {
        self.lock().calls
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.lock().shutdowns
    }

    /// How many times `close` was called.
    pub(crate) fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Whether the handle has been dropped.
    pub(crate) fn released(&self) -> bool {
        self.lock().released
    }

    /// Append steps to the script.
    pub(crate) fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.lock().script.extend(steps);
    }

    pub(crate) fn set_limit(&self, limit: Option<usize>) {
        self.lock().limit = limit;
    }
}

/// An in-memory handle that follows a script, then accepts bytes up to a per-call limit.
#[derive(Debug)]
pub(crate) struct ScriptedHandle {
    probe: Arc<Probe>,
    duplex: bool,
    reject: Option<io::ErrorKind>,
}

impl ScriptedHandle {
    pub(crate) fn new(script: impl IntoIterator<Item = Step>) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        probe.push(script);
        let handle = Self {
            probe: Arc::clone(&probe),
            duplex: false,
            reject: None,
        };
        (handle, probe)
    }

    pub(crate) fn unlimited() -> (Self, Arc<Probe>) {
        Self::new(Vec::new())
    }

    /// Accept at most `limit` bytes per call.
    pub(crate) fn limited(limit: usize) -> (Self, Arc<Probe>) {
        let (handle, probe) = Self::unlimited();
        probe.set_limit(Some(limit));
        (handle, probe)
    }

    pub(crate) fn duplex(mut self) -> Self {
        self.duplex = true;
        self
    }

    /// Fail `prepare` with this kind of error.
    pub(crate) fn rejecting(mut self, kind: io::ErrorKind) -> Self {
        self.reject = Some(kind);
        self
    }
}

impl Handle for ScriptedHandle {
    fn prepare(&self) -> io::Result<()> {
        match self.reject {
            Some(kind) => Err(io::Error::new(kind, "rejected by script")),
            None => Ok(()),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        assert!(!buf.is_empty(), "attempted to write an empty buffer");
        let mut state = self.probe.lock();
        state.calls += 1;
        let step = state.script.pop_front();
        let amount = match step {
            Some(Step::Accept(n)) => n,
            Some(Step::Block) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(Step::Zero) => return Ok(0),
            Some(Step::Eof) => {
                state.eof = true;
                return Ok(0);
            }
            Some(Step::Fail(kind)) => return Err(kind.into()),
            None => state.limit.unwrap_or(usize::MAX),
        };
        let amount = amount.min(buf.len());
        if amount > 0 {
            state.chunks.push(buf[..amount].to_vec());
        }
        Ok(amount)
    }

    fn at_eof(&self) -> bool {
        self.probe.lock().eof
    }

    fn is_duplex(&self) -> bool {
        self.duplex
    }

    fn shutdown_write(&self) -> io::Result<()> {
        self.probe.lock().shutdowns += 1;
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.probe.lock().closes += 1;
        Ok(())
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        if let Ok(mut state) = self.probe.state.lock() {
            state.released = true;
        }
    }
}
