//! The seam between the loader and whatever actually runs processes.
//!
//! The loader never touches a filesystem or a process table directly; it
//! goes through [`ProcessHost`] for everything with a side effect. The
//! in-memory [`SimHost`] implements the trait for tests and the
//! conformance harness.

use std::time::Duration;

use crate::hunk::ByteStream;

pub mod sim;

pub use sim::SimHost;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque identifier for a process the host knows about. Tokens are never
/// reused while a loader holds one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessToken(u64);

impl ProcessToken {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// One entry of a process's loaded segment chain. `base` is the address
/// of the segment payload itself, not of any list node in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub base: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    /// The named image or process does not exist.
    NotFound,
    /// The host cannot perform this operation at all.
    Unsupported,
    /// An underlying I/O failure, reduced to its kind.
    Io { kind: std::io::ErrorKind },
}

impl core::fmt::Display for HostError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HostError::NotFound => f.write_str("not found"),
            HostError::Unsupported => f.write_str("unsupported by this host"),
            HostError::Io { kind } => write!(f, "i/o failure: {kind}"),
        }
    }
}

impl std::error::Error for HostError {}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::Io { kind: err.kind() }
    }
}

pub type HostResult<T> = Result<T, HostError>;

// ---------------------------------------------------------------------------
// The host trait
// ---------------------------------------------------------------------------

/// Everything the loader needs from the outside world.
///
/// The split mirrors how a module comes up: the image is opened and
/// walked as a byte stream, the module's own process is launched detached
/// and then *found again* by command name once it parks itself waiting,
/// and teardown signals that process until it exits. Methods take `&self`
/// so a host can be shared behind a lock; implementations carry their own
/// interior mutability.
pub trait ProcessHost {
    /// Open the module image for reading.
    fn open_stream(&self, path: &str) -> HostResult<Box<dyn ByteStream>>;

    /// Resolve `path` to the canonical name the process table will use.
    fn canonical_name(&self, path: &str) -> HostResult<String>;

    /// Launch `command` as a detached process. No handle comes back; the
    /// caller polls [`ProcessHost::find_waiting_process`] afterwards.
    fn spawn_detached(&self, command: &str) -> HostResult<()>;

    /// Find a process by exact command name, but only once it has parked
    /// itself in its waiting state. A freshly spawned process that is
    /// still initializing is invisible here.
    fn find_waiting_process(&self, command: &str) -> Option<ProcessToken>;

    fn process_alive(&self, token: ProcessToken) -> bool;

    /// Ask the process to terminate. Returns false when the process is
    /// already gone; delivery is not a guarantee of exit.
    fn signal_terminate(&self, token: ProcessToken) -> bool;

    /// The process's loaded segment chain, in load order. Empty when the
    /// token no longer names a live process.
    fn segment_chain(&self, token: ProcessToken) -> Vec<Segment>;

    /// Block between retries.
    fn delay(&self, duration: Duration);
}

impl<H: ProcessHost + ?Sized> ProcessHost for Box<H> {
    fn open_stream(&self, path: &str) -> HostResult<Box<dyn ByteStream>> {
        (**self).open_stream(path)
    }

    fn canonical_name(&self, path: &str) -> HostResult<String> {
        (**self).canonical_name(path)
    }

    fn spawn_detached(&self, command: &str) -> HostResult<()> {
        (**self).spawn_detached(command)
    }

    fn find_waiting_process(&self, command: &str) -> Option<ProcessToken> {
        (**self).find_waiting_process(command)
    }

    fn process_alive(&self, token: ProcessToken) -> bool {
        (**self).process_alive(token)
    }

    fn signal_terminate(&self, token: ProcessToken) -> bool {
        (**self).signal_terminate(token)
    }

    fn segment_chain(&self, token: ProcessToken) -> Vec<Segment> {
        (**self).segment_chain(token)
    }

    fn delay(&self, duration: Duration) {
        (**self).delay(duration)
    }
}
