//! In-memory host: a process table, an allocator and an image store.
//!
//! `SimHost` models exactly the host behaviors the loader depends on,
//! with knobs for the awkward ones: a spawned process takes a while to
//! reach its waiting state, a process ignores the first N termination
//! signals, spawn or canonicalization fails outright. Delays are counted,
//! never slept, so retry-budget tests run in microseconds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::hunk::{ByteStream, MemoryStream};

use super::{HostError, HostResult, ProcessHost, ProcessToken, Segment};

/// First segment base handed out. Arbitrary, nonzero, recognizable in
/// test failures.
const BASE_FLOOR: u64 = 0x0010_0000;

/// Gap kept between consecutive allocations.
const BASE_GAP: u64 = 0x20;

// ---------------------------------------------------------------------------
// Image description
// ---------------------------------------------------------------------------

/// One segment of a module as the host would load it: `data` is copied in
/// at the segment base and the rest of `mem_len` is zero-filled.
#[derive(Debug, Clone)]
pub struct SimSegment {
    pub data: Vec<u8>,
    pub mem_len: u32,
}

impl SimSegment {
    /// A fully initialized segment (code or data).
    #[must_use]
    pub fn from_data(data: Vec<u8>) -> Self {
        let mem_len = data.len() as u32;
        Self { data, mem_len }
    }

    /// An uninitialized segment (bss).
    #[must_use]
    pub fn zeroed(mem_len: u32) -> Self {
        Self {
            data: Vec::new(),
            mem_len,
        }
    }
}

/// A loadable module image: the raw hunk stream plus the segments the
/// host materializes when the module's process starts.
#[derive(Debug, Clone, Default)]
pub struct SimImage {
    pub bytes: Vec<u8>,
    pub segments: Vec<SimSegment>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcState {
    /// Spawned, still initializing; invisible to process lookup.
    Ready,
    /// Parked and waiting for work; visible to process lookup.
    Waiting,
    Dead,
}

#[derive(Debug)]
struct SimProcess {
    token: ProcessToken,
    command: String,
    state: ProcState,
    /// Lookups to absorb before the process may turn `Waiting`.
    latency: u32,
    /// Termination signals to shrug off before actually dying.
    stubborn: u32,
    segments: Vec<u64>,
}

#[derive(Debug)]
struct Allocation {
    owner: ProcessToken,
    base: u64,
    bytes: Vec<u8>,
}

struct SimState {
    images: HashMap<String, SimImage>,
    aliases: HashMap<String, String>,
    procs: Vec<SimProcess>,
    allocs: Vec<Allocation>,
    next_token: u64,
    next_base: u64,
    spawn_latency: u32,
    signals_ignored: u32,
    spawn_fails: bool,
    canonical_fails: bool,
    find_calls: u64,
    delay_calls: u64,
    signals_sent: u64,
    total_delay: Duration,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            images: HashMap::new(),
            aliases: HashMap::new(),
            procs: Vec::new(),
            allocs: Vec::new(),
            next_token: 1,
            next_base: BASE_FLOOR,
            spawn_latency: 0,
            signals_ignored: 0,
            spawn_fails: false,
            canonical_fails: false,
            find_calls: 0,
            delay_calls: 0,
            signals_sent: 0,
            total_delay: Duration::ZERO,
        }
    }
}

impl SimState {
    fn resolve<'a>(&'a self, path: &'a str) -> &'a str {
        self.aliases.get(path).map_or(path, String::as_str)
    }

    fn free_allocations(&mut self, owner: ProcessToken) {
        self.allocs.retain(|alloc| alloc.owner != owner);
    }
}

// ---------------------------------------------------------------------------
// SimHost
// ---------------------------------------------------------------------------

/// Shared handle to the simulated host. Clones see the same state, so a
/// test can keep one handle for knobs and counters while the loader owns
/// another.
#[derive(Clone)]
pub struct SimHost {
    state: Arc<Mutex<SimState>>,
}

impl SimHost {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Make an image openable and spawnable under `path`.
    pub fn install_image(&self, path: &str, image: SimImage) {
        self.state.lock().images.insert(path.to_string(), image);
    }

    /// Make `alias` open and canonicalize to an installed image's path.
    pub fn register_alias(&self, alias: &str, canonical: &str) {
        self.state
            .lock()
            .aliases
            .insert(alias.to_string(), canonical.to_string());
    }

    // -- knobs --------------------------------------------------------------

    /// Spawned processes absorb this many lookups before turning visible.
    pub fn set_spawn_latency(&self, lookups: u32) {
        self.state.lock().spawn_latency = lookups;
    }

    /// Spawned processes shrug off this many termination signals.
    pub fn set_signals_ignored(&self, signals: u32) {
        self.state.lock().signals_ignored = signals;
    }

    pub fn set_spawn_fails(&self, fails: bool) {
        self.state.lock().spawn_fails = fails;
    }

    pub fn set_canonical_fails(&self, fails: bool) {
        self.state.lock().canonical_fails = fails;
    }

    // -- out-of-band control ------------------------------------------------

    /// Exit a process without the loader's involvement, freeing its
    /// memory. Models a module that crashed or quit on its own.
    pub fn kill(&self, token: ProcessToken) {
        let mut state = self.state.lock();
        if let Some(proc) = state.procs.iter_mut().find(|p| p.token == token) {
            proc.state = ProcState::Dead;
        }
        state.free_allocations(token);
    }

    /// Read a big-endian word out of whichever allocation covers
    /// `address`. `None` when nothing does, exactly like a dangling
    /// pointer would be.
    #[must_use]
    pub fn peek_u32(&self, address: u64) -> Option<u32> {
        let state = self.state.lock();
        for alloc in &state.allocs {
            if address < alloc.base {
                continue;
            }
            let Ok(at) = usize::try_from(address - alloc.base) else {
                continue;
            };
            if let Some(word) = alloc.bytes.get(at..).and_then(|tail| tail.get(..4)) {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(word);
                return Some(u32::from_be_bytes(buf));
            }
        }
        None
    }

    // -- counters -----------------------------------------------------------

    #[must_use]
    pub fn find_calls(&self) -> u64 {
        self.state.lock().find_calls
    }

    #[must_use]
    pub fn delay_calls(&self) -> u64 {
        self.state.lock().delay_calls
    }

    #[must_use]
    pub fn signals_sent(&self) -> u64 {
        self.state.lock().signals_sent
    }

    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.state.lock().total_delay
    }

    #[must_use]
    pub fn live_processes(&self) -> usize {
        self.state
            .lock()
            .procs
            .iter()
            .filter(|p| p.state != ProcState::Dead)
            .count()
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessHost for SimHost {
    fn open_stream(&self, path: &str) -> HostResult<Box<dyn ByteStream>> {
        let state = self.state.lock();
        let canonical = state.resolve(path);
        match state.images.get(canonical) {
            Some(image) => Ok(Box::new(MemoryStream::new(image.bytes.clone()))),
            None => Err(HostError::NotFound),
        }
    }

    fn canonical_name(&self, path: &str) -> HostResult<String> {
        let state = self.state.lock();
        if state.canonical_fails {
            return Err(HostError::Unsupported);
        }
        let canonical = state.resolve(path);
        if state.images.contains_key(canonical) {
            Ok(canonical.to_string())
        } else {
            Err(HostError::NotFound)
        }
    }

    fn spawn_detached(&self, command: &str) -> HostResult<()> {
        let mut state = self.state.lock();
        if state.spawn_fails {
            return Err(HostError::Io {
                kind: std::io::ErrorKind::Other,
            });
        }
        let image = match state.images.get(command) {
            Some(image) => image.clone(),
            None => return Err(HostError::NotFound),
        };

        let token = ProcessToken::new(state.next_token);
        state.next_token += 1;

        let mut segments = Vec::with_capacity(image.segments.len());
        for spec in &image.segments {
            let base = state.next_base;
            let mem_len = (spec.mem_len as usize).max(spec.data.len());
            let mut bytes = spec.data.clone();
            bytes.resize(mem_len, 0);
            state.next_base = base + ((mem_len as u64 + 7) & !7) + BASE_GAP;
            state.allocs.push(Allocation {
                owner: token,
                base,
                bytes,
            });
            segments.push(base);
        }

        let (latency, state_kind) = if state.spawn_latency == 0 {
            (0, ProcState::Waiting)
        } else {
            (state.spawn_latency, ProcState::Ready)
        };
        let stubborn = state.signals_ignored;
        state.procs.push(SimProcess {
            token,
            command: command.to_string(),
            state: state_kind,
            latency,
            stubborn,
            segments,
        });
        Ok(())
    }

    fn find_waiting_process(&self, command: &str) -> Option<ProcessToken> {
        let mut state = self.state.lock();
        state.find_calls += 1;
        let mut result = None;
        for proc in &mut state.procs {
            if proc.command != command || proc.state == ProcState::Dead {
                continue;
            }
            match proc.state {
                ProcState::Waiting => result = Some(proc.token),
                ProcState::Ready => {
                    if proc.latency == 0 {
                        proc.state = ProcState::Waiting;
                        result = Some(proc.token);
                    } else {
                        proc.latency -= 1;
                    }
                }
                ProcState::Dead => {}
            }
            // Only the oldest live match is considered, the same way a
            // process table lookup by name stops at the first hit.
            break;
        }
        result
    }

    fn process_alive(&self, token: ProcessToken) -> bool {
        self.state
            .lock()
            .procs
            .iter()
            .any(|p| p.token == token && p.state != ProcState::Dead)
    }

    fn signal_terminate(&self, token: ProcessToken) -> bool {
        let mut state = self.state.lock();
        state.signals_sent += 1;
        let Some(proc) = state
            .procs
            .iter_mut()
            .find(|p| p.token == token && p.state != ProcState::Dead)
        else {
            return false;
        };
        if proc.stubborn > 0 {
            proc.stubborn -= 1;
        } else {
            proc.state = ProcState::Dead;
            state.free_allocations(token);
        }
        true
    }

    fn segment_chain(&self, token: ProcessToken) -> Vec<Segment> {
        let state = self.state.lock();
        state
            .procs
            .iter()
            .find(|p| p.token == token && p.state != ProcState::Dead)
            .map(|p| p.segments.iter().map(|&base| Segment { base }).collect())
            .unwrap_or_default()
    }

    fn delay(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.delay_calls += 1;
        state.total_delay += duration;
    }
}
