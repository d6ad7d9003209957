//! The loader façade: open, sym, close and the one-shot error latch.
//!
//! A module "loads" by running. `open` launches the image as a detached
//! process, waits for it to park itself, then walks the same image file
//! to harvest its exported symbols against the process's real segment
//! addresses. `close` signals the process until it exits. All failures
//! land in a single-slot latch that the next `error` call drains, the
//! way the classic `dlerror` contract works.
//!
//! One loader owns one registry and one latch. Callers that share a
//! loader across threads wrap it in a lock; nothing in here does.

use crate::config::LoaderConfig;
use crate::exports::ExportTable;
use crate::host::{ProcessHost, ProcessToken};
use crate::hunk::scan_exports;
use crate::registry::{InstanceRegistry, ModuleHandle, ModuleInstance};

// ---------------------------------------------------------------------------
// Latched messages
// ---------------------------------------------------------------------------

pub const ERR_OPEN_FILE: &str = "can't open the file";
pub const ERR_CANONICAL_PATH: &str = "can't determine the canonical path";
pub const ERR_START_PROCESS: &str = "can't start the CLI process";
pub const ERR_FIND_PROCESS: &str = "can't find the CLI process";
pub const ERR_PARSE_HUNKS: &str = "can't parse the hunks";
pub const ERR_NULL_CLOSE: &str = "NULL handle passed to dlclose";
pub const ERR_STALE_CLOSE: &str = "unknown module handle passed to dlclose";
pub const ERR_PROCESS_GONE: &str = "the process is no longer running";
pub const ERR_PROCESS_STUCK: &str = "the process didn't respond to the termination signal";

/// One-shot error slot. A second failure before the first is read
/// overwrites the message; reading drains it.
#[derive(Debug, Default)]
struct ErrorLatch {
    pending: Option<&'static str>,
}

impl ErrorLatch {
    fn set(&mut self, message: &'static str) {
        self.pending = Some(message);
    }

    fn take(&mut self) -> Option<&'static str> {
        self.pending.take()
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

pub struct Loader<H: ProcessHost> {
    host: H,
    config: LoaderConfig,
    registry: InstanceRegistry,
    latch: ErrorLatch,
}

impl<H: ProcessHost> Loader<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, LoaderConfig::default())
    }

    pub fn with_config(host: H, config: LoaderConfig) -> Self {
        Self {
            host,
            config,
            registry: InstanceRegistry::new(),
            latch: ErrorLatch::default(),
        }
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    #[must_use]
    pub fn instances(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Load `path`: launch it as a detached process, wait for it to park,
    /// harvest its exports, register the instance. `flags` is accepted
    /// for interface compatibility and has no effect on behavior.
    ///
    /// Any failure latches a message and returns `None`. A parse failure
    /// discards the partial export table but does not tear down the
    /// already-launched process; that matches the historical contract.
    pub fn open(&mut self, path: &str, flags: i32) -> Option<ModuleHandle> {
        log::debug!("open {path:?} flags {flags:#x}");

        let mut stream = match self.host.open_stream(path) {
            Ok(stream) => stream,
            Err(err) => {
                log::debug!("open {path:?}: {err}");
                self.latch.set(ERR_OPEN_FILE);
                return None;
            }
        };

        // The process table knows modules by canonical name, which is not
        // necessarily the path the caller handed us.
        let command = match self.host.canonical_name(path) {
            Ok(command) => command,
            Err(err) => {
                log::debug!("canonicalize {path:?}: {err}");
                self.latch.set(ERR_CANONICAL_PATH);
                return None;
            }
        };

        if let Err(err) = self.host.spawn_detached(&command) {
            log::debug!("spawn {command:?}: {err}");
            self.latch.set(ERR_START_PROCESS);
            return None;
        }

        let Some(token) = self.wait_for_process(&command) else {
            log::debug!("find {command:?}: no waiting process within budget");
            self.latch.set(ERR_FIND_PROCESS);
            return None;
        };

        let segments = self.host.segment_chain(token);
        let mut exports = ExportTable::new();
        match scan_exports(stream.as_mut(), &segments, &mut exports) {
            Ok(stats) => {
                log::debug!(
                    "scanned {command:?}: {} records, {} exports across {} symbol hunks",
                    stats.records,
                    stats.exports,
                    stats.symbol_hunks
                );
            }
            Err(err) => {
                log::debug!("parse {command:?}: {err}");
                self.latch.set(ERR_PARSE_HUNKS);
                return None;
            }
        }

        let handle = self.registry.register(ModuleInstance {
            exports,
            process: token,
        });
        Some(handle)
    }

    /// Resolve an exported name to its address in the module's process.
    /// Misses are silent: a null handle, a stale handle and an unknown
    /// name all return `None` without touching the latch.
    #[must_use]
    pub fn sym(&self, handle: Option<ModuleHandle>, name: impl AsRef<[u8]>) -> Option<u64> {
        let instance = self.registry.get(handle?)?;
        instance.exports.resolve(name.as_ref())
    }

    /// Unload: signal the backing process until it exits, then retire the
    /// registry entry. Returns 0 on success, -1 with a latched message on
    /// any failure. A module whose process already died stays registered;
    /// there is nothing live left to tear down, and the caller finds out
    /// through the latch.
    pub fn close(&mut self, handle: Option<ModuleHandle>) -> i32 {
        let Some(handle) = handle else {
            self.latch.set(ERR_NULL_CLOSE);
            return -1;
        };
        let Some(instance) = self.registry.get(handle) else {
            self.latch.set(ERR_STALE_CLOSE);
            return -1;
        };
        let token = instance.process;

        if !self.host.process_alive(token) {
            self.latch.set(ERR_PROCESS_GONE);
            return -1;
        }

        let mut retries = 0;
        loop {
            self.host.signal_terminate(token);
            if !self.host.process_alive(token) {
                break;
            }
            if retries >= self.config.term_retries {
                log::debug!(
                    "close: process {} still alive after {} signals",
                    token.raw(),
                    retries + 1
                );
                self.latch.set(ERR_PROCESS_STUCK);
                return -1;
            }
            self.host.delay(self.config.retry_delay);
            retries += 1;
        }

        if let Some(mut retired) = self.registry.unregister(handle) {
            retired.exports.clear();
        }
        0
    }

    /// Drain the error latch: the most recent failure's message, or
    /// `None` when nothing failed since the last call.
    pub fn error(&mut self) -> Option<&'static str> {
        self.latch.take()
    }

    /// Poll for the spawned module process until it parks itself in its
    /// waiting state or the retry budget runs out.
    fn wait_for_process(&self, command: &str) -> Option<ProcessToken> {
        let mut retries = 0;
        loop {
            if let Some(token) = self.host.find_waiting_process(command) {
                return Some(token);
            }
            self.host.delay(self.config.retry_delay);
            if retries >= self.config.find_retries {
                return None;
            }
            retries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::{SimHost, SimImage, SimSegment};
    use crate::hunk::{HUNK_CODE, HUNK_END, HUNK_HEADER, HUNK_SYMBOL};

    fn w(buf: &mut Vec<u8>, word: u32) {
        buf.extend_from_slice(&word.to_be_bytes());
    }

    /// A single-code-segment image exporting the given (name, offset)
    /// pairs. Names carry their own leading marker.
    fn image_with_exports(entries: &[(&str, u32)]) -> SimImage {
        let mut bytes = Vec::new();
        w(&mut bytes, HUNK_HEADER);
        w(&mut bytes, 0);
        w(&mut bytes, 1);
        w(&mut bytes, 0);
        w(&mut bytes, 0);
        w(&mut bytes, 8); // segment size in words
        w(&mut bytes, HUNK_CODE);
        w(&mut bytes, 8);
        for _ in 0..8 {
            w(&mut bytes, 0x4E71_4E71);
        }
        w(&mut bytes, HUNK_SYMBOL);
        for &(name, offset) in entries {
            let raw = name.as_bytes();
            let words = raw.len().div_ceil(4).max(1);
            w(&mut bytes, words as u32);
            let mut padded = raw.to_vec();
            padded.resize(words * 4, 0);
            bytes.extend_from_slice(&padded);
            w(&mut bytes, offset);
        }
        w(&mut bytes, 0);
        w(&mut bytes, HUNK_END);

        SimImage {
            bytes,
            segments: vec![SimSegment::from_data(vec![0u8; 32])],
        }
    }

    fn loader_with_image(path: &str, image: SimImage) -> (Loader<SimHost>, SimHost) {
        let host = SimHost::new();
        host.install_image(path, image);
        (Loader::new(host.clone()), host)
    }

    #[test]
    fn test_open_sym_close_round_trip() {
        let (mut loader, host) = loader_with_image(
            "demo.so",
            image_with_exports(&[("_alpha", 0x4), ("_beta", 0x10)]),
        );

        let handle = loader.open("demo.so", 0);
        assert!(handle.is_some());
        assert_eq!(loader.instances().len(), 1);

        let token = loader.instances().iter().next().map(|(_, i)| i.process);
        let base = host.segment_chain(token.unwrap())[0].base;
        assert_eq!(loader.sym(handle, b"alpha"), Some(base + 0x4));
        assert_eq!(loader.sym(handle, b"beta"), Some(base + 0x10));

        assert_eq!(loader.close(handle), 0);
        assert!(loader.instances().is_empty());
        assert_eq!(host.live_processes(), 0);
        assert_eq!(loader.error(), None);
    }

    #[test]
    fn test_open_missing_file_latches() {
        let (mut loader, _) = loader_with_image("demo.so", image_with_exports(&[]));

        assert_eq!(loader.open("absent.so", 0), None);
        assert_eq!(loader.error(), Some(ERR_OPEN_FILE));
        // The latch is one-shot.
        assert_eq!(loader.error(), None);
    }

    #[test]
    fn test_open_canonicalization_failure_latches() {
        let (mut loader, host) = loader_with_image("demo.so", image_with_exports(&[]));
        host.set_canonical_fails(true);

        assert_eq!(loader.open("demo.so", 0), None);
        assert_eq!(loader.error(), Some(ERR_CANONICAL_PATH));
    }

    #[test]
    fn test_open_spawn_failure_latches() {
        let (mut loader, host) = loader_with_image("demo.so", image_with_exports(&[]));
        host.set_spawn_fails(true);

        assert_eq!(loader.open("demo.so", 0), None);
        assert_eq!(loader.error(), Some(ERR_START_PROCESS));
    }

    #[test]
    fn test_open_exhausts_find_budget() {
        let (mut loader, host) = loader_with_image("slow.so", image_with_exports(&[]));
        // One more lookup of latency than the budget of 1 + 3 retries.
        host.set_spawn_latency(4);

        assert_eq!(loader.open("slow.so", 0), None);
        assert_eq!(loader.error(), Some(ERR_FIND_PROCESS));
        assert_eq!(host.find_calls(), 4);
        assert_eq!(host.delay_calls(), 4);
        // The spawned process is left behind; discovery failed, so there
        // is no token to tear it down with.
        assert_eq!(host.live_processes(), 1);
    }

    #[test]
    fn test_open_succeeds_on_last_find_attempt() {
        let (mut loader, host) = loader_with_image("slow.so", image_with_exports(&[]));
        host.set_spawn_latency(3);

        assert!(loader.open("slow.so", 0).is_some());
        assert_eq!(host.find_calls(), 4);
        assert_eq!(host.delay_calls(), 3);
        assert_eq!(loader.error(), None);
    }

    #[test]
    fn test_open_bad_image_latches_parse_error() {
        let host = SimHost::new();
        host.install_image(
            "garbage.so",
            SimImage {
                bytes: vec![0xFF; 32],
                segments: vec![SimSegment::zeroed(8)],
            },
        );
        let mut loader = Loader::new(host.clone());

        assert_eq!(loader.open("garbage.so", 0), None);
        assert_eq!(loader.error(), Some(ERR_PARSE_HUNKS));
        assert!(loader.instances().is_empty());
        // The launched process is not torn down on a parse failure.
        assert_eq!(host.live_processes(), 1);
    }

    #[test]
    fn test_open_uses_canonical_name() {
        let (mut loader, host) =
            loader_with_image("lib/actual.so", image_with_exports(&[("_sym", 0x0)]));
        host.register_alias("actual", "lib/actual.so");

        let handle = loader.open("actual", 0);
        assert!(handle.is_some());
        assert!(loader.sym(handle, b"sym").is_some());
    }

    #[test]
    fn test_open_flags_are_ignored() {
        let (mut loader, _) = loader_with_image("demo.so", image_with_exports(&[("_f", 0x0)]));

        let lazy = loader.open("demo.so", 0x1);
        assert!(lazy.is_some());
        assert_eq!(loader.error(), None);
    }

    #[test]
    fn test_sym_misses_are_silent() {
        let (mut loader, _) = loader_with_image("demo.so", image_with_exports(&[("_here", 0x8)]));
        let handle = loader.open("demo.so", 0);

        assert_eq!(loader.sym(handle, b"missing"), None);
        assert_eq!(loader.sym(None, b"here"), None);
        assert_eq!(loader.error(), None);
    }

    #[test]
    fn test_sym_after_close_is_silent_none() {
        let (mut loader, _) = loader_with_image("demo.so", image_with_exports(&[("_gone", 0x0)]));
        let handle = loader.open("demo.so", 0);
        assert_eq!(loader.close(handle), 0);

        assert_eq!(loader.sym(handle, b"gone"), None);
        assert_eq!(loader.error(), None);
    }

    #[test]
    fn test_close_null_handle() {
        let (mut loader, _) = loader_with_image("demo.so", image_with_exports(&[]));

        assert_eq!(loader.close(None), -1);
        assert_eq!(loader.error(), Some(ERR_NULL_CLOSE));
    }

    #[test]
    fn test_close_twice_reports_stale_handle() {
        let (mut loader, _) = loader_with_image("demo.so", image_with_exports(&[]));
        let handle = loader.open("demo.so", 0);

        assert_eq!(loader.close(handle), 0);
        assert_eq!(loader.close(handle), -1);
        assert_eq!(loader.error(), Some(ERR_STALE_CLOSE));
    }

    #[test]
    fn test_close_after_process_died_on_its_own() {
        let (mut loader, host) = loader_with_image("demo.so", image_with_exports(&[]));
        let handle = loader.open("demo.so", 0);
        let token = loader.instances().iter().next().map(|(_, i)| i.process);
        host.kill(token.unwrap());

        assert_eq!(loader.close(handle), -1);
        assert_eq!(loader.error(), Some(ERR_PROCESS_GONE));
        // Nothing was torn down, so the entry stays registered.
        assert_eq!(loader.instances().len(), 1);
    }

    #[test]
    fn test_close_retries_until_the_process_yields() {
        let (mut loader, host) = loader_with_image("tough.so", image_with_exports(&[]));
        host.set_signals_ignored(2);
        let handle = loader.open("tough.so", 0);

        assert_eq!(loader.close(handle), 0);
        assert_eq!(host.signals_sent(), 3);
        assert_eq!(host.delay_calls(), 2);
        assert_eq!(host.live_processes(), 0);
    }

    #[test]
    fn test_close_gives_up_on_a_stuck_process() {
        let (mut loader, host) = loader_with_image("stuck.so", image_with_exports(&[]));
        host.set_signals_ignored(16);
        let handle = loader.open("stuck.so", 0);

        assert_eq!(loader.close(handle), -1);
        assert_eq!(loader.error(), Some(ERR_PROCESS_STUCK));
        // 1 signal + 3 retries, a delay between each pair.
        assert_eq!(host.signals_sent(), 4);
        assert_eq!(host.delay_calls(), 3);
        // Still loaded; the caller may retry the close.
        assert_eq!(loader.instances().len(), 1);
    }

    #[test]
    fn test_latest_failure_wins_the_latch() {
        let (mut loader, _) = loader_with_image("demo.so", image_with_exports(&[]));

        assert_eq!(loader.open("absent.so", 0), None);
        assert_eq!(loader.close(None), -1);
        assert_eq!(loader.error(), Some(ERR_NULL_CLOSE));
        assert_eq!(loader.error(), None);
    }

    #[test]
    fn test_retry_budget_respects_configuration() {
        let host = SimHost::new();
        host.install_image("cfg.so", image_with_exports(&[]));
        host.set_spawn_latency(2);
        let config = LoaderConfig {
            find_retries: 0,
            ..LoaderConfig::default()
        };
        let mut loader = Loader::with_config(host.clone(), config);

        // Zero retries: a single lookup, a single delay, then give up.
        assert_eq!(loader.open("cfg.so", 0), None);
        assert_eq!(loader.error(), Some(ERR_FIND_PROCESS));
        assert_eq!(host.find_calls(), 1);
        assert_eq!(host.delay_calls(), 1);
    }

    #[test]
    fn test_independent_loaders_do_not_share_state() {
        let host_a = SimHost::new();
        host_a.install_image("a.so", image_with_exports(&[("_a", 0x0)]));
        let host_b = SimHost::new();

        let mut loader_a = Loader::new(host_a);
        let mut loader_b = Loader::new(host_b);

        assert!(loader_a.open("a.so", 0).is_some());
        assert_eq!(loader_b.open("a.so", 0), None);
        assert_eq!(loader_b.error(), Some(ERR_OPEN_FILE));
        // Loader A's latch stays clean.
        assert_eq!(loader_a.error(), None);
    }
}
