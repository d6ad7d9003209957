//! hunkdl-core: dlopen-style module loading for hunk-format executables.
//!
//! The "shared object" here is an ordinary hunk executable that the host
//! launches as a detached child process. Exports are discovered by
//! re-scanning the executable's hunk stream and pairing each symbol hunk
//! with the child's already-loaded, already-relocated segment chain, so
//! every resolved address points into the running child's memory.
//!
//! All interaction with the outside world goes through the
//! [`host::ProcessHost`] trait. The parser, the export table and the
//! registry are deterministic; [`host::SimHost`] provides a complete
//! in-memory host for tests and conformance runs.

#![deny(unsafe_code)]

pub mod config;
pub mod exports;
pub mod host;
pub mod hunk;
pub mod loader;
pub mod registry;
