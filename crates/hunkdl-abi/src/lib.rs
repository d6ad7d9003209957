// All extern "C" entry points accept raw pointers from C callers; each
// null-checks before touching anything, so per-function safety docs would
// be redundant boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # hunkdl-abi
//!
//! `extern "C"` boundary for the process-backed module loader.
//!
//! Produces a `cdylib` exposing the classic `<dlfcn.h>` quartet of
//! `dlopen`, `dlsym`, `dlclose` and `dlerror` over a
//! [`hunkdl_core::loader::Loader`] driving an installed process host.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> loader facade -> process host
//! ```
//!
//! A host must be installed once per process (see
//! [`dlfcn_abi::install_host`]) before the first `dlopen`; entry points
//! called earlier return null without latching anything.

pub mod dlfcn_abi;
