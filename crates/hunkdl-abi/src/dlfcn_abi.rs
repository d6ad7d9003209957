//! ABI layer for the `<dlfcn.h>`-style loader interface.
//!
//! `dlopen`, `dlsym`, `dlclose`, `dlerror` over the process-backed
//! loader. Handles cross the boundary as non-null opaque pointers whose
//! integer value is the registry handle; symbol addresses cross as plain
//! pointers into the module process's address space and are only
//! dereferenceable where that space is genuinely shared with the caller.
//!
//! The loader sits behind one process-wide lock, which is what makes the
//! registry and the error latch safe under preemptive callers.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::sync::OnceLock;

use parking_lot::Mutex;

use hunkdl_core::config::LoaderConfig;
use hunkdl_core::host::ProcessHost;
use hunkdl_core::loader::{ERR_OPEN_FILE, Loader};
use hunkdl_core::registry::ModuleHandle;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

// Accepted for source compatibility; binding is always immediate and
// module-local, so the distinction carries no weight here.
pub const RTLD_LAZY: c_int = 0x0001;
pub const RTLD_NOW: c_int = 0x0002;
pub const RTLD_GLOBAL: c_int = 0x0100;
pub const RTLD_LOCAL: c_int = 0;

type BoxedHost = Box<dyn ProcessHost + Send>;

// ---------------------------------------------------------------------------
// The API object behind the C surface
// ---------------------------------------------------------------------------

/// Loader plus dlerror plumbing, independent of the process-wide global
/// so tests can build as many as they like.
pub struct DlApi {
    loader: Mutex<Loader<BoxedHost>>,
    pending: Mutex<Option<&'static str>>,
    /// Backing storage for the pointer the last `dlerror` returned; kept
    /// alive until the next drain overwrites it.
    rendered: Mutex<Option<CString>>,
}

impl DlApi {
    #[must_use]
    pub fn new(host: BoxedHost) -> Self {
        Self::with_config(host, LoaderConfig::default())
    }

    #[must_use]
    pub fn with_config(host: BoxedHost, config: LoaderConfig) -> Self {
        Self {
            loader: Mutex::new(Loader::with_config(host, config)),
            pending: Mutex::new(None),
            rendered: Mutex::new(None),
        }
    }

    pub fn open(&self, path: &CStr, flags: c_int) -> *mut c_void {
        let Ok(path) = path.to_str() else {
            // Not a path the host could ever open.
            *self.pending.lock() = Some(ERR_OPEN_FILE);
            return std::ptr::null_mut();
        };
        let mut loader = self.loader.lock();
        match loader.open(path, flags) {
            Some(handle) => handle_to_ptr(handle),
            None => {
                *self.pending.lock() = loader.error();
                std::ptr::null_mut()
            }
        }
    }

    pub fn sym(&self, handle: *mut c_void, name: &CStr) -> *mut c_void {
        let loader = self.loader.lock();
        match loader.sym(ptr_to_handle(handle), name.to_bytes()) {
            Some(address) => address as usize as *mut c_void,
            None => std::ptr::null_mut(),
        }
    }

    pub fn close(&self, handle: *mut c_void) -> c_int {
        let mut loader = self.loader.lock();
        let code = loader.close(ptr_to_handle(handle));
        if code != 0 {
            *self.pending.lock() = loader.error();
        }
        code
    }

    /// Drain the latch: most recent failure message as a C string, or
    /// null. The returned pointer stays valid until the next drain.
    pub fn error(&self) -> *const c_char {
        let Some(message) = self.pending.lock().take() else {
            return std::ptr::null();
        };
        let mut rendered = self.rendered.lock();
        // Latch messages are static ASCII without interior NULs.
        *rendered = CString::new(message).ok();
        rendered
            .as_ref()
            .map_or(std::ptr::null(), |text| text.as_ptr())
    }
}

fn handle_to_ptr(handle: ModuleHandle) -> *mut c_void {
    handle.raw() as usize as *mut c_void
}

fn ptr_to_handle(ptr: *mut c_void) -> Option<ModuleHandle> {
    ModuleHandle::from_raw(ptr as usize as u64)
}

// ---------------------------------------------------------------------------
// Process-wide installation
// ---------------------------------------------------------------------------

static DL_API: OnceLock<DlApi> = OnceLock::new();

/// Install the host the extern entry points will drive, first caller
/// wins. Returns false (and changes nothing) if a host is already in
/// place.
pub fn install_host(host: BoxedHost) -> bool {
    install_host_with_config(host, LoaderConfig::default())
}

pub fn install_host_with_config(host: BoxedHost, config: LoaderConfig) -> bool {
    let installed = DL_API.set(DlApi::with_config(host, config)).is_ok();
    if installed {
        log::debug!("process host installed");
    } else {
        log::warn!("process host already installed; ignoring replacement");
    }
    installed
}

// ---------------------------------------------------------------------------
// extern "C" surface
// ---------------------------------------------------------------------------

/// Load `filename` as a process-backed module.
///
/// Returns an opaque handle, or null with a pending error message. There
/// is no pseudo-handle for the main program; a null `filename` is a
/// failed open.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn dlopen(filename: *const c_char, flags: c_int) -> *mut c_void {
    let Some(api) = DL_API.get() else {
        return std::ptr::null_mut();
    };
    if filename.is_null() {
        *api.pending.lock() = Some(ERR_OPEN_FILE);
        return std::ptr::null_mut();
    }
    let path = unsafe { CStr::from_ptr(filename) };
    api.open(path, flags)
}

/// Resolve `symbol` in the module behind `handle`.
///
/// Misses and bad handles return null without setting an error; there are
/// no `RTLD_DEFAULT` / `RTLD_NEXT` pseudo-handles to search through.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void {
    let Some(api) = DL_API.get() else {
        return std::ptr::null_mut();
    };
    if symbol.is_null() {
        return std::ptr::null_mut();
    }
    let name = unsafe { CStr::from_ptr(symbol) };
    api.sym(handle, name)
}

/// Terminate the module's backing process and retire the handle.
///
/// Returns 0 on success, -1 with a pending error message otherwise.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn dlclose(handle: *mut c_void) -> c_int {
    let Some(api) = DL_API.get() else {
        return -1;
    };
    api.close(handle)
}

/// Return a human-readable message for the most recent failure, or null
/// when nothing failed since the last call. Per POSIX, calling `dlerror`
/// clears the error state.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn dlerror() -> *mut c_char {
    let Some(api) = DL_API.get() else {
        return std::ptr::null_mut();
    };
    api.error() as *mut c_char
}
