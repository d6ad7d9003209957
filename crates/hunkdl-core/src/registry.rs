//! Live module instances, keyed by opaque nonzero handles.

use std::num::NonZeroU64;

use crate::exports::ExportTable;
use crate::host::ProcessToken;

/// Handle returned to callers for a loaded module. Never zero, so the
/// all-bits-zero value stays free to mean "no module" at boundaries that
/// traffic in raw integers or pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(NonZeroU64);

impl ModuleHandle {
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0.get()
    }

    /// Rebuild a handle from its raw value. Zero is not a handle.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

/// Everything retained for one loaded module: its harvested export table
/// and the process backing those addresses.
#[derive(Debug)]
pub struct ModuleInstance {
    pub exports: ExportTable,
    pub process: ProcessToken,
}

/// Registry of live instances. Handles are issued from a counter and
/// never reused, so a stale handle can be told apart from a current one
/// for the rest of the loader's life.
#[derive(Debug)]
pub struct InstanceRegistry {
    entries: Vec<(ModuleHandle, ModuleInstance)>,
    next: NonZeroU64,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next: NonZeroU64::MIN,
        }
    }

    pub fn register(&mut self, instance: ModuleInstance) -> ModuleHandle {
        let handle = ModuleHandle(self.next);
        self.next = self.next.saturating_add(1);
        self.entries.push((handle, instance));
        handle
    }

    #[must_use]
    pub fn get(&self, handle: ModuleHandle) -> Option<&ModuleInstance> {
        self.entries
            .iter()
            .find(|(key, _)| *key == handle)
            .map(|(_, instance)| instance)
    }

    pub fn unregister(&mut self, handle: ModuleHandle) -> Option<ModuleInstance> {
        let at = self.entries.iter().position(|(key, _)| *key == handle)?;
        Some(self.entries.remove(at).1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instances in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleHandle, &ModuleInstance)> {
        self.entries
            .iter()
            .map(|(handle, instance)| (*handle, instance))
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
