//! Export table: the (name, address) bindings of one loaded module.
//!
//! Names arrive as NUL-padded byte fields straight out of symbol hunks.
//! Only names carrying the C-symbol marker prefix become bindings; the
//! marker is stripped before storage, and lookups are exact byte-wise
//! comparisons against the stored form.

use std::borrow::Cow;
use std::collections::TryReserveError;

/// Marker prefix carried by C-level symbols in the image's symbol table.
pub const SYMBOL_MARKER: u8 = b'_';

/// One discovered export. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBinding {
    name: Box<[u8]>,
    address: u64,
}

impl ExportBinding {
    /// Stored name, marker already stripped.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// In-memory address of the export inside the backing process.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Text form for logs and listings.
    #[must_use]
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Ordered collection of bindings; insertion order is discovery order.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    entries: Vec<ExportBinding>,
}

impl ExportTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding discovered in a symbol hunk.
    ///
    /// `raw_name` is the padded field straight from the image; the
    /// effective name ends at the first NUL byte. Names that do not start
    /// with [`SYMBOL_MARKER`] produce no binding and return `Ok(false)`.
    /// The only failure is allocation exhaustion.
    pub fn add(&mut self, raw_name: &[u8], address: u64) -> Result<bool, TryReserveError> {
        let name = effective_name(raw_name);
        if name.first() != Some(&SYMBOL_MARKER) {
            return Ok(false);
        }
        self.entries.try_reserve(1)?;
        self.entries.push(ExportBinding {
            name: name[1..].into(),
            address,
        });
        Ok(true)
    }

    /// Address of `name`, scanning from the most recently added binding
    /// backwards so the latest definition of a duplicated name wins.
    #[must_use]
    pub fn resolve(&self, name: &[u8]) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|binding| &*binding.name == name)
            .map(|binding| binding.address)
    }

    /// Drop every binding; used during instance teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bindings in discovery order.
    #[must_use]
    pub fn bindings(&self) -> &[ExportBinding] {
        &self.entries
    }
}

/// Slice a padded name field down to its first NUL, if any.
fn effective_name(raw: &[u8]) -> &[u8] {
    match raw.iter().position(|&b| b == 0) {
        Some(end) => &raw[..end],
        None => raw,
    }
}
