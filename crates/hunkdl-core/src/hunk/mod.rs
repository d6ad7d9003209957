//! Hunk image structure: record tags, placement flags, parse errors.
//!
//! A hunk image is a big-endian stream of 4-byte words: a magic header,
//! an optional resident-library name list, global segment bounds, one
//! size/type word per segment, then a sequence of typed records (code,
//! data, bss, relocations, symbol tables, debug payloads). Records carry
//! no table of contents; the only way past one is to compute its exact
//! length, so [`parser`] tracks the cursor through every record kind even
//! though only symbol records are semantically consumed.

pub mod parser;
pub mod stream;

pub use parser::{ScanStats, scan_exports};
pub use stream::{ByteStream, FileStream, MemoryStream, StreamError};

use core::fmt;

// ---------------------------------------------------------------------------
// Record tags (low 16 bits of the on-disk tag word)
// ---------------------------------------------------------------------------

pub const HUNK_UNIT: u32 = 999;
pub const HUNK_NAME: u32 = 1000;
pub const HUNK_CODE: u32 = 1001;
pub const HUNK_DATA: u32 = 1002;
pub const HUNK_BSS: u32 = 1003;
pub const HUNK_RELOC32: u32 = 1004;
pub const HUNK_RELOC16: u32 = 1005;
pub const HUNK_RELOC8: u32 = 1006;
pub const HUNK_EXT: u32 = 1007;
pub const HUNK_SYMBOL: u32 = 1008;
pub const HUNK_DEBUG: u32 = 1009;
pub const HUNK_END: u32 = 1010;
pub const HUNK_HEADER: u32 = 1011;
pub const HUNK_OVERLAY: u32 = 1013;
pub const HUNK_BREAK: u32 = 1014;
pub const HUNK_DREL32: u32 = 1015;
pub const HUNK_DREL16: u32 = 1016;
pub const HUNK_DREL8: u32 = 1017;
pub const HUNK_LIB: u32 = 1018;
pub const HUNK_INDEX: u32 = 1019;
pub const HUNK_RELOC32SHORT: u32 = 1020;
pub const HUNK_RELRELOC32: u32 = 1021;
pub const HUNK_ABSRELOC16: u32 = 1022;

/// Memory-placement hint bits carried in the high bits of size/type words.
pub const HUNKF_ADVISORY: u32 = 1 << 29;
pub const HUNKF_CHIP: u32 = 1 << 30;
pub const HUNKF_FAST: u32 = 1 << 31;

/// High bits that mark the extended placement-hint encoding in the header.
pub const HUNKF_MASK: u32 = HUNKF_ADVISORY | HUNKF_CHIP | HUNKF_FAST;

// ---------------------------------------------------------------------------
// Record classification
// ---------------------------------------------------------------------------

/// One record kind, decoded from a raw on-disk tag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkKind {
    Unit,
    Name,
    Code,
    Data,
    Bss,
    Reloc32,
    Reloc16,
    Reloc8,
    Ext,
    Symbol,
    Debug,
    End,
    Header,
    Overlay,
    Break,
    DRel32,
    DRel16,
    DRel8,
    Lib,
    Index,
    Reloc32Short,
    RelReloc32,
    AbsReloc16,
    Unknown(u32),
}

impl From<u32> for HunkKind {
    /// Classify a raw tag word. The top 16 bits carry placement hints and
    /// are masked off before matching.
    fn from(raw: u32) -> Self {
        match raw & 0xFFFF {
            HUNK_UNIT => HunkKind::Unit,
            HUNK_NAME => HunkKind::Name,
            HUNK_CODE => HunkKind::Code,
            HUNK_DATA => HunkKind::Data,
            HUNK_BSS => HunkKind::Bss,
            HUNK_RELOC32 => HunkKind::Reloc32,
            HUNK_RELOC16 => HunkKind::Reloc16,
            HUNK_RELOC8 => HunkKind::Reloc8,
            HUNK_EXT => HunkKind::Ext,
            HUNK_SYMBOL => HunkKind::Symbol,
            HUNK_DEBUG => HunkKind::Debug,
            HUNK_END => HunkKind::End,
            HUNK_HEADER => HunkKind::Header,
            HUNK_OVERLAY => HunkKind::Overlay,
            HUNK_BREAK => HunkKind::Break,
            HUNK_DREL32 => HunkKind::DRel32,
            HUNK_DREL16 => HunkKind::DRel16,
            HUNK_DREL8 => HunkKind::DRel8,
            HUNK_LIB => HunkKind::Lib,
            HUNK_INDEX => HunkKind::Index,
            HUNK_RELOC32SHORT => HunkKind::Reloc32Short,
            HUNK_RELRELOC32 => HunkKind::RelReloc32,
            HUNK_ABSRELOC16 => HunkKind::AbsReloc16,
            other => HunkKind::Unknown(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal parse failures. Each variant corresponds to one structural check;
/// the loader folds all of them into its canonical "can't parse the hunks"
/// diagnostic, but tests and tools can tell the paths apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkError {
    /// The first word of the stream is not `HUNK_HEADER`.
    BadHeader { found: u32 },
    /// The stream ended inside a field or payload that had to be whole.
    TruncatedStream { offset: u64 },
    /// A relocation table's offset block runs past the end of the stream.
    TruncatedReloc { offset: u64 },
    /// A symbol hunk had no segment left to pair with (1-based ordinal).
    OutOfSegments { symbol_hunk: usize },
    /// A record kind the walker has no length rule for.
    UnknownHunk { tag: u32, offset: u64 },
    /// The export table could not reserve room for a binding.
    OutOfMemory,
}

impl fmt::Display for HunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HunkError::BadHeader { found } => {
                write!(f, "invalid hunk header tag {found:#x}")
            }
            HunkError::TruncatedStream { offset } => {
                write!(f, "stream truncated at byte {offset}")
            }
            HunkError::TruncatedReloc { offset } => {
                write!(f, "relocation table truncated at byte {offset}")
            }
            HunkError::OutOfSegments { symbol_hunk } => {
                write!(f, "ran out of segments at symbol hunk {symbol_hunk}")
            }
            HunkError::UnknownHunk { tag, offset } => {
                write!(f, "unknown hunk type {tag:#x} at byte {offset}")
            }
            HunkError::OutOfMemory => write!(f, "export table allocation failed"),
        }
    }
}

impl std::error::Error for HunkError {}

pub type HunkResult<T> = Result<T, HunkError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_tag_masks_placement_bits() {
        assert_eq!(HunkKind::from(HUNK_CODE), HunkKind::Code);
        assert_eq!(HunkKind::from(HUNK_CODE | HUNKF_CHIP), HunkKind::Code);
        assert_eq!(
            HunkKind::from(HUNK_DATA | HUNKF_CHIP | HUNKF_FAST),
            HunkKind::Data
        );
        assert_eq!(HunkKind::from(HUNK_SYMBOL | 0xABCD_0000), HunkKind::Symbol);
    }

    #[test]
    fn test_kind_from_tag_unknown_keeps_masked_value() {
        assert_eq!(HunkKind::from(0x4000_1234), HunkKind::Unknown(0x1234));
        assert_eq!(HunkKind::from(0), HunkKind::Unknown(0));
    }

    #[test]
    fn test_header_tag_matches_format() {
        assert_eq!(HUNK_HEADER, 0x3F3);
        assert_eq!(HUNK_SYMBOL, 0x3F0);
        assert_eq!(HUNK_ABSRELOC16, 0x3FE);
    }

    #[test]
    fn test_error_display() {
        let err = HunkError::BadHeader { found: 0x2F3 };
        assert_eq!(err.to_string(), "invalid hunk header tag 0x2f3");

        let err = HunkError::OutOfSegments { symbol_hunk: 2 };
        assert_eq!(err.to_string(), "ran out of segments at symbol hunk 2");

        let err = HunkError::UnknownHunk {
            tag: 0x3F5,
            offset: 40,
        };
        assert_eq!(err.to_string(), "unknown hunk type 0x3f5 at byte 40");
    }
}
