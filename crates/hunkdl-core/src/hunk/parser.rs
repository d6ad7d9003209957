//! Sequential hunk walk: skip every record exactly, harvest symbol hunks.
//!
//! The walk is strictly forward. Record payloads are never interpreted,
//! only measured, because one miscomputed skip desynchronizes every tag
//! read after it. Where the format leaves a skip unverifiable (a payload
//! seek that runs off the end of a truncated file) the cursor stays put
//! and the next tag read decides the outcome: fewer than four bytes left
//! is the normal end of the image, anything else classifies as whatever
//! record it happens to spell, usually an unknown hunk.

use crate::exports::ExportTable;
use crate::host::Segment;

use super::stream::ByteStream;
use super::{HUNKF_CHIP, HUNKF_FAST, HUNKF_MASK, HUNK_HEADER, HunkError, HunkKind, HunkResult};

/// The resident-library list is consumed in an inline window of up to 64
/// words per name; longer names take a second seek for the remainder.
const RESIDENT_INLINE_WORDS: u32 = 64;

/// Counters from one full walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Record tags consumed, including end/break markers.
    pub records: usize,
    /// Symbol hunks seen (each one pairs with one segment).
    pub symbol_hunks: usize,
    /// Bindings actually added to the export table.
    pub exports: usize,
}

/// Walk a hunk image from the stream's current position and collect every
/// marked symbol into `table`.
///
/// `segments` is the backing process's loaded segment chain, in load
/// order; the Nth symbol hunk binds its offsets against the Nth segment's
/// base address. Reaching end-of-stream at a record-tag boundary is the
/// successful termination; anything structurally wrong before that is a
/// typed [`HunkError`].
pub fn scan_exports(
    stream: &mut dyn ByteStream,
    segments: &[Segment],
    table: &mut ExportTable,
) -> HunkResult<ScanStats> {
    check_header(stream)?;
    skip_resident_libraries(stream)?;
    let (first, last) = read_segment_bounds(stream)?;
    skip_size_table(stream, first, last)?;

    let mut stats = ScanStats::default();
    let mut next_segment = 0usize;

    while let Some(raw) = read_tag(stream) {
        let tag_offset = stream.position() - 4;
        stats.records += 1;
        match HunkKind::from(raw) {
            HunkKind::Name | HunkKind::Debug => skip_info_block(stream)?,
            HunkKind::Code | HunkKind::Data => skip_payload_block(stream)?,
            HunkKind::Bss => skip_bss_block(stream)?,
            HunkKind::Reloc32 | HunkKind::RelReloc32 | HunkKind::AbsReloc16 => {
                skip_reloc_block(stream)?;
            }
            HunkKind::Reloc32Short | HunkKind::DRel32 => skip_short_reloc_block(stream)?,
            HunkKind::Symbol => {
                stats.symbol_hunks += 1;
                let segment = segments.get(next_segment).copied().ok_or(
                    HunkError::OutOfSegments {
                        symbol_hunk: stats.symbol_hunks,
                    },
                )?;
                next_segment += 1;
                stats.exports += read_symbol_block(stream, segment.base, table)?;
            }
            HunkKind::End | HunkKind::Break => {}
            _ => {
                return Err(HunkError::UnknownHunk {
                    tag: raw & 0xFFFF,
                    offset: tag_offset,
                });
            }
        }
    }

    Ok(stats)
}

// ---------------------------------------------------------------------------
// Prologue
// ---------------------------------------------------------------------------

fn check_header(stream: &mut dyn ByteStream) -> HunkResult<()> {
    let found = read_word(stream)?;
    if found != HUNK_HEADER {
        return Err(HunkError::BadHeader { found });
    }
    Ok(())
}

fn skip_resident_libraries(stream: &mut dyn ByteStream) -> HunkResult<()> {
    loop {
        let count = read_word(stream)?;
        if count == 0 {
            return Ok(());
        }
        let inline = count.min(RESIDENT_INLINE_WORDS);
        let offset = stream.position();
        stream
            .seek_relative(4 * i64::from(inline))
            .map_err(|_| HunkError::TruncatedStream { offset })?;
        let rest = count - inline;
        if rest > 0 {
            let offset = stream.position();
            stream
                .seek_relative(4 * i64::from(rest))
                .map_err(|_| HunkError::TruncatedStream { offset })?;
        }
    }
}

/// Global segment bounds: flags word, then first and last segment index.
/// When the extended placement-hint encoding is flagged and both the chip
/// and fast placement bits are set, one 32-bit extension word follows.
fn read_segment_bounds(stream: &mut dyn ByteStream) -> HunkResult<(u32, u32)> {
    let flags = read_word(stream)?;
    let first = read_word(stream)?;
    let last = read_word(stream)?;
    let extended =
        flags & HUNKF_MASK != 0 || first & 0xFFFF_0000 != 0 || last & 0xFFFF_0000 != 0;
    if extended && flags & HUNKF_CHIP != 0 && flags & HUNKF_FAST != 0 {
        let _ = stream.seek_relative(4);
    }
    Ok((first, last))
}

fn skip_size_table(stream: &mut dyn ByteStream, first: u32, last: u32) -> HunkResult<()> {
    let count = last.wrapping_sub(first).wrapping_add(1);
    for _ in 0..count {
        let size = read_word(stream)?;
        if size & HUNKF_CHIP != 0 && size & HUNKF_FAST != 0 {
            let _ = stream.seek_relative(4);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Record kinds
// ---------------------------------------------------------------------------

/// HUNK_NAME / HUNK_DEBUG: a word count, then that many payload words.
fn skip_info_block(stream: &mut dyn ByteStream) -> HunkResult<()> {
    let words = read_word(stream)?;
    let _ = stream.seek_relative(4 * i64::from(words));
    Ok(())
}

/// HUNK_CODE / HUNK_DATA: the length word doubles as a placement-hint
/// carrier; shifting first and masking after reproduces the format's
/// byte-count rule exactly (high hint bits fall off the top, the shifted
/// advisory bit is cleared by the mask).
fn skip_payload_block(stream: &mut dyn ByteStream) -> HunkResult<()> {
    let len = read_word(stream)?;
    let byte_len = (len << 2) & 0x7FFF_FFFF;
    let _ = stream.seek_relative(i64::from(byte_len));
    Ok(())
}

/// HUNK_BSS: a length word and no payload.
fn skip_bss_block(stream: &mut dyn ByteStream) -> HunkResult<()> {
    let _ = stream.seek_relative(4);
    Ok(())
}

/// HUNK_RELOC32 / HUNK_RELRELOC32 / HUNK_ABSRELOC16: blocks of
/// `count, reference-segment, offsets...` until a zero count. Only the
/// low 16 bits of the count size the offset block. This is the one skip
/// whose failure gets its own classification.
fn skip_reloc_block(stream: &mut dyn ByteStream) -> HunkResult<()> {
    loop {
        let count = read_word(stream)?;
        if count == 0 {
            return Ok(());
        }
        let offset = stream.position();
        let span = 4 + 4 * i64::from(count & 0xFFFF);
        stream
            .seek_relative(span)
            .map_err(|_| HunkError::TruncatedReloc { offset })?;
    }
}

/// HUNK_RELOC32SHORT / HUNK_DREL32: half-word counts and entries, then a
/// realignment to the word grid before the next tag. The stream may
/// legitimately end on the odd half-word.
fn skip_short_reloc_block(stream: &mut dyn ByteStream) -> HunkResult<()> {
    loop {
        let count = read_half(stream)?;
        if count == 0 {
            break;
        }
        let _ = stream.seek_relative(2 * (1 + i64::from(count)));
    }
    if stream.position() & 2 != 0 {
        let _ = stream.seek_relative(2);
    }
    Ok(())
}

/// HUNK_SYMBOL: `word-length, padded name, offset` entries until a zero
/// length. Every offset binds against this hunk's segment base. Returns
/// the number of bindings added.
fn read_symbol_block(
    stream: &mut dyn ByteStream,
    base: u64,
    table: &mut ExportTable,
) -> HunkResult<usize> {
    let mut added = 0;
    loop {
        let len = read_word(stream)?;
        if len == 0 {
            return Ok(added);
        }
        let name_len = ((len & 0x00FF_FFFF) as usize) * 4;
        let mut raw = Vec::new();
        raw.try_reserve_exact(name_len)
            .map_err(|_| HunkError::OutOfMemory)?;
        raw.resize(name_len, 0);
        read_exact(stream, &mut raw)?;
        let offset = read_word(stream)?;
        let address = base.wrapping_add(u64::from(offset));
        if table.add(&raw, address).map_err(|_| HunkError::OutOfMemory)? {
            added += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Field readers
// ---------------------------------------------------------------------------

fn read_exact(stream: &mut dyn ByteStream, buf: &mut [u8]) -> HunkResult<()> {
    let offset = stream.position();
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) | Err(_) => return Err(HunkError::TruncatedStream { offset }),
            Ok(n) => filled += n,
        }
    }
    Ok(())
}

fn read_word(stream: &mut dyn ByteStream) -> HunkResult<u32> {
    let mut buf = [0u8; 4];
    read_exact(stream, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_half(stream: &mut dyn ByteStream) -> HunkResult<u16> {
    let mut buf = [0u8; 2];
    read_exact(stream, &mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Tag reads are the only place a short read is not an error: fewer than
/// four bytes at a record boundary is the end of the image.
fn read_tag(stream: &mut dyn ByteStream) -> Option<u32> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) | Err(_) => return None,
            Ok(n) => filled += n,
        }
    }
    Some(u32::from_be_bytes(buf))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
