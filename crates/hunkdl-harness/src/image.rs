//! Programmatic hunk image construction.
//!
//! Conformance cases state intent, such as "a data segment exporting
//! `_exportedVar2` at offset 0", and the builder turns that into a
//! byte-exact record stream plus the segment memory the simulated host
//! materializes at spawn. Symbol-hunk pairing is positional, so when any
//! segment exports, every segment gets a symbol hunk (empty ones just
//! carry the terminator) to keep the pairing aligned.

use hunkdl_core::exports::SYMBOL_MARKER;
use hunkdl_core::host::sim::{SimImage, SimSegment};
use hunkdl_core::hunk::{
    HUNK_BSS, HUNK_CODE, HUNK_DATA, HUNK_END, HUNK_HEADER, HUNK_NAME, HUNK_RELOC32, HUNK_SYMBOL,
};

// ---------------------------------------------------------------------------
// Segment specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Code,
    Data,
    Bss,
}

/// One segment's contribution to the image: its payload record, optional
/// name record, exported symbols and relocation blocks.
#[derive(Debug, Clone)]
pub struct SegmentSpec {
    kind: SegmentKind,
    payload: Vec<u32>,
    bss_words: u32,
    unit_name: Option<String>,
    symbols: Vec<(String, u32)>,
    reloc32: Vec<(u32, Vec<u32>)>,
}

impl SegmentSpec {
    #[must_use]
    pub fn code(payload: &[u32]) -> Self {
        Self::with_payload(SegmentKind::Code, payload)
    }

    #[must_use]
    pub fn data(payload: &[u32]) -> Self {
        Self::with_payload(SegmentKind::Data, payload)
    }

    #[must_use]
    pub fn bss(words: u32) -> Self {
        Self {
            kind: SegmentKind::Bss,
            payload: Vec::new(),
            bss_words: words,
            unit_name: None,
            symbols: Vec::new(),
            reloc32: Vec::new(),
        }
    }

    fn with_payload(kind: SegmentKind, payload: &[u32]) -> Self {
        Self {
            kind,
            payload: payload.to_vec(),
            bss_words: 0,
            unit_name: None,
            symbols: Vec::new(),
            reloc32: Vec::new(),
        }
    }

    /// Precede the payload record with a name record.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.unit_name = Some(name.to_string());
        self
    }

    /// Add a symbol entry. The name is written to the stream verbatim;
    /// only names carrying the leading marker become resolvable exports.
    #[must_use]
    pub fn export(mut self, name: &str, offset: u32) -> Self {
        self.symbols.push((name.to_string(), offset));
        self
    }

    /// Add a 32-bit relocation block referencing segment `target`.
    #[must_use]
    pub fn reloc32(mut self, target: u32, offsets: &[u32]) -> Self {
        self.reloc32.push((target, offsets.to_vec()));
        self
    }

    fn size_words(&self) -> u32 {
        match self.kind {
            SegmentKind::Bss => self.bss_words,
            _ => self.payload.len() as u32,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// An export the finished image is known to carry: marker already
/// stripped, offset still segment-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedExport {
    pub segment: usize,
    pub name: String,
    pub offset: u32,
}

/// A finished image: the record stream, the segment memory, and the
/// exports a correct walk must find.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub bytes: Vec<u8>,
    pub segments: Vec<SimSegment>,
    pub exports: Vec<ExpectedExport>,
}

impl BuiltImage {
    #[must_use]
    pub fn sim_image(&self) -> SimImage {
        SimImage {
            bytes: self.bytes.clone(),
            segments: self.segments.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HunkImageBuilder {
    resident: Vec<String>,
    segments: Vec<SegmentSpec>,
}

impl HunkImageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a name to the resident-library list in the header.
    #[must_use]
    pub fn resident_library(mut self, name: &str) -> Self {
        self.resident.push(name.to_string());
        self
    }

    #[must_use]
    pub fn segment(mut self, spec: SegmentSpec) -> Self {
        self.segments.push(spec);
        self
    }

    /// Emit the record stream. Needs at least one segment; the header's
    /// bounds table cannot express an empty image.
    #[must_use]
    pub fn build(&self) -> BuiltImage {
        assert!(
            !self.segments.is_empty(),
            "an image needs at least one segment"
        );
        let mut bytes = Vec::new();
        w(&mut bytes, HUNK_HEADER);

        for name in &self.resident {
            write_name_words(&mut bytes, name);
        }
        w(&mut bytes, 0);

        w(&mut bytes, self.segments.len() as u32);
        w(&mut bytes, 0);
        w(&mut bytes, self.segments.len() as u32 - 1);
        for spec in &self.segments {
            w(&mut bytes, spec.size_words());
        }

        let exporting = self.segments.iter().any(|spec| !spec.symbols.is_empty());
        for spec in &self.segments {
            if let Some(name) = &spec.unit_name {
                w(&mut bytes, HUNK_NAME);
                write_name_words(&mut bytes, name);
            }
            match spec.kind {
                SegmentKind::Code | SegmentKind::Data => {
                    let tag = if spec.kind == SegmentKind::Code {
                        HUNK_CODE
                    } else {
                        HUNK_DATA
                    };
                    w(&mut bytes, tag);
                    w(&mut bytes, spec.payload.len() as u32);
                    for &word in &spec.payload {
                        w(&mut bytes, word);
                    }
                }
                SegmentKind::Bss => {
                    w(&mut bytes, HUNK_BSS);
                    w(&mut bytes, spec.bss_words);
                }
            }
            if !spec.reloc32.is_empty() {
                w(&mut bytes, HUNK_RELOC32);
                for (target, offsets) in &spec.reloc32 {
                    w(&mut bytes, offsets.len() as u32);
                    w(&mut bytes, *target);
                    for &offset in offsets {
                        w(&mut bytes, offset);
                    }
                }
                w(&mut bytes, 0);
            }
            if exporting {
                w(&mut bytes, HUNK_SYMBOL);
                for (name, offset) in &spec.symbols {
                    write_name_words(&mut bytes, name);
                    w(&mut bytes, *offset);
                }
                w(&mut bytes, 0);
            }
            w(&mut bytes, HUNK_END);
        }

        BuiltImage {
            bytes,
            segments: self.sim_segments(),
            exports: self.expected_exports(),
        }
    }

    fn sim_segments(&self) -> Vec<SimSegment> {
        self.segments
            .iter()
            .map(|spec| match spec.kind {
                SegmentKind::Bss => SimSegment::zeroed(spec.bss_words * 4),
                _ => {
                    let mut data = Vec::with_capacity(spec.payload.len() * 4);
                    for &word in &spec.payload {
                        data.extend_from_slice(&word.to_be_bytes());
                    }
                    SimSegment::from_data(data)
                }
            })
            .collect()
    }

    fn expected_exports(&self) -> Vec<ExpectedExport> {
        let mut exports = Vec::new();
        for (segment, spec) in self.segments.iter().enumerate() {
            for (name, offset) in &spec.symbols {
                if let Some(stripped) = name.as_bytes().strip_prefix(&[SYMBOL_MARKER]) {
                    exports.push(ExpectedExport {
                        segment,
                        name: String::from_utf8_lossy(stripped).into_owned(),
                        offset: *offset,
                    });
                }
            }
        }
        exports
    }
}

fn w(buf: &mut Vec<u8>, word: u32) {
    buf.extend_from_slice(&word.to_be_bytes());
}

/// Length-in-words, then the name zero-padded to the word grid.
fn write_name_words(buf: &mut Vec<u8>, name: &str) {
    let raw = name.as_bytes();
    let words = raw.len().div_ceil(4).max(1);
    w(buf, words as u32);
    let mut padded = raw.to_vec();
    padded.resize(words * 4, 0);
    buf.extend_from_slice(&padded);
}
