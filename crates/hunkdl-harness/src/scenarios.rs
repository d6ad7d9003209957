//! The built-in conformance suite.
//!
//! A fixed catalogue of images the loader must accept or reject in a
//! documented way. Well-formed cases come out of [`HunkImageBuilder`];
//! malformed ones are spelled out word by word because the builder
//! refuses to produce them. Host-behavior knobs (spawn latency, ignored
//! signals) ride along with the image so retry handling replays too.

use hunkdl_core::hunk::{HUNK_CODE, HUNK_HEADER, HUNK_RELOC32};
use hunkdl_core::loader::{ERR_FIND_PROCESS, ERR_PARSE_HUNKS};

use crate::fixtures::{
    ExpectedOutcome, FixtureCase, FixtureExport, FixtureSet, HarnessError, to_hex,
};
use crate::image::{BuiltImage, HunkImageBuilder, SegmentSpec};

// ---------------------------------------------------------------------------
// Demo module
// ---------------------------------------------------------------------------

/// The image the `demo` subcommand loads: one function in code, one
/// initialized variable in data, one zeroed variable in bss, all marked
/// for export at the start of their segments.
#[must_use]
pub fn demo_module() -> BuiltImage {
    HunkImageBuilder::new()
        .segment(
            SegmentSpec::code(&[0x4E75_4E75, 0x0000_0000])
                .named("demo")
                .export("_exportedFunc", 0x0),
        )
        .segment(SegmentSpec::data(&[0xDEAD_BEEF]).export("_exportedVar2", 0x0))
        .segment(SegmentSpec::bss(2).export("_exportedVar1", 0x0))
        .build()
}

// ---------------------------------------------------------------------------
// Built-in cases
// ---------------------------------------------------------------------------

/// Assemble the full built-in suite. The digest is computed here, so a
/// freshly generated fixture file always verifies.
pub fn builtin_suite() -> Result<FixtureSet, HarnessError> {
    let mut cases = Vec::new();

    let mut demo = FixtureCase::from_built(
        "demo_trio",
        "code, data and bss segments each export one marked symbol",
        &demo_module(),
    );
    demo.absent.push("exportedVar3".to_string());
    cases.push(demo);

    let built = HunkImageBuilder::new()
        .segment(
            SegmentSpec::code(&[0, 0, 0, 0])
                .export("_dup", 0x4)
                .export("_dup", 0x8),
        )
        .build();
    let mut rebound = FixtureCase::from_built(
        "rebound_symbol",
        "a name bound twice resolves to the later offset",
        &built,
    );
    // from_built records both bindings; only the surviving one is checked.
    rebound.exports = vec![FixtureExport {
        name: "dup".to_string(),
        segment: 0,
        offset: 0x8,
    }];
    cases.push(rebound);

    let built = HunkImageBuilder::new()
        .segment(
            SegmentSpec::code(&[0x4E75_0000])
                .export("bare", 0x0)
                .export("_kept", 0x0),
        )
        .build();
    let mut unmarked = FixtureCase::from_built(
        "unmarked_symbol",
        "symbol names without the export marker stay private",
        &built,
    );
    unmarked.absent.push("bare".to_string());
    cases.push(unmarked);

    let built = HunkImageBuilder::new()
        .segment(SegmentSpec::code(&[0x4E75_4E75]))
        .segment(SegmentSpec::data(&[0x0101_0202, 0x0303_0404]))
        .segment(SegmentSpec::bss(8).export("_tailBuffer", 0x10))
        .build();
    cases.push(FixtureCase::from_built(
        "exportless_pairing",
        "segments without exports still pair positionally with symbol records",
        &built,
    ));

    let built = HunkImageBuilder::new()
        .resident_library("threadkeeper.library")
        .segment(
            SegmentSpec::code(&[0, 0, 0, 0, 0, 0])
                .named("decorated")
                .reloc32(0, &[0x4, 0x14])
                .export("_entry", 0x8),
        )
        .build();
    cases.push(FixtureCase::from_built(
        "decorated_unit",
        "resident list, unit name and relocation blocks around the export",
        &built,
    ));

    let built = HunkImageBuilder::new()
        .segment(SegmentSpec::code(&[0x4E75_4E75]).export("_late", 0x0))
        .build();
    let mut slow = FixtureCase::from_built(
        "slow_to_park",
        "the process parks only on the third lookup; the retry budget covers it",
        &built,
    );
    slow.spawn_latency = 2;
    cases.push(slow);

    let built = HunkImageBuilder::new()
        .segment(SegmentSpec::code(&[0x4E75_4E75]).export("_tough", 0x0))
        .build();
    let mut stubborn = FixtureCase::from_built(
        "stubborn_process",
        "the process ignores two termination signals before yielding",
        &built,
    );
    stubborn.signals_ignored = 2;
    cases.push(stubborn);

    let built = HunkImageBuilder::new()
        .segment(SegmentSpec::code(&[0x4E75_4E75]).export("_never", 0x0))
        .build();
    let mut lost = FixtureCase::from_built(
        "never_parks",
        "the process outlasts every find attempt; discovery gives up",
        &built,
    );
    lost.spawn_latency = 10;
    lost.outcome = ExpectedOutcome::FailsWith {
        message: ERR_FIND_PROCESS.to_string(),
    };
    lost.exports.clear();
    cases.push(lost);

    cases.push(malformed(
        "wrong_magic",
        "first record is a code record, not the header",
        &[HUNK_CODE],
    ));
    cases.push(malformed(
        "empty_stream",
        "the stream ends before the header word",
        &[],
    ));
    cases.push(malformed(
        "unclassified_record",
        "a record tag outside the known range aborts the walk",
        &[HUNK_HEADER, 0, 1, 0, 0, 1, 0x4E71],
    ));
    cases.push(malformed(
        "severed_reloc",
        "a relocation block whose entries run off the end of the stream",
        &[
            HUNK_HEADER,
            0,
            1,
            0,
            0,
            1,
            HUNK_CODE,
            1,
            0x4E75_4E75,
            HUNK_RELOC32,
            8,
        ],
    ));

    FixtureSet::new("hunkdl-builtin", cases)
}

/// A case that must be rejected with the parse-failure message. No
/// segment memory: the walk never gets far enough to use it.
fn malformed(name: &str, description: &str, words: &[u32]) -> FixtureCase {
    FixtureCase {
        name: name.to_string(),
        description: description.to_string(),
        image_hex: stream_of(words),
        segments: Vec::new(),
        spawn_latency: 0,
        signals_ignored: 0,
        outcome: ExpectedOutcome::FailsWith {
            message: ERR_PARSE_HUNKS.to_string(),
        },
        exports: Vec::new(),
        absent: Vec::new(),
    }
}

fn stream_of(words: &[u32]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for &word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    to_hex(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_module_exports_the_documented_trio() {
        let built = demo_module();
        let names: Vec<&str> = built
            .exports
            .iter()
            .map(|export| export.name.as_str())
            .collect();
        assert_eq!(names, ["exportedFunc", "exportedVar2", "exportedVar1"]);
        assert!(built.exports.iter().all(|export| export.offset == 0));
        assert_eq!(built.segments.len(), 3);
    }

    #[test]
    fn test_builtin_suite_mixes_both_outcomes() {
        let suite = builtin_suite().unwrap();
        suite.verify_digest().unwrap();

        let loads = suite
            .cases
            .iter()
            .filter(|case| case.outcome == ExpectedOutcome::Loads)
            .count();
        let fails = suite.cases.len() - loads;
        assert!(loads >= 7, "loads cases: {loads}");
        assert!(fails >= 5, "failure cases: {fails}");
    }

    #[test]
    fn test_retry_cases_carry_host_knobs() {
        let suite = builtin_suite().unwrap();
        let by_name = |name: &str| {
            suite
                .cases
                .iter()
                .find(|case| case.name == name)
                .unwrap_or_else(|| panic!("case {name} missing"))
        };

        assert_eq!(by_name("slow_to_park").spawn_latency, 2);
        assert_eq!(by_name("stubborn_process").signals_ignored, 2);
        let lost = by_name("never_parks");
        assert!(lost.spawn_latency > 3, "must outlast the find budget");
        assert_eq!(
            lost.outcome,
            ExpectedOutcome::FailsWith {
                message: ERR_FIND_PROCESS.to_string()
            }
        );
    }

    #[test]
    fn test_malformed_streams_are_word_aligned_hex() {
        let suite = builtin_suite().unwrap();
        for case in &suite.cases {
            assert!(
                case.image_hex.len() % 8 == 0,
                "case {} is not word aligned",
                case.name
            );
        }
    }
}
