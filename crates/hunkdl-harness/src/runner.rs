//! Fixture replay engine.
//!
//! Each case gets a fresh simulated host and loader, so cases cannot
//! contaminate each other through the process table or the error latch.

use hunkdl_core::host::ProcessHost;
use hunkdl_core::host::sim::SimHost;
use hunkdl_core::loader::Loader;
use hunkdl_core::registry::ModuleHandle;

use crate::fixtures::{ExpectedOutcome, FixtureCase, FixtureSet};
use crate::verify::VerificationResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScenarioRunner;

impl ScenarioRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Replay every case in the set.
    pub fn run(&self, set: &FixtureSet) -> Vec<VerificationResult> {
        set.cases
            .iter()
            .map(|case| {
                let result = self.run_case(case);
                log::debug!(
                    "case {}: {}",
                    result.case_name,
                    if result.passed { "pass" } else { "FAIL" }
                );
                result
            })
            .collect()
    }

    /// Replay one case against a fresh loader.
    pub fn run_case(&self, case: &FixtureCase) -> VerificationResult {
        let image = match case.image() {
            Ok(image) => image,
            Err(err) => {
                return VerificationResult::fail(
                    &case.name,
                    "decodable fixture",
                    "fixture decode error",
                    Some(err.to_string()),
                );
            }
        };

        let path = format!("{}.so", case.name);
        let host = SimHost::new();
        host.set_spawn_latency(case.spawn_latency);
        host.set_signals_ignored(case.signals_ignored);
        host.install_image(&path, image);
        let mut loader = Loader::new(host.clone());

        let handle = loader.open(&path, 0);
        match &case.outcome {
            ExpectedOutcome::Loads => self.check_loads(case, &host, &mut loader, handle),
            ExpectedOutcome::FailsWith { message } => {
                let expected = format!("fails: {message}");
                if handle.is_some() {
                    return VerificationResult::fail(&case.name, &expected, "loads", None);
                }
                match loader.error() {
                    Some(latched) if latched == message => {
                        VerificationResult::pass(&case.name, &expected)
                    }
                    Some(latched) => VerificationResult::fail(
                        &case.name,
                        &expected,
                        &format!("fails: {latched}"),
                        None,
                    ),
                    None => VerificationResult::fail(
                        &case.name,
                        &expected,
                        "fails with no message latched",
                        None,
                    ),
                }
            }
        }
    }

    fn check_loads(
        &self,
        case: &FixtureCase,
        host: &SimHost,
        loader: &mut Loader<SimHost>,
        handle: Option<ModuleHandle>,
    ) -> VerificationResult {
        let expected = format!("loads ({} exports)", case.exports.len());
        let Some(handle) = handle else {
            let actual = loader
                .error()
                .map_or_else(|| "open failed".to_string(), |m| format!("fails: {m}"));
            return VerificationResult::fail(&case.name, &expected, &actual, None);
        };
        let Some(instance) = loader.instances().get(handle) else {
            return VerificationResult::fail(&case.name, &expected, "handle not registered", None);
        };
        let chain = host.segment_chain(instance.process);

        for export in &case.exports {
            let Some(segment) = chain.get(export.segment) else {
                return VerificationResult::fail(
                    &case.name,
                    &expected,
                    "segment chain too short",
                    Some(format!(
                        "export {:?} names segment {} of {}",
                        export.name,
                        export.segment,
                        chain.len()
                    )),
                );
            };
            let want = segment.base + u64::from(export.offset);
            let got = loader.sym(Some(handle), export.name.as_bytes());
            if got != Some(want) {
                return VerificationResult::fail(
                    &case.name,
                    &expected,
                    "export mismatch",
                    Some(format!(
                        "export {:?}: expected {want:#x}, resolved {got:?}",
                        export.name
                    )),
                );
            }
        }
        for name in &case.absent {
            if loader.sym(Some(handle), name.as_bytes()).is_some() {
                return VerificationResult::fail(
                    &case.name,
                    &expected,
                    "phantom export",
                    Some(format!("{name:?} resolved but must not")),
                );
            }
        }

        if loader.close(Some(handle)) != 0 {
            let detail = loader.error().map(str::to_string);
            return VerificationResult::fail(&case.name, &expected, "close failed", detail);
        }
        VerificationResult::pass(&case.name, &expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{HunkImageBuilder, SegmentSpec};

    fn loads_case(name: &str) -> FixtureCase {
        let built = HunkImageBuilder::new()
            .segment(SegmentSpec::code(&[0x4E75_4E75, 0]).export("_fn", 0x0))
            .segment(SegmentSpec::data(&[0xDEAD_BEEF]).export("_val", 0x0))
            .build();
        let mut case = FixtureCase::from_built(name, "two segments, two exports", &built);
        case.absent.push("missing".to_string());
        case
    }

    #[test]
    fn test_well_formed_case_passes() {
        let result = ScenarioRunner::new().run_case(&loads_case("ok"));
        assert!(result.passed, "{:?}", result.detail);
        assert_eq!(result.expected, "loads (2 exports)");
    }

    #[test]
    fn test_tampered_expectation_fails_with_detail() {
        let mut case = loads_case("tampered");
        case.exports[0].offset = 0x7777;

        let result = ScenarioRunner::new().run_case(&case);
        assert!(!result.passed);
        assert_eq!(result.actual, "export mismatch");
        assert!(result.detail.unwrap().contains("\"fn\""));
    }

    #[test]
    fn test_expected_failure_matches_latched_message() {
        let case = FixtureCase {
            name: "badmagic".to_string(),
            description: "first word is not the header tag".to_string(),
            image_hex: "00000000".to_string(),
            segments: vec![],
            spawn_latency: 0,
            signals_ignored: 0,
            outcome: ExpectedOutcome::FailsWith {
                message: "can't parse the hunks".to_string(),
            },
            exports: vec![],
            absent: vec![],
        };

        let result = ScenarioRunner::new().run_case(&case);
        assert!(result.passed, "{:?}", result.detail);
    }

    #[test]
    fn test_wrong_failure_message_is_reported() {
        let case = FixtureCase {
            name: "wrongmsg".to_string(),
            description: String::new(),
            image_hex: "00000000".to_string(),
            segments: vec![],
            spawn_latency: 0,
            signals_ignored: 0,
            outcome: ExpectedOutcome::FailsWith {
                message: "can't open the file".to_string(),
            },
            exports: vec![],
            absent: vec![],
        };

        let result = ScenarioRunner::new().run_case(&case);
        assert!(!result.passed);
        assert_eq!(result.actual, "fails: can't parse the hunks");
    }

    #[test]
    fn test_host_knobs_come_from_the_case() {
        // Latency within the find budget and a stubborn close both pass.
        let mut case = loads_case("slow");
        case.spawn_latency = 3;
        case.signals_ignored = 2;
        let result = ScenarioRunner::new().run_case(&case);
        assert!(result.passed, "{:?}", result.detail);

        // One past the budget becomes the expected discovery failure.
        let mut case = loads_case("gone");
        case.spawn_latency = 4;
        case.outcome = ExpectedOutcome::FailsWith {
            message: "can't find the CLI process".to_string(),
        };
        let result = ScenarioRunner::new().run_case(&case);
        assert!(result.passed, "{:?}", result.detail);
    }

    #[test]
    fn test_run_covers_every_case() {
        let set = FixtureSet::new(
            "mini",
            vec![loads_case("one"), loads_case("two")],
        )
        .unwrap();
        let results = ScenarioRunner::new().run(&set);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| result.passed));
    }
}
