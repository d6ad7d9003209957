//! Rendering verification runs for people and for pipelines.

use std::fmt::Write as _;

use serde::Serialize;

use crate::fixtures::HarnessError;
use crate::verify::{Summary, VerificationResult};

/// One replayed suite, rolled up. Serializes as the machine-readable
/// report; [`ConformanceReport::to_markdown`] renders the human one.
#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    pub suite: String,
    pub summary: Summary,
    pub results: Vec<VerificationResult>,
}

impl ConformanceReport {
    #[must_use]
    pub fn new(suite: &str, results: Vec<VerificationResult>) -> Self {
        Self {
            suite: suite.to_string(),
            summary: Summary::of(&results),
            results,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.summary.all_passed()
    }

    pub fn to_json(&self) -> Result<String, HarnessError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// A summary line, a result table, then one bullet per failure.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Conformance: {}", self.suite);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} of {} cases passed, {} failed.",
            self.summary.passed, self.summary.total, self.summary.failed
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "| case | expected | actual | result |");
        let _ = writeln!(out, "|------|----------|--------|--------|");
        for result in &self.results {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                result.case_name,
                result.expected,
                result.actual,
                if result.passed { "pass" } else { "FAIL" }
            );
        }

        let failures: Vec<&VerificationResult> = self
            .results
            .iter()
            .filter(|result| !result.passed)
            .collect();
        if !failures.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Failures");
            let _ = writeln!(out);
            for result in failures {
                match &result.detail {
                    Some(detail) => {
                        let _ = writeln!(out, "- `{}`: {detail}", result.case_name);
                    }
                    None => {
                        let _ = writeln!(
                            out,
                            "- `{}`: expected {}, got {}",
                            result.case_name, result.expected, result.actual
                        );
                    }
                }
            }
        }
        out
    }
}
