//! Verification results and their rollup.

use serde::{Deserialize, Serialize};

/// The outcome of replaying one fixture case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub case_name: String,
    pub passed: bool,
    /// What the fixture demanded, rendered for humans.
    pub expected: String,
    /// What the loader actually did.
    pub actual: String,
    /// Extra context on failure (the first mismatching export, the
    /// message that was latched instead, and so on).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

impl VerificationResult {
    #[must_use]
    pub fn pass(case_name: &str, outcome: &str) -> Self {
        Self {
            case_name: case_name.to_string(),
            passed: true,
            expected: outcome.to_string(),
            actual: outcome.to_string(),
            detail: None,
        }
    }

    #[must_use]
    pub fn fail(case_name: &str, expected: &str, actual: &str, detail: Option<String>) -> Self {
        Self {
            case_name: case_name.to_string(),
            passed: false,
            expected: expected.to_string(),
            actual: actual.to_string(),
            detail,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    #[must_use]
    pub fn of(results: &[VerificationResult]) -> Self {
        let passed = results.iter().filter(|result| result.passed).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let results = vec![
            VerificationResult::pass("a", "loads"),
            VerificationResult::fail("b", "loads", "can't parse the hunks", None),
            VerificationResult::pass("c", "fails"),
        ];
        let summary = Summary::of(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_passed());
        assert!(Summary::of(&[]).all_passed());
    }
}
