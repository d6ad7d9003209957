//! Conformance harness for the hunkdl loader.
//!
//! This crate provides:
//! - Image building: compose syntactically exact hunk images in memory
//! - Fixture capture: persist scenario suites as digest-guarded JSON
//! - Fixture verify: replay suites against a fresh loader and diff
//! - Report generation: human-readable and machine-readable summaries
//! - Structured logging: JSONL records for test and CI workflows

#![forbid(unsafe_code)]

pub mod fixtures;
pub mod image;
pub mod report;
pub mod runner;
pub mod scenarios;
pub mod structured_log;
pub mod verify;

pub use fixtures::{FixtureCase, FixtureSet, HarnessError};
pub use image::{BuiltImage, HunkImageBuilder, SegmentSpec};
pub use report::ConformanceReport;
pub use runner::ScenarioRunner;
pub use verify::{Summary, VerificationResult};
