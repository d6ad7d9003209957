//! Structured JSONL logging for conformance runs.
//!
//! Replays emit one record per case plus run bracketing events, so
//! pipeline tooling can diff runs without scraping the human-readable
//! report. [`validate_log_line`] keeps emitters honest about the schema.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::verify::VerificationResult;

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Replay outcome of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

/// One JSONL record.
///
/// Required fields: `timestamp`, `run_id`, `seq`, `level`, `event`.
/// The rest carry case context when the event concerns one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    /// Identifies the run; every record of one replay shares it.
    pub run_id: String,
    /// Position within the run, starting at 1.
    pub seq: u64,
    pub level: LogLevel,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl LogEntry {
    /// A record with required fields only.
    #[must_use]
    pub fn new(run_id: impl Into<String>, seq: u64, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            run_id: run_id.into(),
            seq,
            level,
            event: event.into(),
            suite: None,
            case: None,
            outcome: None,
            expected: None,
            actual: None,
            detail: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn with_suite(mut self, suite: impl Into<String>) -> Self {
        self.suite = Some(suite.into());
        self
    }

    #[must_use]
    pub fn with_case(mut self, case: impl Into<String>) -> Self {
        self.case = Some(case.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// What the fixture demanded and what the loader did.
    #[must_use]
    pub fn with_expectation(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// One JSONL line, no trailing newline.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Writes JSONL records, numbering them within the run.
pub struct LogEmitter<W: Write> {
    writer: W,
    run_id: String,
    seq: u64,
}

impl LogEmitter<std::io::BufWriter<std::fs::File>> {
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            writer: std::io::BufWriter::new(file),
            run_id: run_id.to_string(),
            seq: 0,
        })
    }
}

impl LogEmitter<Vec<u8>> {
    /// An in-memory emitter for tests.
    #[must_use]
    pub fn to_buffer(run_id: &str) -> Self {
        Self {
            writer: Vec::new(),
            run_id: run_id.to_string(),
            seq: 0,
        }
    }

    /// The emitted lines, decoded.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        String::from_utf8_lossy(&self.writer)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl<W: Write> LogEmitter<W> {
    /// Emit a bare event record.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        self.seq += 1;
        let entry = LogEntry::new(&self.run_id, self.seq, level, event);
        self.write_line(&entry)?;
        Ok(entry)
    }

    /// Emit a prepared record, stamping run id and sequence.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        self.seq += 1;
        entry.run_id = self.run_id.clone();
        entry.seq = self.seq;
        self.write_line(&entry)
    }

    /// Emit the record for one replayed case.
    pub fn emit_result(&mut self, suite: &str, result: &VerificationResult) -> std::io::Result<()> {
        let (level, outcome) = if result.passed {
            (LogLevel::Info, Outcome::Pass)
        } else {
            (LogLevel::Error, Outcome::Fail)
        };
        let mut entry = LogEntry::new(&self.run_id, 0, level, "case_replayed")
            .with_suite(suite)
            .with_case(&result.case_name)
            .with_outcome(outcome)
            .with_expectation(&result.expected, &result.actual);
        if let Some(detail) = &result.detail {
            entry = entry.with_detail(detail);
        }
        self.emit_entry(entry)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    fn write_line(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Schema violation found in a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the record schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            errors.push(LogValidationError {
                line_number,
                field: "<json>".to_string(),
                message: format!("invalid JSON: {err}"),
            });
            return Err(errors);
        }
    };
    let Some(obj) = value.as_object() else {
        errors.push(LogValidationError {
            line_number,
            field: "<root>".to_string(),
            message: "expected a JSON object".to_string(),
        });
        return Err(errors);
    };

    for field in ["timestamp", "run_id", "seq", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError {
                line_number,
                field: field.to_string(),
                message: "required field missing".to_string(),
            });
        }
    }
    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["debug", "info", "warn", "error"].contains(&level)
    {
        errors.push(LogValidationError {
            line_number,
            field: "level".to_string(),
            message: format!("invalid level: '{level}'"),
        });
    }
    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !["pass", "fail", "error"].contains(&outcome)
    {
        errors.push(LogValidationError {
            line_number,
            field: "outcome".to_string(),
            message: format!("invalid outcome: '{outcome}'"),
        });
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    match serde_json::from_value::<LogEntry>(value) {
        Ok(entry) => Ok(entry),
        Err(err) => Err(vec![LogValidationError {
            line_number,
            field: "<entry>".to_string(),
            message: format!("schema mismatch: {err}"),
        }]),
    }
}

/// Validate every non-blank line of a JSONL file.
pub fn validate_log_file(path: &Path) -> Result<Vec<LogEntry>, Vec<LogValidationError>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            return Err(vec![LogValidationError {
                line_number: 0,
                field: "<file>".to_string(),
                message: format!("unreadable: {err}"),
            }]);
        }
    };

    let mut entries = Vec::new();
    let mut errors = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match validate_log_line(line, index + 1) {
            Ok(entry) => entries.push(entry),
            Err(mut line_errors) => errors.append(&mut line_errors),
        }
    }
    if errors.is_empty() { Ok(entries) } else { Err(errors) }
}

// No chrono in the stack; an approximate civil rendering is enough for
// log ordering and human reading.
fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        1970 + secs / 31_557_600,
        (secs % 31_557_600) / 2_629_800 + 1,
        (secs % 2_629_800) / 86400 + 1,
        (secs % 86400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_required_fields_and_skips_absent_ones() {
        let entry = LogEntry::new("run-7", 1, LogLevel::Info, "run_started");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["run_id"], "run-7");
        assert_eq!(parsed["seq"], 1);
        assert_eq!(parsed["level"], "info");
        assert!(!json.contains("\"case\""));
        assert!(!json.contains("\"outcome\""));
    }

    #[test]
    fn test_emitter_numbers_records_within_the_run() {
        let mut emitter = LogEmitter::to_buffer("run-1");
        emitter.emit(LogLevel::Info, "run_started").unwrap();
        emitter
            .emit_result(
                "builtin",
                &VerificationResult::pass("demo_trio", "loads (3 exports)"),
            )
            .unwrap();
        emitter
            .emit_result(
                "builtin",
                &VerificationResult::fail(
                    "severed_reloc",
                    "fails: can't parse the hunks",
                    "loads",
                    Some("walk accepted the stream".to_string()),
                ),
            )
            .unwrap();
        emitter.flush().unwrap();

        let lines = emitter.into_lines();
        assert_eq!(lines.len(), 3);
        let entries: Vec<LogEntry> = lines
            .iter()
            .enumerate()
            .map(|(i, line)| validate_log_line(line, i + 1).unwrap())
            .collect();
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[2].seq, 3);
        assert_eq!(entries[1].outcome, Some(Outcome::Pass));
        assert_eq!(entries[2].outcome, Some(Outcome::Fail));
        assert_eq!(entries[2].level, LogLevel::Error);
        assert_eq!(entries[2].detail.as_deref(), Some("walk accepted the stream"));
    }

    #[test]
    fn test_validation_flags_missing_fields_and_bad_vocabulary() {
        let errors = validate_log_line(r#"{"timestamp":"t","level":"info"}"#, 3).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"run_id"));
        assert!(fields.contains(&"seq"));
        assert!(fields.contains(&"event"));

        let errors = validate_log_line(
            r#"{"timestamp":"t","run_id":"r","seq":1,"level":"loud","event":"e"}"#,
            9,
        )
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "level");
        assert_eq!(errors[0].line_number, 9);
    }

    #[test]
    fn test_validation_rejects_non_json_lines() {
        assert!(validate_log_line("not json", 1).is_err());
        assert!(validate_log_line("[1,2,3]", 1).is_err());
    }
}
