//! Persistable scenario fixtures.
//!
//! A fixture case carries an image (hex), the segment memory the host
//! should materialize for it, and the expected outcome: either the set
//! of exports a correct walk finds or the exact latched failure message.
//! Sets are digest-guarded so a hand-edited file is caught at load.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use hunkdl_core::host::sim::{SimImage, SimSegment};

use crate::image::BuiltImage;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad hex digit at byte {at}")]
    Hex { at: usize },
    #[error("fixture digest mismatch: recorded {recorded}, computed {computed}")]
    DigestMismatch { recorded: String, computed: String },
}

// ---------------------------------------------------------------------------
// Case model
// ---------------------------------------------------------------------------

/// Expected outcome of opening a case's image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExpectedOutcome {
    /// `open` succeeds and every listed export resolves.
    Loads,
    /// `open` fails with exactly this latched message.
    FailsWith { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSegment {
    /// Full in-memory size of the segment in bytes.
    pub mem_len: u32,
    /// Initialized prefix of the segment, hex-encoded.
    pub data_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureExport {
    /// Resolvable name, marker already stripped.
    pub name: String,
    /// Index into the segment chain the address must land in.
    pub segment: usize,
    /// Offset from that segment's base.
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureCase {
    pub name: String,
    pub description: String,
    /// The hunk record stream, hex-encoded.
    pub image_hex: String,
    pub segments: Vec<FixtureSegment>,
    /// Find attempts the host absorbs before the spawned process reaches
    /// its waiting state.
    #[serde(default)]
    pub spawn_latency: u32,
    /// Termination signals the spawned process ignores before exiting.
    #[serde(default)]
    pub signals_ignored: u32,
    pub outcome: ExpectedOutcome,
    #[serde(default)]
    pub exports: Vec<FixtureExport>,
    /// Names that must not resolve.
    #[serde(default)]
    pub absent: Vec<String>,
}

impl FixtureCase {
    /// A loads-cleanly case from a built image.
    #[must_use]
    pub fn from_built(name: &str, description: &str, built: &BuiltImage) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            image_hex: to_hex(&built.bytes),
            segments: built
                .segments
                .iter()
                .map(|segment| FixtureSegment {
                    mem_len: segment.mem_len,
                    data_hex: to_hex(&segment.data),
                })
                .collect(),
            spawn_latency: 0,
            signals_ignored: 0,
            outcome: ExpectedOutcome::Loads,
            exports: built
                .exports
                .iter()
                .map(|export| FixtureExport {
                    name: export.name.clone(),
                    segment: export.segment,
                    offset: export.offset,
                })
                .collect(),
            absent: Vec::new(),
        }
    }

    /// Decode the case into the image the simulated host installs.
    pub fn image(&self) -> Result<SimImage, HarnessError> {
        let bytes = from_hex(&self.image_hex)?;
        let mut segments = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            segments.push(SimSegment {
                data: from_hex(&segment.data_hex)?,
                mem_len: segment.mem_len,
            });
        }
        Ok(SimImage { bytes, segments })
    }
}

// ---------------------------------------------------------------------------
// Set model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSet {
    /// Schema version.
    pub version: String,
    /// Suite name.
    pub suite: String,
    /// Unix seconds at generation time.
    pub generated_at: String,
    /// SHA-256 over the serialized case list.
    pub digest: String,
    pub cases: Vec<FixtureCase>,
}

impl FixtureSet {
    pub fn new(suite: &str, cases: Vec<FixtureCase>) -> Result<Self, HarnessError> {
        let digest = digest_cases(&cases)?;
        let generated_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        Ok(Self {
            version: "1".to_string(),
            suite: suite.to_string(),
            generated_at,
            digest,
            cases,
        })
    }

    /// Recompute the digest and compare against the recorded one.
    pub fn verify_digest(&self) -> Result<(), HarnessError> {
        let computed = digest_cases(&self.cases)?;
        if computed != self.digest {
            return Err(HarnessError::DigestMismatch {
                recorded: self.digest.clone(),
                computed,
            });
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, HarnessError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, HarnessError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load and digest-check a set.
    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path)?;
        let set = Self::from_json(&content)?;
        set.verify_digest()?;
        Ok(set)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), HarnessError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

fn digest_cases(cases: &[FixtureCase]) -> Result<String, HarnessError> {
    let serialized = serde_json::to_vec(cases)?;
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    Ok(to_hex(&hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Hex
// ---------------------------------------------------------------------------

#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub fn from_hex(text: &str) -> Result<Vec<u8>, HarnessError> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return Err(HarnessError::Hex { at: text.len() - 1 });
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    for (at, pair) in text.as_bytes().chunks_exact(2).enumerate() {
        let pair = core::str::from_utf8(pair).map_err(|_| HarnessError::Hex { at: at * 2 })?;
        let byte = u8::from_str_radix(pair, 16).map_err(|_| HarnessError::Hex { at: at * 2 })?;
        out.push(byte);
    }
    Ok(out)
}
