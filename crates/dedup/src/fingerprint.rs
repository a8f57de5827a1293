//! Reduction of raw failure text to a comparable fingerprint.
//!
//! Volatile tokens are masked first (pipeline ids, then every digit). If the
//! text carries Python tracebacks, the fingerprint is the distinct traceback
//! segments, each cut at the next timestamp. Otherwise it is the sorted error
//! lines followed by the sorted failure lines.

use crate::config::DedupConfig;
use crate::error::{DedupError, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;

pub const TRACEBACK_MARKER: &str = "Traceback (most recent call last)";

const ERROR_MARKER: &str = "error";
const FAILURE_MARKER: &str = "fail";

/// Normalized failure text; empty means "no usable signal".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Length in characters, the unit of the comparability guard.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct FingerprintNormalizer {
    pipeline_placeholder: String,
    digit_placeholder: String,
    timestamp: Regex,
}

impl FingerprintNormalizer {
    pub fn new(pipeline_placeholder: &str, digit_placeholder: &str) -> Result<Self> {
        if pipeline_placeholder.is_empty() || digit_placeholder.is_empty() {
            return Err(DedupError::InvalidPlaceholder(
                "placeholders must not be empty".to_string(),
            ));
        }
        // Timestamps are matched after digit masking, so they are made of
        // placeholders: XXXX-XX-XX XX:XX:XX
        let d = regex::escape(digit_placeholder);
        let pattern = format!("(?:{d}){{4}}-(?:{d}){{2}}-(?:{d}){{2}}[ T](?:{d}){{2}}:(?:{d}){{2}}:(?:{d}){{2}}");
        let timestamp = Regex::new(&pattern).map_err(|err| DedupError::Other(err.to_string()))?;
        Ok(Self {
            pipeline_placeholder: pipeline_placeholder.to_string(),
            digit_placeholder: digit_placeholder.to_string(),
            timestamp,
        })
    }

    pub fn from_config(config: &DedupConfig) -> Result<Self> {
        Self::new(&config.pipeline_placeholder, &config.digit_placeholder)
    }

    #[must_use]
    pub fn normalize<S: AsRef<str>>(&self, raw: &str, known_pipelines: &[S]) -> Fingerprint {
        let masked = self.mask_digits(&self.mask_pipelines(raw, known_pipelines));

        if masked.contains(TRACEBACK_MARKER) {
            let segments = self.traceback_segments(&masked);
            if !segments.is_empty() {
                return Fingerprint(segments.join("\n"));
            }
        }
        Fingerprint(marker_lines(&masked))
    }

    fn mask_pipelines<S: AsRef<str>>(&self, raw: &str, known_pipelines: &[S]) -> String {
        let mut ids: Vec<&str> = known_pipelines
            .iter()
            .map(AsRef::as_ref)
            .filter(|id| !id.is_empty())
            .collect();
        // Longest first so an id that contains another is replaced whole.
        ids.sort_unstable_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        ids.dedup();

        let mut text = raw.to_string();
        for id in ids {
            if text.contains(id) {
                text = text.replace(id, &self.pipeline_placeholder);
            }
        }
        text
    }

    fn mask_digits(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if c.is_ascii_digit() {
                out.push_str(&self.digit_placeholder);
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Text after each marker up to the next timestamp (or marker), deduped.
    fn traceback_segments(&self, text: &str) -> Vec<String> {
        let mut segments: Vec<String> = Vec::new();
        for (idx, piece) in text.split(TRACEBACK_MARKER).enumerate() {
            if idx == 0 {
                continue;
            }
            let piece = piece.strip_prefix(':').unwrap_or(piece);
            let end = self.timestamp.find(piece).map_or(piece.len(), |m| m.start());
            let segment = clean_lines(&piece[..end]).join("\n");
            if !segment.is_empty() && !segments.contains(&segment) {
                segments.push(segment);
            }
        }
        segments
    }
}

fn clean_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Sorted error lines, then sorted failure lines.
fn marker_lines(text: &str) -> String {
    let mut errors = Vec::new();
    let mut failures = Vec::new();
    for line in clean_lines(text) {
        let lower = line.to_lowercase();
        if lower.contains(ERROR_MARKER) {
            errors.push(line);
        } else if lower.contains(FAILURE_MARKER) {
            failures.push(line);
        }
    }
    errors.sort_unstable();
    failures.sort_unstable();
    errors.extend(failures);
    errors.join("\n")
}
