use crate::error::{DedupError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_THRESHOLD: f64 = 0.9;
pub const DEFAULT_MAX_COMPARABLE_LENGTH: usize = 10_000;

/// Clustering and fingerprint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Minimum similarity for joining an existing cluster
    pub threshold: f64,

    /// Fingerprints longer than this (in characters) are never compared
    pub max_comparable_length: usize,

    /// Replaces known pipeline ids
    pub pipeline_placeholder: String,

    /// Replaces every digit
    pub digit_placeholder: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_comparable_length: DEFAULT_MAX_COMPARABLE_LENGTH,
            pipeline_placeholder: "PIPELINE_ID".to_string(),
            digit_placeholder: "X".to_string(),
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(DedupError::InvalidThreshold(self.threshold));
        }
        if self.max_comparable_length == 0 {
            return Err(DedupError::InvalidMaxLength);
        }
        if self.pipeline_placeholder.is_empty() {
            return Err(DedupError::InvalidPlaceholder(
                "pipeline_placeholder must not be empty".to_string(),
            ));
        }
        if self.digit_placeholder.is_empty()
            || self.digit_placeholder.chars().any(|c| c.is_ascii_digit())
        {
            return Err(DedupError::InvalidPlaceholder(format!(
                "digit_placeholder must be non-empty and digit-free, got {:?}",
                self.digit_placeholder
            )));
        }
        Ok(())
    }
}
