//! Deduplication of unfiled CI defects.
//!
//! Raw failure text is reduced to a [`Fingerprint`], fingerprints are grouped
//! by similarity into [`Cluster`]s, and filed matches plus clusters are ranked
//! by prevalence across the window.

mod cluster;
mod config;
mod error;
mod fingerprint;
mod rank;
mod report;
mod similarity;

pub use cluster::{Cluster, SimilarityClusterer};
pub use config::{DedupConfig, DEFAULT_MAX_COMPARABLE_LENGTH, DEFAULT_THRESHOLD};
pub use error::{DedupError, Result};
pub use fingerprint::{Fingerprint, FingerprintNormalizer, TRACEBACK_MARKER};
pub use rank::PrevalenceRanker;
pub use report::cluster_report;
pub use similarity::{similarity, EXACT_MATCH, NOT_COMPARABLE};
