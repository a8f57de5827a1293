//! Output documents handed to report writers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::build::{BuildMetadata, BuildRef, BuildStatus};
use crate::defect::{MatchResult, UnfiledDefect, UnfiledOrigin};

/// One defect's entry in a per-build report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefectEntry {
    pub regexps: BTreeMap<String, Vec<String>>,
    pub vendors: Vec<String>,
    pub machines: Vec<String>,
    pub units: Vec<String>,
    pub charms: Vec<String>,
    pub ports: Vec<String>,
    pub states: Vec<String>,
    pub slaves: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub additional_info: BTreeMap<String, serde_json::Value>,
}

impl DefectEntry {
    fn from_metadata(metadata: &BuildMetadata, link: Option<String>) -> Self {
        Self {
            regexps: BTreeMap::new(),
            vendors: metadata.vendors.clone(),
            machines: metadata.machines.clone(),
            units: metadata.units.clone(),
            charms: metadata.charms.clone(),
            ports: metadata.ports.clone(),
            states: metadata.states.clone(),
            slaves: metadata.slaves.clone(),
            link,
            additional_info: metadata.additional_info.clone(),
        }
    }

    #[must_use]
    pub fn from_match(result: &MatchResult) -> Self {
        let mut entry = Self::from_metadata(&result.metadata, result.build.link.clone());
        entry.merge_match(result);
        entry
    }

    /// Folds another match of the same defect into this entry.
    pub fn merge_match(&mut self, result: &MatchResult) {
        for (file, patterns) in &result.regexps {
            let slot = self.regexps.entry(file.clone()).or_default();
            for pattern in patterns {
                if !slot.contains(pattern) {
                    slot.push(pattern.clone());
                }
            }
        }
        if let Some(failure) = &result.failure {
            let failures = self
                .additional_info
                .entry("failures".to_string())
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let serde_json::Value::Array(items) = failures {
                items.push(serde_json::Value::String(failure.to_string()));
            }
        }
    }

    #[must_use]
    pub fn from_unfiled(defect: &UnfiledDefect) -> Self {
        let mut entry = Self::from_metadata(&defect.metadata, defect.build.link.clone());
        if let UnfiledOrigin::TestCase { key, .. } = &defect.origin {
            entry
                .additional_info
                .insert("test".to_string(), serde_json::Value::String(key.to_string()));
        }
        entry.additional_info.insert(
            "text".to_string(),
            serde_json::Value::String(defect.raw_text.clone()),
        );
        entry
    }
}

/// Everything decided about one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub build: BuildRef,
    pub status: BuildStatus,
    pub bugs: BTreeMap<String, DefectEntry>,
}

impl BuildReport {
    #[must_use]
    pub fn new(build: BuildRef, status: BuildStatus) -> Self {
        Self {
            build,
            status,
            bugs: BTreeMap::new(),
        }
    }

    pub fn add_match(&mut self, result: &MatchResult) {
        self.bugs
            .entry(result.defect_id.clone())
            .and_modify(|entry| entry.merge_match(result))
            .or_insert_with(|| DefectEntry::from_match(result));
    }

    pub fn add_unfiled(&mut self, defect: &UnfiledDefect) {
        self.bugs
            .insert(defect.id.clone(), DefectEntry::from_unfiled(defect));
    }
}

/// A cluster of unfiled defects keyed in [`ClusterReport`] by its
/// representative's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    /// Pipeline ids of every member, representative first.
    pub duplicates: Vec<String>,
    pub match_text: String,
    pub members: Vec<String>,
    pub jobs: Vec<String>,
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(flatten)]
    pub metadata: BuildMetadata,
}

pub type ClusterReport = BTreeMap<String, ClusterEntry>;

/// `[defect_id, count]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry(pub String, pub usize);

impl RankEntry {
    #[must_use]
    pub fn defect_id(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.1
    }
}

/// Per-job lists sit next to `all` and `catch_all` on the wire, keyed by
/// [`Ranking::job_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    #[serde(flatten)]
    pub by_job: BTreeMap<String, Vec<RankEntry>>,
    pub all: Vec<RankEntry>,
    /// The catch-all defect, counted but kept out of the lists above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch_all: Option<RankEntry>,
}

impl Ranking {
    /// Keys owned by the ranking itself.
    pub const RESERVED_KEYS: [&'static str; 2] = ["all", "catch_all"];
    const JOB_PREFIX: &'static str = "job:";

    /// Key of `job`'s list. Reserved names, and names already starting with
    /// `job:`, get the prefix so no two jobs share a key.
    #[must_use]
    pub fn job_key(job: &str) -> String {
        if Self::RESERVED_KEYS.contains(&job) || job.starts_with(Self::JOB_PREFIX) {
            format!("{}{job}", Self::JOB_PREFIX)
        } else {
            job.to_string()
        }
    }

    pub fn insert_job(&mut self, job: &str, entries: Vec<RankEntry>) {
        self.by_job.insert(Self::job_key(job), entries);
    }

    #[must_use]
    pub fn for_job(&self, job: &str) -> Option<&[RankEntry]> {
        self.by_job.get(&Self::job_key(job)).map(Vec::as_slice)
    }
}
