use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::build::{BuildMetadata, BuildRef, BuildStatus};

/// Identity of one failing test case inside a structured report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FailureKey {
    pub classname: String,
    pub name: String,
}

impl FailureKey {
    pub fn new(classname: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            classname: classname.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FailureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.classname.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.classname, self.name)
        }
    }
}

/// A known defect recognised in one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub defect_id: String,
    pub build: BuildRef,
    pub status: BuildStatus,
    /// File name -> regex patterns that matched in it.
    pub regexps: BTreeMap<String, BTreeSet<String>>,
    /// Test case the match is attributed to, for structured-report matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKey>,
    #[serde(default)]
    pub metadata: BuildMetadata,
}

/// What a placeholder defect stands in for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnfiledOrigin {
    /// No rule matched anywhere in the build.
    WholeBuild,
    /// One unmatched failing test case.
    TestCase {
        #[serde(flatten)]
        key: FailureKey,
        /// Disambiguates repeated classname+name pairs within one build.
        #[serde(default)]
        ordinal: usize,
    },
}

impl UnfiledOrigin {
    #[must_use]
    pub fn failure_key(&self) -> Option<&FailureKey> {
        match self {
            Self::WholeBuild => None,
            Self::TestCase { key, .. } => Some(key),
        }
    }
}

/// Placeholder for a failure no rule explains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfiledDefect {
    pub id: String,
    pub build: BuildRef,
    pub status: BuildStatus,
    pub origin: UnfiledOrigin,
    pub raw_text: String,
    #[serde(default)]
    pub metadata: BuildMetadata,
    /// Representative id of the cluster this defect joined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl UnfiledDefect {
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        &self.build.pipeline_id
    }

    #[must_use]
    pub fn job(&self) -> &str {
        &self.build.job
    }
}
