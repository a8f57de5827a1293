use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reported outcome of a single build, as the CI server labels it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    Success,
    Failure,
    Unstable,
    Aborted,
    #[default]
    Unknown,
}

impl BuildStatus {
    /// Case-insensitive; anything unrecognised is `Unknown`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Self::Success,
            "FAILURE" => Self::Failure,
            "UNSTABLE" => Self::Unstable,
            "ABORTED" => Self::Aborted,
            _ => Self::Unknown,
        }
    }

    /// Builds in these states get a whole-build placeholder when nothing matches.
    #[must_use]
    pub const fn needs_triage(self) -> bool {
        matches!(self, Self::Failure | Self::Unknown)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Unstable => "UNSTABLE",
            Self::Aborted => "ABORTED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl<'de> Deserialize<'de> for BuildStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one build of one job within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildRef {
    pub pipeline_id: String,
    pub job: String,
    #[serde(default)]
    pub build_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl BuildRef {
    pub fn new(
        pipeline_id: impl Into<String>,
        job: impl Into<String>,
        build_number: impl Into<String>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            job: job.into(),
            build_number: build_number.into(),
            link: None,
        }
    }

    #[must_use]
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

impl fmt::Display for BuildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.build_number.is_empty() {
            write!(f, "{}/{}", self.pipeline_id, self.job)
        } else {
            write!(f, "{}/{}#{}", self.pipeline_id, self.job, self.build_number)
        }
    }
}

/// Contextual information gathered from companion status artifacts.
///
/// The engine never interprets these fields; they are copied onto every
/// match and placeholder produced for the build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildMetadata {
    #[serde(default)]
    pub vendors: Vec<String>,
    #[serde(default)]
    pub machines: Vec<String>,
    #[serde(default)]
    pub units: Vec<String>,
    #[serde(default)]
    pub charms: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub slaves: Vec<String>,
    #[serde(default)]
    pub additional_info: BTreeMap<String, serde_json::Value>,
}
