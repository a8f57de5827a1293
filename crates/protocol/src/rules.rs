//! On-disk shape of the defect rule database.
//!
//! ```text
//! { "bugs": {
//!     "<defect id>": {
//!       "description": "...",            (optional)
//!       "<job type>": [                  OR-list of clauses
//!         { "<file or glob>": { "regexp": ["...", "..."] } }   AND-map
//!       ]
//! } } }
//! ```
//!
//! The `bugs` wrapper is optional. Defects are kept as raw values until
//! [`DefectRuleDef::from_value`] so that one malformed entry cannot poison
//! the rest of the database.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::parse_json_or_toml;

/// Regexes that must all match one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpecDef {
    #[serde(deserialize_with = "one_or_many")]
    pub regexp: Vec<String>,
}

impl PatternSpecDef {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            regexp: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// AND-map from file target to pattern spec.
pub type ClauseDef = BTreeMap<String, PatternSpecDef>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectRuleDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Job type -> OR-list of clauses.
    #[serde(flatten)]
    pub jobs: BTreeMap<String, Vec<ClauseDef>>,
}

impl DefectRuleDef {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(anyhow!("defect entry must be an object"));
        }
        serde_json::from_value(value).map_err(|err| anyhow!("{err}"))
    }

    /// Adds one clause for `job`, keeping clauses already present.
    #[must_use]
    pub fn with_clause(mut self, job: impl Into<String>, clause: ClauseDef) -> Self {
        self.jobs.entry(job.into()).or_default().push(clause);
        self
    }
}

/// Defect id -> unparsed defect entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRuleDatabase {
    pub bugs: BTreeMap<String, serde_json::Value>,
}

impl RawRuleDatabase {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value = parse_json_or_toml(bytes)
            .map_err(|err| anyhow!("Rule database is invalid: {err}"))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut top) = value else {
            return Err(anyhow!("Rule database must be a JSON/TOML object"));
        };

        if let Some(version) = top.remove("schema_version") {
            let version = version.as_u64().unwrap_or_default();
            if version != u64::from(crate::RULE_DATABASE_SCHEMA_VERSION) {
                return Err(anyhow!(
                    "rule database schema_version {version} is not supported (expected {})",
                    crate::RULE_DATABASE_SCHEMA_VERSION
                ));
            }
        }

        let bugs = match top.remove("bugs") {
            Some(serde_json::Value::Object(bugs)) if top.is_empty() => bugs,
            Some(other) => {
                // A defect literally named "bugs" next to other defects.
                top.insert("bugs".to_string(), other);
                top
            }
            None => top,
        };

        Ok(Self {
            bugs: bugs.into_iter().collect(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bugs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bugs.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(pattern) => vec![pattern],
        OneOrMany::Many(patterns) => patterns,
    })
}
