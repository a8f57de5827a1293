use anyhow::{anyhow, Result};
use serde::Serialize;

pub mod build;
pub mod defect;
pub mod report;
pub mod rules;

pub use build::{BuildMetadata, BuildRef, BuildStatus};
pub use defect::{FailureKey, MatchResult, UnfiledDefect, UnfiledOrigin};
pub use report::{BuildReport, ClusterEntry, ClusterReport, DefectEntry, RankEntry, Ranking};
pub use rules::{ClauseDef, DefectRuleDef, PatternSpecDef, RawRuleDatabase};

pub const RULE_DATABASE_SCHEMA_VERSION: u32 = 1;

/// Parses JSON first and falls back to TOML, always yielding a JSON value.
pub fn parse_json_or_toml(bytes: &[u8]) -> Result<serde_json::Value> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Ok(value),
        Err(json_err) => {
            let utf8 = std::str::from_utf8(bytes).map_err(|err| anyhow!("{json_err}; {err}"))?;
            let toml_value: toml::Value = toml::from_str(utf8).map_err(|toml_err| {
                anyhow!("not valid JSON or TOML ({json_err}); TOML parse error: {toml_err}")
            })?;
            serde_json::to_value(toml_value)
                .map_err(|err| anyhow!("Failed to convert TOML document to JSON: {err}"))
        }
    }
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

pub fn serialize_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(Into::into)
}
