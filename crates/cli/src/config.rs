use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use triage_dedup::DedupConfig;
use triage_matcher::{MatcherConfig, XmlContext};

/// Validated settings for one triage run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriageConfig {
    pub matcher: MatcherConfig,
    pub dedup: DedupConfig,
}

impl TriageConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value = triage_protocol::parse_json_or_toml(bytes)?;
        let raw: RawTriageConfig = serde_json::from_value(value)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawTriageConfig) -> Result<Self> {
        if let Some(schema_version) = raw.schema_version {
            if schema_version != 1 {
                return Err(anyhow!(
                    "schema_version {schema_version} is not supported (expected 1)"
                ));
            }
        }

        let mut cfg = Self::default();

        if let Some(matcher) = raw.matcher {
            if let Some(console_name) = matcher.console_name.filter(|v| !v.trim().is_empty()) {
                cfg.matcher.console_name = console_name;
            }
            if let Some(jobs) = matcher.multi_failure_jobs {
                cfg.matcher.multi_failure_jobs = jobs;
            }
            if let Some(split) = matcher.split_multi_failure_reports {
                cfg.matcher.split_multi_failure_reports = split;
            }
            cfg.matcher.catch_all_defect = matcher.catch_all_defect;
            cfg.matcher.console_excerpt_lines = matcher.console_excerpt_lines;
            if let Some(context) = matcher.xml_context {
                cfg.matcher.xml_context = XmlContext {
                    before: context.before.unwrap_or(0),
                    after: context.after.unwrap_or(0),
                };
            }
        }

        if let Some(dedup) = raw.dedup {
            if let Some(threshold) = dedup.threshold {
                cfg.dedup.threshold = threshold;
            }
            if let Some(max) = dedup.max_comparable_length {
                cfg.dedup.max_comparable_length = max;
            }
            if let Some(placeholder) = dedup.pipeline_placeholder {
                cfg.dedup.pipeline_placeholder = placeholder;
            }
            if let Some(placeholder) = dedup.digit_placeholder {
                cfg.dedup.digit_placeholder = placeholder;
            }
        }

        cfg.matcher
            .validate()
            .map_err(|err| anyhow!("matcher: {err}"))?;
        cfg.dedup.validate().map_err(|err| anyhow!("dedup: {err}"))?;
        Ok(cfg)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTriageConfig {
    schema_version: Option<u32>,
    #[serde(default)]
    matcher: Option<RawMatcherConfig>,
    #[serde(default)]
    dedup: Option<RawDedupConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMatcherConfig {
    console_name: Option<String>,
    multi_failure_jobs: Option<Vec<String>>,
    split_multi_failure_reports: Option<bool>,
    catch_all_defect: Option<String>,
    console_excerpt_lines: Option<usize>,
    xml_context: Option<RawXmlContext>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawXmlContext {
    before: Option<usize>,
    after: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDedupConfig {
    threshold: Option<f64>,
    max_comparable_length: Option<usize>,
    pipeline_placeholder: Option<String>,
    digit_placeholder: Option<String>,
}
