use serde::{Deserialize, Serialize};

/// Configuration for signature matching and placeholder synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Canonical console artifact name rules are authored against
    pub console_name: String,

    /// Job types whose reports carry many independent test-case failures
    pub multi_failure_jobs: Vec<String>,

    /// Triage any other job per failure once its reports hold more than one
    pub split_multi_failure_reports: bool,

    /// Defect id used for "file missing" records and reported apart in rankings
    pub catch_all_defect: Option<String>,

    /// Keep only this many trailing console lines as placeholder text
    pub console_excerpt_lines: Option<usize>,

    /// Report lines around each failure element added to its text
    pub xml_context: XmlContext,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            console_name: "console.txt".to_string(),
            multi_failure_jobs: Vec::new(),
            split_multi_failure_reports: true,
            catch_all_defect: None,
            console_excerpt_lines: None,
            xml_context: XmlContext::default(),
        }
    }
}

impl MatcherConfig {
    #[must_use]
    pub fn is_multi_failure(&self, job: &str) -> bool {
        self.multi_failure_jobs.iter().any(|j| j == job)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.console_name.trim().is_empty() {
            return Err("console_name must not be empty".to_string());
        }
        if self.console_excerpt_lines == Some(0) {
            return Err("console_excerpt_lines must be > 0 when set".to_string());
        }
        if self
            .catch_all_defect
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            return Err("catch_all_defect must not be blank".to_string());
        }
        Ok(())
    }
}

/// Lines of report source kept before and after a failure element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlContext {
    pub before: usize,
    pub after: usize,
}

impl XmlContext {
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.before == 0 && self.after == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = MatcherConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.is_multi_failure("test_tempest_smoke"));
        assert!(config.xml_context.is_empty());
    }

    #[test]
    fn rejects_zero_excerpt_and_blank_ids() {
        let config = MatcherConfig {
            console_excerpt_lines: Some(0),
            ..MatcherConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MatcherConfig {
            catch_all_defect: Some("  ".to_string()),
            ..MatcherConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
