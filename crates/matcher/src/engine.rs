//! Per-build triage: signature matching followed by placeholder synthesis.

use crate::artifact::ArtifactView;
use crate::config::MatcherConfig;
use crate::error::{Diagnostic, MatchError, Result};
use crate::matcher::{qualify, BuildInput, SignatureMatcher};
use crate::rules::RuleSet;
use crate::synthesizer::UnfiledSynthesizer;
use serde::Serialize;
use triage_protocol::{BuildReport, BuildRef, BuildStatus, MatchResult, UnfiledDefect};

/// Everything decided about one build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildTriage {
    pub build: BuildRef,
    pub status: BuildStatus,
    pub matches: Vec<MatchResult>,
    pub unfiled: Vec<UnfiledDefect>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    /// Passing builds are not matched at all.
    pub skipped: bool,
}

impl BuildTriage {
    fn skipped(input: &BuildInput<'_>) -> Self {
        Self {
            build: input.build.clone(),
            status: input.status,
            matches: Vec::new(),
            unfiled: Vec::new(),
            diagnostics: Vec::new(),
            skipped: true,
        }
    }

    #[must_use]
    pub fn is_matched(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Per-build document keyed by defect id, filed and unfiled alike.
    #[must_use]
    pub fn report(&self) -> BuildReport {
        let mut report = BuildReport::new(self.build.clone(), self.status);
        for result in &self.matches {
            report.add_match(result);
        }
        for defect in &self.unfiled {
            report.add_unfiled(defect);
        }
        report
    }
}

/// Batch totals, logged and embedded in run output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriageSummary {
    pub builds: usize,
    pub matched_builds: usize,
    pub filed_matches: usize,
    pub unfiled: usize,
    pub skipped: usize,
    pub diagnostics: usize,
}

impl TriageSummary {
    pub fn record(&mut self, triage: &BuildTriage) {
        self.builds += 1;
        if triage.skipped {
            self.skipped += 1;
        }
        if triage.is_matched() {
            self.matched_builds += 1;
        }
        self.filed_matches += triage.matches.len();
        self.unfiled += triage.unfiled.len();
        self.diagnostics += triage.diagnostics.len();
    }
}

pub struct TriageEngine {
    rules: RuleSet,
    config: MatcherConfig,
    synthesizer: UnfiledSynthesizer,
}

impl TriageEngine {
    /// Refuses to start without a rule that can match; such a database
    /// would mark every failing build as unfiled.
    pub fn new(rules: RuleSet, config: MatcherConfig) -> Result<Self> {
        if rules.usable_len() == 0 {
            return Err(MatchError::NoRulesLoaded);
        }
        config.validate().map_err(MatchError::Other)?;
        let synthesizer = UnfiledSynthesizer::new(config.console_excerpt_lines);
        Ok(Self {
            rules,
            config,
            synthesizer,
        })
    }

    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    #[must_use]
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Never fails: artifact and report problems end up in `diagnostics`.
    pub fn triage_build(&self, input: &BuildInput<'_>) -> BuildTriage {
        if input.status == BuildStatus::Success {
            log::debug!("{}: passed, skipping", input.build);
            return BuildTriage::skipped(input);
        }

        let outcome = SignatureMatcher::new(&self.rules, &self.config).match_build(input);
        let mut matches = outcome.matches;
        let mut diagnostics = outcome.diagnostics;

        let mut unfiled: Vec<UnfiledDefect> = outcome
            .unmatched
            .iter()
            .map(|failure| {
                self.synthesizer
                    .for_failure(&input.build, input.status, &input.metadata, failure)
            })
            .collect();

        if matches.is_empty() && unfiled.is_empty() && input.status.needs_triage() {
            if let Some(console) = self.console(input, &mut diagnostics) {
                unfiled.push(self.synthesizer.for_build(
                    &input.build,
                    input.status,
                    &input.metadata,
                    &console,
                ));
            }
        }

        // Only builds no signature explained are filed as "file missing".
        if matches.is_empty() {
            if let Some(missing) = self.missing_file(input, &diagnostics) {
                matches.push(missing);
            }
        }

        if !unfiled.is_empty() {
            log::debug!("{}: {} unfiled defects", input.build, unfiled.len());
        }

        BuildTriage {
            build: input.build.clone(),
            status: input.status,
            matches,
            unfiled,
            diagnostics,
            skipped: false,
        }
    }

    /// Triages builds in order and logs batch totals.
    pub fn triage_all<'a, I>(&self, inputs: I) -> (Vec<BuildTriage>, TriageSummary)
    where
        I: IntoIterator<Item = BuildInput<'a>>,
    {
        let mut summary = TriageSummary::default();
        let mut results = Vec::new();
        for input in inputs {
            let triage = self.triage_build(&input);
            summary.record(&triage);
            results.push(triage);
        }
        log::info!(
            "Triaged {} builds: {} matched, {} unfiled defects, {} skipped",
            summary.builds,
            summary.matched_builds,
            summary.unfiled,
            summary.skipped
        );
        (results, summary)
    }

    fn console(&self, input: &BuildInput<'_>, diagnostics: &mut Vec<Diagnostic>) -> Option<String> {
        let name = &self.config.console_name;
        let candidates = [name.clone(), qualify(input.job(), name)];
        for candidate in candidates {
            match input.artifacts.read(&candidate) {
                Ok(Some(text)) => return Some(text),
                Ok(None) => {}
                Err(err) => {
                    log::warn!("{}: failed to read {candidate}: {err}", input.build);
                    diagnostics.push(Diagnostic::UnreadableArtifact {
                        name: candidate,
                        reason: err.to_string(),
                    });
                }
            }
        }
        if !diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::MissingArtifact { target } if target == name))
        {
            diagnostics.push(Diagnostic::MissingArtifact {
                target: name.clone(),
            });
        }
        None
    }

    /// "File missing" record against the catch-all defect, naming the first
    /// missing target. `None` without a catch-all or a missing artifact.
    fn missing_file(&self, input: &BuildInput<'_>, diagnostics: &[Diagnostic]) -> Option<MatchResult> {
        let catch_all = self.config.catch_all_defect.as_ref()?;
        let target = diagnostics.iter().find_map(|d| match d {
            Diagnostic::MissingArtifact { target } => Some(target),
            _ => None,
        })?;
        log::info!("{}: {target} missing, filing under {catch_all}", input.build);
        let mut metadata = input.metadata.clone();
        metadata.additional_info.insert(
            "missing_file".to_string(),
            serde_json::Value::String(target.clone()),
        );
        Some(MatchResult {
            defect_id: catch_all.clone(),
            build: input.build.clone(),
            status: input.status,
            regexps: Default::default(),
            failure: None,
            metadata,
        })
    }
}

/// Convenience for callers that only hold an artifact view.
pub fn triage_view(
    engine: &TriageEngine,
    build: BuildRef,
    status: BuildStatus,
    artifacts: &dyn ArtifactView,
) -> BuildTriage {
    engine.triage_build(&BuildInput::new(build, status, artifacts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifacts;
    use pretty_assertions::assert_eq;
    use triage_protocol::{DefectRuleDef, PatternSpecDef};

    fn oom_rules() -> RuleSet {
        RuleSet::from_defs([(
            "bug1",
            DefectRuleDef::default().with_clause(
                "deploy",
                [("console.txt".to_string(), PatternSpecDef::new(["OOM killed"]))]
                    .into_iter()
                    .collect(),
            ),
        )])
    }

    fn engine(config: MatcherConfig) -> TriageEngine {
        TriageEngine::new(oom_rules(), config).unwrap()
    }

    #[test]
    fn refuses_empty_rule_set() {
        let err = TriageEngine::new(RuleSet::default(), MatcherConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, MatchError::NoRulesLoaded));
    }

    #[test]
    fn refuses_rule_set_without_usable_rules() {
        let rules = RuleSet::from_bytes(
            br#"{"a": {"deploy": [{"console.txt": {"regexp": ["(bad"]}}]}, "b": "nope"}"#,
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        let err = TriageEngine::new(rules, MatcherConfig::default()).err().unwrap();
        assert!(matches!(err, MatchError::NoRulesLoaded));

        let clauseless = RuleSet::from_defs([(
            "bug",
            DefectRuleDef::default().with_clause("deploy", Default::default()),
        )]);
        assert!(TriageEngine::new(clauseless, MatcherConfig::default()).is_err());
    }

    #[test]
    fn missing_rule_target_files_under_catch_all() {
        let rules = RuleSet::from_defs([(
            "bug_log",
            DefectRuleDef::default().with_clause(
                "deploy",
                [("logs/deploy.log".to_string(), PatternSpecDef::new(["hook failed"]))]
                    .into_iter()
                    .collect(),
            ),
        )]);
        let config = MatcherConfig {
            catch_all_defect: Some("bug-missing".to_string()),
            ..MatcherConfig::default()
        };
        let engine = TriageEngine::new(rules, config).unwrap();
        let view = MemoryArtifacts::new().with("console.txt", "deploy aborted");
        let triage = triage_view(&engine, BuildRef::new("p1", "deploy", "1"), BuildStatus::Failure, &view);

        assert_eq!(triage.matches.len(), 1);
        assert_eq!(triage.matches[0].defect_id, "bug-missing");
        assert_eq!(
            triage.matches[0].metadata.additional_info["missing_file"],
            serde_json::json!("logs/deploy.log")
        );
        // The console was there, so the failure itself still gets a placeholder.
        assert_eq!(triage.unfiled.len(), 1);
        assert_eq!(triage.unfiled[0].raw_text, "deploy aborted");
    }

    #[test]
    fn matched_build_is_not_filed_as_missing() {
        let rules = RuleSet::from_defs([
            (
                "bug0",
                DefectRuleDef::default().with_clause(
                    "deploy",
                    [("missing.log".to_string(), PatternSpecDef::new(["x"]))]
                        .into_iter()
                        .collect(),
                ),
            ),
            (
                "bug1",
                DefectRuleDef::default().with_clause(
                    "deploy",
                    [("console.txt".to_string(), PatternSpecDef::new(["OOM killed"]))]
                        .into_iter()
                        .collect(),
                ),
            ),
        ]);
        let config = MatcherConfig {
            catch_all_defect: Some("bug-missing".to_string()),
            ..MatcherConfig::default()
        };
        let engine = TriageEngine::new(rules, config).unwrap();
        let view = MemoryArtifacts::new().with("console.txt", "OOM killed");
        let triage = triage_view(&engine, BuildRef::new("p1", "deploy", "1"), BuildStatus::Failure, &view);

        let ids: Vec<&str> = triage.matches.iter().map(|m| m.defect_id.as_str()).collect();
        assert_eq!(ids, vec!["bug1"]);
        assert!(triage
            .diagnostics
            .contains(&Diagnostic::MissingArtifact { target: "missing.log".to_string() }));
    }

    #[test]
    fn matched_build_has_no_unfiled() {
        let view = MemoryArtifacts::new().with("console.txt", "Process OOM killed at ts=123");
        let triage = triage_view(
            &engine(MatcherConfig::default()),
            BuildRef::new("p1", "deploy", "1"),
            BuildStatus::Failure,
            &view,
        );
        assert!(triage.is_matched());
        assert!(triage.unfiled.is_empty());
        let report = triage.report();
        assert_eq!(report.bugs.keys().collect::<Vec<_>>(), vec!["bug1"]);
    }

    #[test]
    fn unmatched_failure_gets_whole_build_placeholder() {
        let view = MemoryArtifacts::new().with("console.txt", "something else broke");
        let triage = triage_view(
            &engine(MatcherConfig::default()),
            BuildRef::new("p1", "deploy", "1"),
            BuildStatus::Failure,
            &view,
        );
        assert!(triage.matches.is_empty());
        assert_eq!(triage.unfiled.len(), 1);
        assert_eq!(triage.unfiled[0].raw_text, "something else broke");
    }

    #[test]
    fn unstable_and_passing_builds_get_no_placeholder() {
        let view = MemoryArtifacts::new().with("console.txt", "nothing");
        let engine = engine(MatcherConfig::default());

        let unstable = triage_view(&engine, BuildRef::new("p1", "deploy", "1"), BuildStatus::Unstable, &view);
        assert!(unstable.unfiled.is_empty());
        assert!(!unstable.skipped);

        let passed = triage_view(&engine, BuildRef::new("p1", "deploy", "1"), BuildStatus::Success, &view);
        assert!(passed.skipped);
    }

    #[test]
    fn missing_console_files_under_catch_all() {
        let config = MatcherConfig {
            catch_all_defect: Some("bug-missing".to_string()),
            ..MatcherConfig::default()
        };
        let triage = triage_view(
            &engine(config),
            BuildRef::new("p1", "deploy", "1"),
            BuildStatus::Unknown,
            &MemoryArtifacts::new(),
        );
        assert_eq!(triage.matches.len(), 1);
        assert_eq!(triage.matches[0].defect_id, "bug-missing");
        assert_eq!(
            triage.matches[0].metadata.additional_info["missing_file"],
            serde_json::json!("console.txt")
        );
        assert!(triage
            .diagnostics
            .contains(&Diagnostic::MissingArtifact { target: "console.txt".to_string() }));
    }

    #[test]
    fn missing_console_without_catch_all_yields_nothing() {
        let triage = triage_view(
            &engine(MatcherConfig::default()),
            BuildRef::new("p1", "deploy", "1"),
            BuildStatus::Failure,
            &MemoryArtifacts::new(),
        );
        assert!(triage.matches.is_empty());
        assert!(triage.unfiled.is_empty());
        assert_eq!(triage.diagnostics.len(), 1);
    }

    #[test]
    fn summary_counts_batch() {
        let engine = engine(MatcherConfig::default());
        let hit = MemoryArtifacts::new().with("console.txt", "OOM killed");
        let miss = MemoryArtifacts::new().with("console.txt", "kernel panic");
        let (results, summary) = engine.triage_all([
            BuildInput::new(BuildRef::new("p1", "deploy", "1"), BuildStatus::Failure, &hit),
            BuildInput::new(BuildRef::new("p2", "deploy", "1"), BuildStatus::Failure, &miss),
            BuildInput::new(BuildRef::new("p3", "deploy", "1"), BuildStatus::Success, &miss),
        ]);
        assert_eq!(results.len(), 3);
        assert_eq!(
            summary,
            TriageSummary {
                builds: 3,
                matched_builds: 1,
                filed_matches: 1,
                unfiled: 1,
                skipped: 1,
                diagnostics: 0,
            }
        );
    }
}
