use crate::artifact::{ArtifactKind, ArtifactView};
use crate::config::MatcherConfig;
use crate::error::{Diagnostic, MatchError};
use crate::rules::{Clause, DefectRule, Requirement, RuleSet, Target};
use crate::synthesizer::RawFailure;
use crate::xml::{FailureRecord, XmlFailureExtractor};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;
use triage_protocol::{BuildMetadata, BuildRef, BuildStatus, FailureKey, MatchResult};

/// One build handed to the matcher.
pub struct BuildInput<'a> {
    pub build: BuildRef,
    pub status: BuildStatus,
    pub metadata: BuildMetadata,
    pub artifacts: &'a dyn ArtifactView,
}

impl<'a> BuildInput<'a> {
    pub fn new(build: BuildRef, status: BuildStatus, artifacts: &'a dyn ArtifactView) -> Self {
        Self {
            build,
            status,
            metadata: BuildMetadata::default(),
            artifacts,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: BuildMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn job(&self) -> &str {
        &self.build.job
    }
}

/// What the rules made of one build.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matches: Vec<MatchResult>,
    /// Report failures no satisfied clause claimed.
    pub unmatched: Vec<RawFailure>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Evaluates a [`RuleSet`] against one build at a time.
pub struct SignatureMatcher<'r> {
    rules: &'r RuleSet,
    config: &'r MatcherConfig,
    extractor: XmlFailureExtractor,
}

impl<'r> SignatureMatcher<'r> {
    #[must_use]
    pub fn new(rules: &'r RuleSet, config: &'r MatcherConfig) -> Self {
        Self {
            rules,
            config,
            extractor: XmlFailureExtractor::new(config.xml_context),
        }
    }

    pub fn match_build(&self, input: &BuildInput<'_>) -> MatchOutcome {
        let mut scope = BuildScope::new(input, self.extractor);
        let job = input.job();

        let per_failure = self.config.is_multi_failure(job)
            || (self.config.split_multi_failure_reports && scope.all_failures().len() > 1);
        let outcome = if per_failure {
            self.match_failures(input, &mut scope)
        } else {
            self.match_first(input, &mut scope)
        };

        log::debug!(
            "{}: {} matches, {} unmatched failures",
            input.build,
            outcome.0.len(),
            outcome.1.len()
        );

        MatchOutcome {
            matches: outcome.0,
            unmatched: outcome.1,
            diagnostics: scope.diagnostics,
        }
    }

    /// Whole-build semantics: the first satisfied clause of the first
    /// matching rule decides the build.
    fn match_first(
        &self,
        input: &BuildInput<'_>,
        scope: &mut BuildScope<'_>,
    ) -> (Vec<MatchResult>, Vec<RawFailure>) {
        for rule in self.rules.applicable(input.job()) {
            for (idx, clause) in rule.clauses_for(input.job()).iter().enumerate() {
                let Some(hit) = scope.evaluate_clause(clause, None) else {
                    continue;
                };
                log::debug!("{} matched {} via clause {idx}", rule.id, input.build);
                let failure = hit.failures.into_iter().next();
                return (vec![make_match(rule, input, hit.regexps, failure)], Vec::new());
            }
        }
        (Vec::new(), Vec::new())
    }

    /// Per-failure semantics: keep scanning rules until every report
    /// failure is claimed or the rules run out, then reconcile.
    fn match_failures(
        &self,
        input: &BuildInput<'_>,
        scope: &mut BuildScope<'_>,
    ) -> (Vec<MatchResult>, Vec<RawFailure>) {
        let failures = scope.all_failures();
        let mut open: HashSet<FailureKey> = failures.iter().map(|f| f.key.clone()).collect();
        let mut matches = Vec::new();

        for rule in self.rules.applicable(input.job()) {
            if !failures.is_empty() && open.is_empty() {
                break;
            }
            let mut whole_build_recorded = false;
            for (idx, clause) in rule.clauses_for(input.job()).iter().enumerate() {
                let Some(hit) = scope.evaluate_clause(clause, Some(&open)) else {
                    continue;
                };
                log::debug!("{} matched {} via clause {idx}", rule.id, input.build);
                if hit.failures.is_empty() {
                    if !whole_build_recorded {
                        matches.push(make_match(rule, input, hit.regexps, None));
                        whole_build_recorded = true;
                    }
                    continue;
                }
                for key in hit.failures {
                    if open.remove(&key) {
                        matches.push(make_match(rule, input, hit.regexps.clone(), Some(key)));
                    }
                }
            }
        }

        let unmatched = reconcile(&failures, &matches);
        (matches, unmatched)
    }
}

/// Drops every failure whose classname+name was matched, wherever in the
/// scan that match happened, and numbers repeats of the same key.
#[must_use]
pub fn reconcile(failures: &[FailureRecord], matches: &[MatchResult]) -> Vec<RawFailure> {
    let matched: HashSet<&FailureKey> = matches.iter().filter_map(|m| m.failure.as_ref()).collect();
    let mut seen: HashMap<&FailureKey, usize> = HashMap::new();
    let mut unmatched = Vec::new();
    for record in failures {
        let ordinal = seen.entry(&record.key).or_insert(0);
        let this = *ordinal;
        *ordinal += 1;
        if matched.contains(&record.key) {
            continue;
        }
        unmatched.push(RawFailure {
            record: record.clone(),
            ordinal: this,
        });
    }
    unmatched
}

fn make_match(
    rule: &DefectRule,
    input: &BuildInput<'_>,
    regexps: BTreeMap<String, BTreeSet<String>>,
    failure: Option<FailureKey>,
) -> MatchResult {
    MatchResult {
        defect_id: rule.id.clone(),
        build: input.build.clone(),
        status: input.status,
        regexps,
        failure,
        metadata: input.metadata.clone(),
    }
}

/// Strips a `{job}_` prefix from the file part of `name`, so
/// `pipeline_deploy_console.txt` compares equal to `console.txt`.
#[must_use]
pub fn canonical_name(job: &str, name: &str) -> String {
    let (dir, file) = match name.rfind('/') {
        Some(idx) => name.split_at(idx + 1),
        None => ("", name),
    };
    let prefix = format!("{job}_");
    match file.strip_prefix(&prefix) {
        Some(rest) if !job.is_empty() && !rest.is_empty() => format!("{dir}{rest}"),
        _ => name.to_string(),
    }
}

struct ClauseHit {
    regexps: BTreeMap<String, BTreeSet<String>>,
    failures: BTreeSet<FailureKey>,
}

enum RequirementEval {
    /// No artifact resolved for the target.
    Missing,
    /// Artifacts resolved but none satisfied the patterns.
    Failed,
    Hit {
        files: BTreeMap<String, BTreeSet<String>>,
        failures: Option<BTreeSet<FailureKey>>,
    },
}

/// Per-build artifact cache so each file is read and parsed once.
struct BuildScope<'a> {
    job: &'a str,
    view: &'a dyn ArtifactView,
    extractor: XmlFailureExtractor,
    names: Vec<String>,
    texts: HashMap<String, Option<Rc<str>>>,
    reports: HashMap<String, Option<Rc<[FailureRecord]>>>,
    missing: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> BuildScope<'a> {
    fn new(input: &'a BuildInput<'a>, extractor: XmlFailureExtractor) -> Self {
        Self {
            job: input.job(),
            view: input.artifacts,
            extractor,
            names: input.artifacts.names(),
            texts: HashMap::new(),
            reports: HashMap::new(),
            missing: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    fn evaluate_clause(
        &mut self,
        clause: &Clause,
        candidates: Option<&HashSet<FailureKey>>,
    ) -> Option<ClauseHit> {
        let mut hits: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
        let mut failures: Option<BTreeSet<FailureKey>> = None;

        for requirement in &clause.requirements {
            match self.evaluate_requirement(requirement, clause, candidates) {
                RequirementEval::Missing => {
                    self.note_missing(requirement.target.key());
                    return None;
                }
                RequirementEval::Failed => return None,
                RequirementEval::Hit {
                    files,
                    failures: matched,
                } => {
                    if let Some(matched) = matched {
                        failures = Some(match failures {
                            None => matched,
                            Some(prev) => prev.intersection(&matched).cloned().collect(),
                        });
                    }
                    hits.insert(canonical_name(self.job, requirement.target.key()), files);
                }
            }
        }

        let satisfied = clause
            .requirements
            .iter()
            .all(|r| hits.contains_key(&canonical_name(self.job, r.target.key())));
        if !satisfied {
            return None;
        }
        if failures.as_ref().is_some_and(BTreeSet::is_empty) {
            return None;
        }

        let mut regexps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for files in hits.into_values() {
            for (file, patterns) in files {
                regexps.entry(file).or_default().extend(patterns);
            }
        }
        Some(ClauseHit {
            regexps,
            failures: failures.unwrap_or_default(),
        })
    }

    fn evaluate_requirement(
        &mut self,
        requirement: &Requirement,
        clause: &Clause,
        candidates: Option<&HashSet<FailureKey>>,
    ) -> RequirementEval {
        let resolved = self.resolve(&requirement.target, clause);
        if resolved.is_empty() {
            return RequirementEval::Missing;
        }

        let mut files: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut failures: Option<BTreeSet<FailureKey>> = None;

        // Every resolved file is evaluated; any satisfying one counts.
        for name in resolved {
            let canonical = canonical_name(self.job, &name);
            match ArtifactKind::infer(&name) {
                ArtifactKind::Text => {
                    let Some(text) = self.text(&name) else {
                        continue;
                    };
                    if let Some(patterns) = requirement.patterns.evaluate(&text) {
                        files.entry(canonical).or_default().extend(patterns);
                    }
                }
                ArtifactKind::StructuredReport => {
                    let Some(records) = self.report(&name) else {
                        continue;
                    };
                    let matched_keys = failures.get_or_insert_with(BTreeSet::new);
                    for record in records.iter() {
                        if candidates.is_some_and(|open| !open.contains(&record.key)) {
                            continue;
                        }
                        if let Some(patterns) = requirement.patterns.evaluate(&record.text()) {
                            files.entry(canonical.clone()).or_default().extend(patterns);
                            matched_keys.insert(record.key.clone());
                        }
                    }
                }
            }
        }

        if files.is_empty() {
            RequirementEval::Failed
        } else {
            RequirementEval::Hit {
                files,
                failures: failures.filter(|f| !f.is_empty()),
            }
        }
    }

    fn resolve(&self, target: &Target, clause: &Clause) -> Vec<String> {
        match target {
            Target::Literal(name) => self.resolve_literal(name).into_iter().collect(),
            Target::Glob { matcher, .. } => self
                .names
                .iter()
                .filter(|n| matcher.is_match(n.as_str()) || matcher.is_match(canonical_name(self.job, n)))
                .cloned()
                .collect(),
            Target::Any => self
                .names
                .iter()
                .filter(|n| !clause.named_targets().any(|t| self.claims(t, n)))
                .cloned()
                .collect(),
        }
    }

    fn resolve_literal(&self, name: &str) -> Option<String> {
        if self.names.iter().any(|n| n == name) {
            return Some(name.to_string());
        }
        let qualified = qualify(self.job, name);
        self.names.iter().find(|n| **n == qualified).cloned()
    }

    fn claims(&self, target: &Target, name: &str) -> bool {
        match target {
            Target::Literal(literal) => self.resolve_literal(literal).as_deref() == Some(name),
            Target::Glob { matcher, .. } => {
                matcher.is_match(name) || matcher.is_match(canonical_name(self.job, name))
            }
            Target::Any => false,
        }
    }

    fn text(&mut self, name: &str) -> Option<Rc<str>> {
        if let Some(cached) = self.texts.get(name) {
            return cached.clone();
        }
        let loaded: Option<Rc<str>> = match self.view.read(name) {
            Ok(content) => content.map(Rc::from),
            Err(err) => {
                self.unreadable(name, &err);
                None
            }
        };
        self.texts.insert(name.to_string(), loaded.clone());
        loaded
    }

    fn report(&mut self, name: &str) -> Option<Rc<[FailureRecord]>> {
        if let Some(cached) = self.reports.get(name) {
            return cached.clone();
        }
        let loaded: Option<Rc<[FailureRecord]>> = match self.text(name) {
            None => None,
            Some(source) => match self.extractor.extract(name, &source) {
                Ok(records) => Some(Rc::from(records)),
                Err(MatchError::MalformedReport { name: report, reason }) => {
                    log::warn!("Skipping malformed report {report}: {reason}");
                    self.diagnostics
                        .push(Diagnostic::MalformedReport { name: report, reason });
                    None
                }
                Err(err) => {
                    self.unreadable(name, &err);
                    None
                }
            },
        };
        self.reports.insert(name.to_string(), loaded.clone());
        loaded
    }

    /// Failures from every structured report in the build, in name order.
    fn all_failures(&mut self) -> Vec<FailureRecord> {
        let reports: Vec<String> = self
            .names
            .iter()
            .filter(|n| ArtifactKind::infer(n) == ArtifactKind::StructuredReport)
            .cloned()
            .collect();
        let mut failures = Vec::new();
        for name in reports {
            if let Some(records) = self.report(&name) {
                failures.extend(records.iter().cloned());
            }
        }
        failures
    }

    fn note_missing(&mut self, target: &str) {
        if self.missing.insert(target.to_string()) {
            log::debug!("{}: no artifact for target {target}", self.job);
            self.diagnostics.push(Diagnostic::MissingArtifact {
                target: target.to_string(),
            });
        }
    }

    fn unreadable(&mut self, name: &str, err: &dyn std::fmt::Display) {
        log::warn!("Failed to read artifact {name}: {err}");
        self.diagnostics.push(Diagnostic::UnreadableArtifact {
            name: name.to_string(),
            reason: err.to_string(),
        });
    }
}

/// Job-qualified form of an artifact name (`{job}_{file}`).
#[must_use]
pub fn qualify(job: &str, name: &str) -> String {
    match name.rfind('/') {
        Some(idx) => format!("{}{job}_{}", &name[..=idx], &name[idx + 1..]),
        None => format!("{job}_{name}"),
    }
}
