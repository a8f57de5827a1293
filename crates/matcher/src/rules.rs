use crate::artifact::compile_glob;
use crate::error::{Diagnostic, MatchError, Result};
use crate::pattern::PatternSpec;
use globset::GlobMatcher;
use std::collections::BTreeMap;
use std::path::Path;
use triage_protocol::{ClauseDef, DefectRuleDef, RawRuleDatabase};

/// File target of one clause requirement.
#[derive(Debug, Clone)]
pub enum Target {
    /// Exact artifact name (job-qualified variants also resolve).
    Literal(String),
    Glob { pattern: String, matcher: GlobMatcher },
    /// `*`: every artifact no other target of the clause names.
    Any,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MatchError::Other("empty file target".to_string()));
        }
        if raw == "*" {
            return Ok(Self::Any);
        }
        if raw.contains(&['*', '?', '[', '{'][..]) {
            return Ok(Self::Glob {
                pattern: raw.to_string(),
                matcher: compile_glob(raw)?,
            });
        }
        Ok(Self::Literal(raw.to_string()))
    }

    /// Key this target is recorded under in a clause's hit map.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Literal(name) => name,
            Self::Glob { pattern, .. } => pattern,
            Self::Any => "*",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Requirement {
    pub target: Target,
    pub patterns: PatternSpec,
}

/// AND-group: every requirement must hold.
#[derive(Debug, Clone)]
pub struct Clause {
    pub requirements: Vec<Requirement>,
}

impl Clause {
    fn compile(def: &ClauseDef) -> Result<Self> {
        let mut requirements = Vec::with_capacity(def.len());
        for (target, spec) in def {
            let target = Target::parse(target)?;
            let patterns = PatternSpec::compile(spec)
                .map_err(|err| MatchError::Other(format!("target {}: {err}", target.key())))?;
            requirements.push(Requirement { target, patterns });
        }
        Ok(Self { requirements })
    }

    /// Targets other than `*`, used to decide what `*` may claim.
    pub(crate) fn named_targets(&self) -> impl Iterator<Item = &Target> {
        self.requirements
            .iter()
            .map(|r| &r.target)
            .filter(|t| !matches!(t, Target::Any))
    }
}

/// A compiled defect signature.
#[derive(Debug, Clone)]
pub struct DefectRule {
    pub id: String,
    pub description: Option<String>,
    pub category: Option<String>,
    jobs: BTreeMap<String, Vec<Clause>>,
    invalid: Option<String>,
}

impl DefectRule {
    pub fn compile(id: impl Into<String>, def: &DefectRuleDef) -> Result<Self> {
        let id = id.into();
        let mut jobs = BTreeMap::new();
        for (job, clauses) in &def.jobs {
            let mut compiled = Vec::with_capacity(clauses.len());
            for (idx, clause) in clauses.iter().enumerate() {
                if clause.is_empty() {
                    log::warn!("Rule {id}: clause {idx} for job {job} has no targets; ignored");
                    continue;
                }
                let clause = Clause::compile(clause).map_err(|err| {
                    MatchError::invalid_rule(&id, format!("job {job}, clause {idx}: {err}"))
                })?;
                compiled.push(clause);
            }
            jobs.insert(job.clone(), compiled);
        }
        Ok(Self {
            id,
            description: def.description.clone(),
            category: def.category.clone(),
            jobs,
            invalid: None,
        })
    }

    /// A rule that is kept for reporting but never matches.
    fn inert(id: String, reason: String) -> Self {
        Self {
            id,
            description: None,
            category: None,
            jobs: BTreeMap::new(),
            invalid: Some(reason),
        }
    }

    /// OR-list for `job`; empty when the rule does not apply.
    #[must_use]
    pub fn clauses_for(&self, job: &str) -> &[Clause] {
        self.jobs.get(job).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_inert(&self) -> bool {
        self.invalid.is_some()
    }

    #[must_use]
    pub fn invalid_reason(&self) -> Option<&str> {
        self.invalid.as_deref()
    }

    /// True when the rule can match some build: compiled and carrying at
    /// least one clause.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.is_inert() && self.jobs.values().any(|clauses| !clauses.is_empty())
    }
}

/// The compiled rule database, iterated in defect-id order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<DefectRule>,
    diagnostics: Vec<Diagnostic>,
}

impl RuleSet {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes).map_err(|err| match err {
            MatchError::RuleDatabase(reason) => {
                MatchError::RuleDatabase(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw =
            RawRuleDatabase::from_bytes(bytes).map_err(|err| MatchError::RuleDatabase(err.to_string()))?;
        Ok(Self::from_raw(raw))
    }

    /// Compiles every defect independently; broken ones become inert.
    #[must_use]
    pub fn from_raw(raw: RawRuleDatabase) -> Self {
        let mut set = Self::default();
        for (id, value) in raw.bugs {
            let compiled = DefectRuleDef::from_value(value)
                .map_err(|err| MatchError::invalid_rule(&id, err))
                .and_then(|def| DefectRule::compile(id.clone(), &def));
            set.push_compiled(id, compiled);
        }
        log::info!(
            "Loaded {} defect rules ({} inert)",
            set.rules.len(),
            set.rules.iter().filter(|r| r.is_inert()).count()
        );
        set
    }

    pub fn from_defs<I, S>(defs: I) -> Self
    where
        I: IntoIterator<Item = (S, DefectRuleDef)>,
        S: Into<String>,
    {
        let mut set = Self::default();
        let mut defs: Vec<(String, DefectRuleDef)> =
            defs.into_iter().map(|(id, def)| (id.into(), def)).collect();
        defs.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, def) in defs {
            let compiled = DefectRule::compile(id.clone(), &def);
            set.push_compiled(id, compiled);
        }
        set
    }

    fn push_compiled(&mut self, id: String, compiled: Result<DefectRule>) {
        match compiled {
            Ok(rule) => self.rules.push(rule),
            Err(err) => {
                log::warn!("Defect rule {id} disabled: {err}");
                let reason = match err {
                    MatchError::InvalidRule { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.diagnostics.push(Diagnostic::InvalidRule {
                    id: id.clone(),
                    reason: reason.clone(),
                });
                self.rules.push(DefectRule::inert(id, reason));
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules that can match anything; inert and clause-less
    /// rules are left out.
    #[must_use]
    pub fn usable_len(&self) -> usize {
        self.rules.iter().filter(|rule| rule.is_usable()).count()
    }

    #[must_use]
    pub fn rules(&self) -> &[DefectRule] {
        &self.rules
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&DefectRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Rules with at least one clause for `job`.
    pub fn applicable<'a>(&'a self, job: &'a str) -> impl Iterator<Item = &'a DefectRule> + 'a {
        self.rules
            .iter()
            .filter(move |rule| !rule.clauses_for(job).is_empty())
    }

    /// Problems found while compiling the database.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Job type -> number of rules carrying clauses for it.
    #[must_use]
    pub fn job_coverage(&self) -> BTreeMap<String, usize> {
        let mut coverage = BTreeMap::new();
        for rule in &self.rules {
            for job in rule.job_types() {
                if !rule.clauses_for(job).is_empty() {
                    *coverage.entry(job.to_string()).or_insert(0) += 1;
                }
            }
        }
        coverage
    }
}
