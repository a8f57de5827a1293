use crate::error::{MatchError, Result};
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeSet, HashSet};
use triage_protocol::PatternSpecDef;

const REGEX_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// The regexes one target must satisfy together.
///
/// Duplicate sources collapse to one pattern. The set is satisfied only
/// when every pattern matches and the distinct matched strings number at
/// least as many as the patterns, so one regex cannot greedily stand in
/// for another.
#[derive(Debug, Clone)]
pub struct PatternSpec {
    patterns: Vec<CompiledPattern>,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl PatternSpec {
    pub fn compile(def: &PatternSpecDef) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut patterns = Vec::new();
        for source in &def.regexp {
            if !seen.insert(source.as_str()) {
                continue;
            }
            let regex = RegexBuilder::new(source)
                .multi_line(true)
                .dot_matches_new_line(true)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|err| MatchError::Other(format!("bad regexp {source:?}: {err}")))?;
            patterns.push(CompiledPattern {
                source: source.clone(),
                regex,
            });
        }
        if patterns.is_empty() {
            return Err(MatchError::Other("empty regexp list".to_string()));
        }
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.source.as_str())
    }

    /// Returns the matched pattern sources, or `None` if the set fails.
    #[must_use]
    pub fn evaluate(&self, text: &str) -> Option<BTreeSet<String>> {
        let needed = self.patterns.len();
        let mut distinct: HashSet<&str> = HashSet::new();
        let mut matched = BTreeSet::new();

        for pattern in &self.patterns {
            let mut hit = false;
            for found in pattern.regex.find_iter(text) {
                hit = true;
                distinct.insert(found.as_str());
                if distinct.len() >= needed {
                    break;
                }
            }
            if !hit {
                return None;
            }
            matched.insert(pattern.source.clone());
        }

        (distinct.len() >= needed).then_some(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(patterns: &[&str]) -> PatternSpec {
        PatternSpec::compile(&PatternSpecDef::new(patterns.iter().copied())).unwrap()
    }

    #[test]
    fn single_pattern_matches_once_or_more() {
        let spec = spec(&["OOM killed"]);
        let matched = spec.evaluate("Process OOM killed at ts=123\nOOM killed again").unwrap();
        assert_eq!(matched.into_iter().collect::<Vec<_>>(), vec!["OOM killed"]);
        assert!(spec.evaluate("all good").is_none());
    }

    #[test]
    fn duplicate_sources_collapse() {
        let spec = spec(&["error", "error"]);
        assert_eq!(spec.len(), 1);
        assert!(spec.evaluate("an error occurred").is_some());
    }

    #[test]
    fn every_pattern_must_match() {
        let spec = spec(&["timeout", "refused"]);
        assert!(spec.evaluate("connection timeout").is_none());
        assert!(spec.evaluate("connection timeout then refused").is_some());
    }

    #[test]
    fn overlapping_patterns_need_distinct_matches() {
        let spec = spec(&["foo", "fo+"]);
        assert!(spec.evaluate("foo").is_none());
        assert!(spec.evaluate("foo and fooo").is_some());
    }

    #[test]
    fn dot_matches_newline_and_anchors_are_per_line() {
        let spanning = spec(&["start.*end"]);
        assert!(spanning.evaluate("start\nmiddle\nend").is_some());

        let anchored = spec(&["^ERROR: disk full$"]);
        assert!(anchored.evaluate("noise\nERROR: disk full\nmore").is_some());
    }

    #[test]
    fn rejects_invalid_or_empty_specs() {
        assert!(PatternSpec::compile(&PatternSpecDef::new(["(unclosed"])).is_err());
        assert!(PatternSpec::compile(&PatternSpecDef::new(Vec::<String>::new())).is_err());
    }
}
