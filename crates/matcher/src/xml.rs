//! Failure extraction from JUnit/xUnit style XML reports.
//!
//! Every `<testcase>` carrying a `<failure>` or `<error>` child becomes one
//! [`FailureRecord`]; several failure children of the same test case are
//! folded into a single record.

use crate::config::XmlContext;
use crate::error::{MatchError, Result};
use roxmltree::{Document, Node, ParsingOptions};
use serde::Serialize;
use std::ops::Range;
use triage_protocol::FailureKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Failure,
    Error,
}

/// One failing test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub report: String,
    pub key: FailureKey,
    pub kind: FailureKind,
    /// `message` attribute(s) of the failure element(s).
    pub message: String,
    /// Text content of the failure element(s).
    pub body: String,
    /// Report source lines around the failure, when configured.
    pub context: Option<String>,
}

impl FailureRecord {
    /// Text regexes are evaluated against for this failure.
    #[must_use]
    pub fn text(&self) -> String {
        let mut text = format!("{}\n{}\n{}", self.key, self.message, self.body);
        if let Some(context) = &self.context {
            text.push('\n');
            text.push_str(context);
        }
        text
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFailureExtractor {
    context: XmlContext,
}

impl XmlFailureExtractor {
    #[must_use]
    pub const fn new(context: XmlContext) -> Self {
        Self { context }
    }

    pub fn extract(&self, report: &str, source: &str) -> Result<Vec<FailureRecord>> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(source, options)
            .map_err(|err| MatchError::malformed(report, err))?;

        let mut records = Vec::new();
        for testcase in doc
            .descendants()
            .filter(|n| n.is_element() && n.has_tag_name("testcase"))
        {
            if let Some(record) = self.record_for(report, source, testcase) {
                records.push(record);
            }
        }

        log::debug!("{report}: {} failing test cases", records.len());
        Ok(records)
    }

    fn record_for(&self, report: &str, source: &str, testcase: Node<'_, '_>) -> Option<FailureRecord> {
        let failures: Vec<Node<'_, '_>> = testcase
            .children()
            .filter(|n| n.is_element() && (n.has_tag_name("failure") || n.has_tag_name("error")))
            .collect();
        let first = failures.first()?;

        let kind = if first.has_tag_name("error") {
            FailureKind::Error
        } else {
            FailureKind::Failure
        };

        let message = failures
            .iter()
            .filter_map(|n| n.attribute("message"))
            .collect::<Vec<_>>()
            .join("\n");
        let body = failures
            .iter()
            .map(|n| element_text(*n))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let context = if self.context.is_empty() {
            None
        } else {
            let start = first.range().start;
            let end = failures.last().map_or(first.range().end, |n| n.range().end);
            context_window(source, start..end, self.context)
        };

        Some(FailureRecord {
            report: report.to_string(),
            key: FailureKey::new(
                testcase.attribute("classname").unwrap_or_default(),
                testcase.attribute("name").unwrap_or_default(),
            ),
            kind,
            message,
            body,
            context,
        })
    }
}

fn element_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Source lines before and after the byte span, excluding the span's own lines.
fn context_window(source: &str, span: Range<usize>, window: XmlContext) -> Option<String> {
    let first_line = line_of(source, span.start);
    let last_line = line_of(source, span.end.saturating_sub(1).max(span.start));
    let lines: Vec<&str> = source.lines().collect();

    let before_start = first_line.saturating_sub(window.before);
    let after_end = (last_line + 1 + window.after).min(lines.len());

    let mut picked: Vec<&str> = Vec::new();
    picked.extend(lines.get(before_start..first_line).unwrap_or_default());
    picked.extend(lines.get(last_line + 1..after_end).unwrap_or_default());

    let joined = picked
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!joined.is_empty()).then_some(joined)
}

fn line_of(source: &str, byte: usize) -> usize {
    let byte = byte.min(source.len());
    source.as_bytes()[..byte].iter().filter(|b| **b == b'\n').count()
}
