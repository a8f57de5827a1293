//! # Triage Matcher
//!
//! Matches failed CI builds against a database of known defect signatures.
//!
//! ## Features
//!
//! - **Signature rules** - per job type OR-lists of AND-clauses over artifact targets
//! - **Artifact views** - in-memory or directory backed, glob resolution
//! - **Structured reports** - JUnit/xUnit failures matched one test case at a time
//! - **Unfiled defects** - reproducible placeholders for failures no rule explains
//!
//! ## Architecture
//!
//! ```text
//! RuleSet (compiled once)
//!     │
//!     └──> TriageEngine::triage_build(BuildInput)
//!            │
//!            ├─ SignatureMatcher
//!            │    ├─ Resolve targets (literal, job-qualified, glob, `*`)
//!            │    ├─ Evaluate pattern specs (text files whole, XML per failure)
//!            │    └─ Reconcile claimed failures
//!            │
//!            └─ UnfiledSynthesizer
//!                 ├─ One placeholder per unclaimed report failure
//!                 └─ Whole-build placeholder from the console otherwise
//! ```

mod artifact;
mod config;
mod engine;
mod error;
mod matcher;
mod pattern;
mod rules;
mod synthesizer;
mod xml;

pub use artifact::{Artifact, ArtifactKind, ArtifactView, DirectoryArtifacts, MemoryArtifacts};
pub use config::{MatcherConfig, XmlContext};
pub use engine::{triage_view, BuildTriage, TriageEngine, TriageSummary};
pub use error::{Diagnostic, MatchError, Result};
pub use matcher::{canonical_name, qualify, reconcile, BuildInput, MatchOutcome, SignatureMatcher};
pub use pattern::PatternSpec;
pub use rules::{Clause, DefectRule, Requirement, RuleSet, Target};
pub use synthesizer::{is_unfiled_id, unfiled_id, RawFailure, UnfiledSynthesizer, UNFILED_PREFIX};
pub use xml::{FailureKind, FailureRecord, XmlFailureExtractor};
