use serde::Serialize;
use thiserror::Error;

/// Result type for matcher operations
pub type Result<T> = std::result::Result<T, MatchError>;

/// Errors raised while loading rules or evaluating a build
#[derive(Error, Debug)]
pub enum MatchError {
    /// The rule database holds no defect that can ever match
    #[error("No usable defect rules loaded; refusing to triage")]
    NoRulesLoaded,

    /// One defect entry could not be compiled
    #[error("Invalid rule {id}: {reason}")]
    InvalidRule { id: String, reason: String },

    /// A required artifact is absent from the build
    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    /// A structured test report could not be parsed
    #[error("Malformed report {name}: {reason}")]
    MalformedReport { name: String, reason: String },

    /// The rule database document itself is unusable
    #[error("Rule database error: {0}")]
    RuleDatabase(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MatchError {
    pub fn malformed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedReport {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_rule(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidRule {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Non-fatal condition noticed while triaging one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    MissingArtifact { target: String },
    MalformedReport { name: String, reason: String },
    UnreadableArtifact { name: String, reason: String },
    InvalidRule { id: String, reason: String },
    /// The build's directory or manifest could not be loaded; it was skipped.
    UnloadableBuild { reason: String },
}

impl Diagnostic {
    /// Converts a recoverable error into a diagnostic; fatal errors pass through.
    pub fn from_error(err: MatchError) -> std::result::Result<Self, MatchError> {
        match err {
            MatchError::MissingArtifact(target) => Ok(Self::MissingArtifact { target }),
            MatchError::MalformedReport { name, reason } => {
                Ok(Self::MalformedReport { name, reason })
            }
            MatchError::InvalidRule { id, reason } => Ok(Self::InvalidRule { id, reason }),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingArtifact { target } => write!(f, "missing artifact {target}"),
            Self::MalformedReport { name, reason } => write!(f, "malformed report {name}: {reason}"),
            Self::UnreadableArtifact { name, reason } => {
                write!(f, "unreadable artifact {name}: {reason}")
            }
            Self::InvalidRule { id, reason } => write!(f, "invalid rule {id}: {reason}"),
            Self::UnloadableBuild { reason } => write!(f, "build not loaded: {reason}"),
        }
    }
}
