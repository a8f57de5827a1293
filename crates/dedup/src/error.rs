use thiserror::Error;

pub type Result<T> = std::result::Result<T, DedupError>;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Similarity threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("max_comparable_length must be > 0")]
    InvalidMaxLength,

    #[error("Invalid placeholder: {0}")]
    InvalidPlaceholder(String),

    #[error("{0}")]
    Other(String),
}
