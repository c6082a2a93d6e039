use thiserror::Error;

/// Errors produced by type construction and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("unsupported metadata value for key {key:?}: {reason}")]
    UnsupportedMetaValue { key: String, reason: String },

    #[error("invalid file options: {0}")]
    InvalidOpts(String),

    #[error("invalid block id: {0}")]
    InvalidBlockId(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),
}
