use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RulesError>;

#[derive(Error, Debug)]
pub enum RulesError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IR error: {0}")]
    Ir(#[from] canon_ir::IrError),

    /// The consolidated index exists but cannot be parsed; it is never overwritten.
    #[error("Corrupt rule index {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Malformed rule table {path}: {reason}")]
    MalformedTable { path: PathBuf, reason: String },

    #[error("Index lock error: {0}")]
    Lock(String),

    #[error("Invalid corpus: {0}")]
    InvalidCorpus(String),

    #[error("{0}")]
    Other(String),
}
