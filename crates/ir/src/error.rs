use thiserror::Error;

pub type Result<T> = std::result::Result<T, IrError>;

#[derive(Error, Debug)]
pub enum IrError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    #[error("{0}")]
    Other(String),
}
