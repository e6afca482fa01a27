use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Missing diagram header")]
    MissingHeader,

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unsupported diagram kind: {0}")]
    Unsupported(String),
}
