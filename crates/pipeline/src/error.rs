use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] canon_extract::ParseError),

    #[error("Render error: {0}")]
    Render(#[from] canon_render::RenderError),

    #[error("Store error: {0}")]
    Store(#[from] canon_ir::IrError),

    #[error("Cannot detect diagram format")]
    UnknownFormat,

    #[error("External service failure: {0}")]
    ExternalService(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
