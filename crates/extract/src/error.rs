use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

/// Structural failures of a deterministic source. Unknown style or shape codes
/// never end up here; they fall back to defaults.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("XML error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("Malformed diagram: {0}")]
    Malformed(String),

    #[error("Cannot decode compressed page: {0}")]
    Decode(String),

    #[error("Page {index} not found ({total} pages)")]
    PageNotFound { index: usize, total: usize },

    #[error("SVG only wraps an embedded raster image")]
    EmbeddedRaster,

    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("Source is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}
