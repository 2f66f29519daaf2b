use catalog::CatalogError;
use hls::SelectError;
use ripper::RipError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Rip(#[from] RipError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("unsupported or invalid URL: {input}")]
    InvalidUrl { input: String },

    #[error("{0}")]
    Unavailable(String),
}
