use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RipError {
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("manifest error: {reason}")]
    Manifest { reason: String },

    #[error(transparent)]
    Select(#[from] hls::SelectError),

    #[error("decrypt error: {reason}")]
    Decrypt { reason: String },

    #[error(transparent)]
    Box(#[from] fmp4::FmpError),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("`{tool}` failed: {reason}")]
    ExternalTool { tool: String, reason: String },

    #[error("credential error: {reason}")]
    Credential { reason: String },
}

impl RipError {
    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    pub fn decrypt(reason: impl Into<String>) -> Self {
        Self::Decrypt {
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// True when the preferred codec is simply absent from the manifest.
    pub fn is_codec_unavailable(&self) -> bool {
        matches!(self, Self::Select(hls::SelectError::CodecUnavailable { .. }))
    }
}
