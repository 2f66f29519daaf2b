use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("codec {codec} not found in master playlist")]
    CodecUnavailable { codec: String },

    #[error("m3u8 not of master type")]
    NotMaster,

    #[error("failed to parse m3u8: {reason}")]
    Parse { reason: String },

    #[error("unsupported aac-type `{0}`")]
    UnsupportedAacType(String),

    #[error("no suitable video stream found")]
    NoVideoStream,

    #[error("no suitable audio stream found")]
    NoAudioRendition,

    #[error("invalid variant URL: {source}")]
    Url {
        #[from]
        source: url::ParseError,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },
}
