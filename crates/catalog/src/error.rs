use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("API request failed with status {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("empty {what} response from catalog")]
    Empty { what: &'static str },

    #[error("invalid {kind} URL: {input}")]
    InvalidUrl { kind: &'static str, input: String },

    #[error(
        "developer token not configured; set APPLE_DEV_TOKEN/DEV_TOKEN or authorization-token"
    )]
    MissingToken,
}
