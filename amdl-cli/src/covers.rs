//! Cover-art download.
//!
//! Artwork URLs are templates carrying a `{w}x{h}` placeholder; the
//! configured cover size fills it in. Anything fancier (format rewriting,
//! original-resolution URL surgery) belongs to an external helper.

use std::path::{Path, PathBuf};

use reqwest::Client;
use tracing::debug;

use crate::error::AppError;

/// Fetch artwork into `<dir>/<name>.<format>`, replacing any existing file.
pub async fn write_cover(
    http: &Client,
    dir: &Path,
    name: &str,
    artwork_url: &str,
    size: &str,
    format: &str,
) -> Result<PathBuf, AppError> {
    let url = artwork_url.replacen("{w}x{h}", size, 1);
    let path = dir.join(format!("{name}.{format}"));

    let response = http.get(&url).send().await.map_err(ripper::RipError::from)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ripper::RipError::http_status(status, url).into());
    }
    let body = response.bytes().await.map_err(ripper::RipError::from)?;
    tokio::fs::write(&path, &body).await?;
    debug!(path = %path.display(), bytes = body.len(), "cover written");
    Ok(path)
}
