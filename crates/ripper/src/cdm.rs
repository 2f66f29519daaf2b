//! Content-key acquisition and the lossy-audio runner.
//!
//! The key itself comes from a CDM collaborator behind `ContentKeySource`;
//! the default implementation shells out to a helper command that performs
//! the license exchange and prints `<keyid>:<key>` in hex — the exact
//! `--key` syntax of the external block-mode decryptor.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::RipError;
use crate::tools::ExternalTools;
use crate::webplayback::{ctrp_asset_url, extract_asset, fetch_song};

/// A content key in `<keyid-hex>:<key-hex>` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKey {
    pub value: String,
}

#[async_trait]
pub trait ContentKeySource: Send + Sync {
    async fn content_key(&self, adam_id: &str, key_id: &str) -> Result<ContentKey, RipError>;
}

/// External CDM helper process.
///
/// Invoked as `<command> --adam-id <id> --kid <base64>`; must print the
/// `<keyid>:<key>` hex pair on stdout.
#[derive(Debug, Clone)]
pub struct CdmHelperCommand {
    pub command: String,
}

#[async_trait]
impl ContentKeySource for CdmHelperCommand {
    async fn content_key(&self, adam_id: &str, key_id: &str) -> Result<ContentKey, RipError> {
        let output = tokio::process::Command::new(&self.command)
            .args(["--adam-id", adam_id, "--kid", key_id])
            .output()
            .await
            .map_err(|e| RipError::ExternalTool {
                tool: self.command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RipError::ExternalTool {
                tool: self.command.clone(),
                reason: format!(
                    "exit {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !value.contains(':') || value.split(':').any(|part| hex::decode(part).is_err()) {
            return Err(RipError::ExternalTool {
                tool: self.command.clone(),
                reason: format!("unexpected key output `{value}`"),
            });
        }
        debug!(adam_id, "content key acquired");
        Ok(ContentKey { value })
    }
}

async fn download_to(http: &Client, url: &Url, path: &Path) -> Result<u64, RipError> {
    let mut response = http.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RipError::http_status(status, url.to_string()));
    }
    let mut file = tokio::fs::File::create(path).await?;
    let mut total = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(total)
}

/// Download and decrypt one lossy-audio track via its webPlayback asset.
pub async fn run_cdm_track(
    http: &Client,
    adam_id: &str,
    dev_token: &str,
    media_user_token: &str,
    key_source: &dyn ContentKeySource,
    tools: &ExternalTools,
    out_path: &Path,
) -> Result<(), RipError> {
    let song = fetch_song(http, adam_id, dev_token, media_user_token).await?;
    let asset_url = ctrp_asset_url(&song)
        .ok_or_else(|| RipError::manifest("no ctrp256 asset offered for this track"))?;
    let asset = extract_asset(http, asset_url, false).await?;
    let key = key_source.content_key(adam_id, &asset.key_id).await?;

    let staging = tempfile::Builder::new()
        .prefix("enc_track-")
        .suffix(".mp4")
        .tempfile()?;
    let bytes = download_to(http, &asset.map_url, staging.path()).await?;
    info!(adam_id, bytes, "asset downloaded");

    tools.decrypt_file(&key.value, staging.path(), out_path).await?;
    Ok(())
}
