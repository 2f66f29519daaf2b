//! Playlist fetching.

use m3u8_rs::MasterPlaylist;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::SelectError;
use crate::select::parse_master;

/// Fetch a playlist body, failing on non-2xx responses.
pub async fn fetch_playlist_text(client: &Client, url: &Url) -> Result<String, SelectError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SelectError::HttpStatus {
            status,
            url: url.to_string(),
        });
    }
    let body = response.text().await?;
    debug!(url = %url, bytes = body.len(), "fetched playlist");
    Ok(body)
}

/// Fetch and parse a master playlist, rejecting media playlists.
pub async fn fetch_master(client: &Client, url: &Url) -> Result<MasterPlaylist, SelectError> {
    let body = fetch_playlist_text(client, url).await?;
    parse_master(&body)
}
