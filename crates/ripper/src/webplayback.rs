//! webPlayback endpoint and asset-key extraction.
//!
//! Lossy audio and music videos are served as complete assets keyed by a
//! Widevine-derived content key. The webPlayback call resolves an adam id
//! into those asset URLs; the asset's media playlist carries the key id
//! (after the comma in the key URI) and the file/segment URLs.

use m3u8_rs::{Playlist, parse_playlist_res};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::RipError;

const WEBPLAYBACK_URL: &str =
    "https://play.music.apple.com/WebObjects/MZPlay.woa/wa/webPlayback";
const ORIGIN: &str = "https://music.apple.com";
const REFERER: &str = "https://music.apple.com/";
const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Flavor of the 256 kbps protected AAC asset.
pub const CTRP256_FLAVOR: &str = "28:ctrp256";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebPlaybackAsset {
    #[serde(default)]
    pub flavor: String,
    #[serde(rename = "URL", default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebPlaybackSong {
    #[serde(rename = "hls-playlist-url", default)]
    pub hls_playlist_url: String,
    #[serde(default)]
    pub assets: Vec<WebPlaybackAsset>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WebPlaybackResponse {
    #[serde(rename = "songList", default)]
    song_list: Vec<WebPlaybackSong>,
}

/// Resolve an adam id through webPlayback.
pub async fn fetch_song(
    http: &Client,
    adam_id: &str,
    dev_token: &str,
    media_user_token: &str,
) -> Result<WebPlaybackSong, RipError> {
    let response = http
        .post(WEBPLAYBACK_URL)
        .json(&serde_json::json!({ "salableAdamId": adam_id }))
        .bearer_auth(dev_token)
        .header("x-apple-music-user-token", media_user_token)
        .header(reqwest::header::ORIGIN, ORIGIN)
        .header(reqwest::header::REFERER, REFERER)
        .header(reqwest::header::USER_AGENT, DESKTOP_USER_AGENT)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(RipError::http_status(status, WEBPLAYBACK_URL));
    }
    let parsed: WebPlaybackResponse = response.json().await?;
    parsed
        .song_list
        .into_iter()
        .next()
        .ok_or_else(|| RipError::manifest("webplayback returned no songs"))
}

/// The ctrp256 asset URL of a webPlayback song, when offered.
pub fn ctrp_asset_url(song: &WebPlaybackSong) -> Option<&str> {
    song.assets
        .iter()
        .find(|asset| asset.flavor == CTRP256_FLAVOR)
        .map(|asset| asset.url.as_str())
}

/// Key id and media URLs extracted from an asset's media playlist.
#[derive(Debug, Clone)]
pub struct AssetExtract {
    /// Base64 key id from the key URI (the part after the first comma).
    pub key_id: String,
    /// The init-map URL; for whole-file assets this is the full media file.
    pub map_url: Url,
    /// Every media-segment URL, in playlist order (music-video mode only).
    pub segment_urls: Vec<Url>,
}

/// Pull the key id and media URLs out of an asset playlist.
pub async fn extract_asset(
    http: &Client,
    playlist_url: &str,
    collect_segments: bool,
) -> Result<AssetExtract, RipError> {
    let base = Url::parse(playlist_url)
        .map_err(|e| RipError::manifest(format!("bad asset playlist URL: {e}")))?;
    let response = http.get(base.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RipError::http_status(status, playlist_url));
    }
    let body = response.text().await?;

    let media = match parse_playlist_res(body.as_bytes()) {
        Ok(Playlist::MediaPlaylist(media)) => media,
        Ok(Playlist::MasterPlaylist(_)) => {
            return Err(RipError::manifest("asset playlist is not a media playlist"));
        }
        Err(e) => {
            return Err(RipError::manifest(format!("failed to parse asset playlist: {e}")));
        }
    };

    let key_uri = media
        .segments
        .iter()
        .find_map(|segment| segment.key.as_ref())
        .and_then(|key| key.uri.as_deref())
        .ok_or_else(|| RipError::manifest("no key information found"))?;
    let key_id = key_uri
        .split_once(',')
        .map(|(_, kid)| kid.to_string())
        .ok_or_else(|| RipError::manifest("key URI carries no key id"))?;

    let map_uri = media
        .segments
        .iter()
        .find_map(|segment| segment.map.as_ref())
        .map(|map| map.uri.clone())
        .ok_or_else(|| RipError::manifest("asset playlist has no init map"))?;
    let map_url = base
        .join(&map_uri)
        .map_err(|e| RipError::manifest(format!("bad map URI: {e}")))?;

    let mut segment_urls = Vec::new();
    if collect_segments {
        for segment in &media.segments {
            if segment.uri.is_empty() {
                continue;
            }
            segment_urls.push(
                base.join(&segment.uri)
                    .map_err(|e| RipError::manifest(format!("bad segment URI: {e}")))?,
            );
        }
    }

    debug!(
        key_id = %key_id,
        segments = segment_urls.len(),
        "extracted asset playlist"
    );
    Ok(AssetExtract {
        key_id,
        map_url,
        segment_urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSET_PLAYLIST: &str = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:6
#EXT-X-KEY:METHOD=SAMPLE-AES-CTR,URI=\"data:text/plain;base64,c29tZS1wc3NoLWJsb2I=,QUJDREVGR0g=\",KEYFORMAT=\"urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed\"
#EXT-X-MAP:URI=\"asset.mp4\"
#EXTINF:6.0,
seg_0.mp4
#EXTINF:6.0,
seg_1.mp4
#EXT-X-ENDLIST
";

    #[tokio::test]
    async fn test_extract_asset_key_map_and_segments() {
        let router = axum::Router::new().route(
            "/asset/stream.m3u8",
            axum::routing::get(|| async { ASSET_PLAYLIST }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let url = format!("http://{addr}/asset/stream.m3u8");
        let extract = extract_asset(&Client::new(), &url, true).await.unwrap();
        assert_eq!(extract.key_id, "QUJDREVGR0g=");
        assert!(extract.map_url.as_str().ends_with("/asset/asset.mp4"));
        assert_eq!(extract.segment_urls.len(), 2);
        assert!(extract.segment_urls[1].as_str().ends_with("/asset/seg_1.mp4"));
    }

    #[test]
    fn test_ctrp_asset_lookup() {
        let song = WebPlaybackSong {
            hls_playlist_url: String::new(),
            assets: vec![
                WebPlaybackAsset {
                    flavor: "30:ctrp64".into(),
                    url: "https://assets/low".into(),
                },
                WebPlaybackAsset {
                    flavor: CTRP256_FLAVOR.into(),
                    url: "https://assets/full".into(),
                },
            ],
        };
        assert_eq!(ctrp_asset_url(&song), Some("https://assets/full"));
    }
}
