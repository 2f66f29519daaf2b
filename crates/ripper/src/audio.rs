//! Key-helper socket runner for ALAC/Atmos audio tracks.
//!
//! Fetches the media playlist, downloads the single byte-ranged media file
//! (fully in memory when small enough, staged through a temp file
//! otherwise), then walks its fragments on a blocking task: announce the
//! segment's key to the helper, decrypt the fragment's samples, strip DRM
//! boxes and append to the output file. Fragments map 1:1 onto playlist
//! segments by position.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use m3u8_rs::{MediaSegment, Playlist, parse_playlist_res};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::decrypt::decrypt_fragment;
use crate::error::RipError;
use crate::keyhelper::KeyHelperSession;

#[derive(Debug, Clone)]
pub struct SocketRunnerConfig {
    /// `host:port` of the key-serving helper.
    pub key_helper_addr: String,
    /// Downloads below this many MiB decrypt straight from memory.
    pub max_memory_mib: u64,
}

/// Drop `#EXT-X-KEY:` lines that do not carry `streamingkeydelivery`;
/// other key-format lines (FairPlay cert URIs and the like) would confuse
/// positional key announcement.
fn filter_key_lines(playlist: &str) -> String {
    let mut out = String::with_capacity(playlist.len());
    for line in playlist.lines() {
        if line.starts_with("#EXT-X-KEY:") && !line.contains("streamingkeydelivery") {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn parse_media_segments(playlist: &str) -> Result<Vec<MediaSegment>, RipError> {
    match parse_playlist_res(playlist.as_bytes()) {
        Ok(Playlist::MediaPlaylist(media)) => Ok(media.segments),
        Ok(Playlist::MasterPlaylist(_)) => Err(RipError::manifest("m3u8 not of media type")),
        Err(e) => Err(RipError::manifest(format!("failed to parse media playlist: {e}"))),
    }
}

enum MediaSource {
    Memory(Vec<u8>),
    File(std::fs::File),
}

impl MediaSource {
    fn into_reader(self) -> Box<dyn Read + Send> {
        match self {
            Self::Memory(data) => Box::new(std::io::Cursor::new(data)),
            Self::File(file) => Box::new(std::io::BufReader::new(file)),
        }
    }
}

async fn download_media(
    http: &Client,
    url: &Url,
    max_memory_bytes: u64,
) -> Result<MediaSource, RipError> {
    let response = http.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RipError::http_status(status, url.to_string()));
    }

    let content_length = response.content_length().unwrap_or(0);
    if content_length > 0 && content_length < max_memory_bytes {
        let body = response.bytes().await?;
        debug!(bytes = body.len(), "media file buffered in memory");
        return Ok(MediaSource::Memory(body.to_vec()));
    }

    // Unknown or large size: tee the body into an unlinked temp file.
    let tmp = tempfile::tempfile()?;
    let mut writer = tokio::fs::File::from_std(tmp);
    let mut response = response;
    let mut total = 0u64;
    while let Some(chunk) = response.chunk().await? {
        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    writer.flush().await?;
    let mut file = writer.into_std().await;
    file.seek(SeekFrom::Start(0))?;
    debug!(bytes = total, "media file staged to temp file");
    Ok(MediaSource::File(file))
}

fn decrypt_stream_to_file(
    mut reader: Box<dyn Read + Send>,
    segment_keys: &[Option<String>],
    adam_id: &str,
    key_helper_addr: &str,
    out_path: &Path,
) -> Result<(), RipError> {
    let (mut init, mut offset) = fmp4::read_init(&mut reader)?;
    let tracks = fmp4::transform_init(&mut init)?;

    let mut session = KeyHelperSession::connect(key_helper_addr)
        .map_err(|e| RipError::decrypt(format!("key helper connect: {e}")))?;

    let out = std::fs::File::create(out_path)?;
    let mut out = std::io::BufWriter::new(out);
    init.encode_into(&mut out)?;

    let mut index = 0usize;
    while let Some((mut frag, new_offset)) = fmp4::read_fragment(&mut reader, offset)? {
        let Some(key) = segment_keys.get(index) else {
            return Err(RipError::manifest(
                "mp4 fragment count exceeds playlist segment count",
            ));
        };
        if let Some(key_uri) = key {
            session
                .begin_key(index, adam_id, key_uri)
                .map_err(|e| RipError::decrypt(format!("key helper I/O: {e}")))?;
        }

        decrypt_fragment(&mut frag, &tracks, &mut session)?;
        frag.encode_into(&mut out)?;

        debug!(index, bytes = new_offset - offset, "fragment decrypted");
        offset = new_offset;
        index += 1;
    }

    if let Err(e) = session.close() {
        warn!(error = %e, "key helper close failed");
    }
    out.flush()?;
    info!(fragments = index, "track decrypted");
    Ok(())
}

/// Download and decrypt one audio track through the key helper.
pub async fn run_socket_track(
    http: &Client,
    adam_id: &str,
    playlist_url: &Url,
    out_path: &Path,
    config: &SocketRunnerConfig,
) -> Result<(), RipError> {
    let playlist_text = hls::fetch_playlist_text(http, playlist_url).await?;
    let segments = parse_media_segments(&filter_key_lines(&playlist_text))?;

    let first = segments
        .first()
        .ok_or_else(|| RipError::manifest("no segments extracted from playlist"))?;
    if !first.byte_range.as_ref().is_some_and(|r| r.length > 0) {
        return Err(RipError::manifest(
            "non-byterange playlists are not supported",
        ));
    }

    let file_url = playlist_url
        .join(&first.uri)
        .map_err(|e| RipError::manifest(format!("bad segment URI: {e}")))?;
    let segment_keys: Vec<Option<String>> = segments
        .iter()
        .map(|s| s.key.as_ref().and_then(|k| k.uri.clone()))
        .collect();

    let source = download_media(http, &file_url, config.max_memory_mib * 1024 * 1024).await?;

    let adam_id = adam_id.to_string();
    let addr = config.key_helper_addr.clone();
    let out_path: PathBuf = out_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        decrypt_stream_to_file(source.into_reader(), &segment_keys, &adam_id, &addr, &out_path)
    })
    .await
    .map_err(|e| RipError::decrypt(format!("decrypt task panicked: {e}")))?
}
