//! Per-URL pipeline orchestration.
//!
//! Tracks download strictly sequentially; each rip resolves its stream,
//! reports through the progress protocol, downloads via the runner its
//! codec asks for, then stamps tags. Per-track failures feed the run
//! counters and never abort the remaining tracks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use catalog::{AlbumData, AmpClient, PlaylistData, TrackData, TrackProbe};
use hls::{CodecLabel, MasterPlaylist, SelectionPolicy, StreamSelection};
use reqwest::Client;
use ripper::{
    CdmHelperCommand, ExternalTools, ProgressEmitter, ProgressRecord, Runner, SocketRunnerConfig,
};
use tracing::{error, info, warn};
use url::Url;

use crate::config::Config;
use crate::covers::write_cover;
use crate::error::AppError;
use crate::paths::{apply_template, limit_string, sanitize};
use crate::tags::{TagContext, build_tags};

/// Run-level outcome counters.
#[derive(Debug, Default)]
pub struct Counters {
    pub total: u32,
    pub success: u32,
    pub error: u32,
    pub unavailable: u32,
    /// Completed task numbers per container id.
    pub ok_tracks: HashMap<String, Vec<u32>>,
}

pub struct App {
    pub http: Client,
    pub amp: AmpClient,
    pub config: Config,
    pub policy: SelectionPolicy,
    pub tools: ExternalTools,
    pub key_source: CdmHelperCommand,
    pub emitter: Arc<Mutex<ProgressEmitter>>,
    pub counters: Counters,
    pub make_curator_folder: bool,
}

/// Everything one track rip needs, resolved by the container loop.
pub struct TrackJob {
    pub data: TrackData,
    pub storefront: String,
    /// Container kind: `albums`, `playlists` or `stations`.
    pub pre_kind: String,
    pub pre_id: String,
    pub task_num: u32,
    pub task_total: u32,
    /// Master-playlist URL from `extended-asset-urls.enhanced-hls`.
    pub master_url: String,
    pub artist_folder: String,
    pub container_folder: String,
    pub cover_path: Option<PathBuf>,
    pub playlist: Option<PlaylistData>,
    pub album: Option<AlbumData>,
    pub is_user_playlist: bool,
}

impl App {
    pub fn emit(&self, record: ProgressRecord) {
        self.emitter.lock().expect("emitter lock").emit(&record);
    }

    fn emit_json(&self, document: &serde_json::Value) {
        self.emitter
            .lock()
            .expect("emitter lock")
            .emit_json_document(document);
    }

    fn preferred(&self) -> CodecLabel {
        self.policy.codec
    }

    async fn song_master_url(&self, storefront: &str, track_id: &str) -> Option<String> {
        let manifest = self.amp.song(storefront, track_id).await.ok()?;
        let song = manifest.data.into_iter().next()?;
        let url = song.attributes.extended_asset_urls.enhanced_hls;
        if url.is_empty() { None } else { Some(url) }
    }

    async fn fetch_master(&self, master_url: &str) -> Result<(MasterPlaylist, Url), AppError> {
        let base = Url::parse(master_url).map_err(|_| AppError::InvalidUrl {
            input: master_url.to_string(),
        })?;
        let master = hls::fetch_master(&self.http, &base).await?;
        Ok((master, base))
    }

    /// The `{Tag}` template token: Apple-Digital-Master / explicit / clean
    /// markers joined by spaces.
    fn tag_token(&self, is_digital_master: bool, content_rating: &str) -> String {
        let mut parts = Vec::new();
        if is_digital_master && !self.config.apple_master_choice.is_empty() {
            parts.push(self.config.apple_master_choice.as_str());
        }
        if content_rating == "explicit" && !self.config.explicit_choice.is_empty() {
            parts.push(self.config.explicit_choice.as_str());
        }
        if content_rating == "clean" && !self.config.clean_choice.is_empty() {
            parts.push(self.config.clean_choice.as_str());
        }
        parts.join(" ")
    }

    pub fn artist_folder_name(&self, artist_name: &str, artist_id: &str) -> String {
        if self.config.artist_folder_format.is_empty() {
            return String::new();
        }
        let limited = limit_string(artist_name, self.config.limit_max);
        sanitize(&apply_template(
            &self.config.artist_folder_format,
            &[
                ("{UrlArtistName}", limited.as_str()),
                ("{ArtistName}", limited.as_str()),
                ("{ArtistId}", artist_id),
            ],
        ))
    }

    /// Probe all tracks, streaming probe_* records, and return them in
    /// input order.
    async fn probe_all(&self, storefront: &str, tracks: Vec<TrackData>) -> Vec<TrackProbe> {
        self.emit(ProgressRecord::ProbeStart {
            total: tracks.len(),
        });
        let emitter = Arc::clone(&self.emitter);
        catalog::probe_tracks(
            &self.amp,
            &self.http,
            storefront,
            &self.policy,
            tracks,
            move |current, total| {
                emitter
                    .lock()
                    .expect("emitter lock")
                    .emit(&ProgressRecord::ProbeProgress { current, total });
            },
        )
        .await
    }

    pub async fn rip_album(
        &mut self,
        storefront: &str,
        album_id: &str,
        url_track_id: Option<&str>,
        dl_song: bool,
        json_output: bool,
    ) -> Result<(), AppError> {
        let response = self.amp.album(storefront, album_id).await?;
        let album = response
            .data
            .into_iter()
            .next()
            .ok_or(catalog::CatalogError::Empty { what: "album" })?;

        let all_tracks = album.relationships.tracks.data.clone();
        if json_output {
            let tracks = if dl_song && url_track_id.is_some() {
                all_tracks
                    .iter()
                    .filter(|t| Some(t.id.as_str()) == url_track_id)
                    .cloned()
                    .collect()
            } else {
                all_tracks
            };
            if tracks.is_empty() {
                self.emit_json(&serde_json::json!({
                    "albumData": album,
                    "tracks": [],
                }));
                return Ok(());
            }
            let probes = self.probe_all(storefront, tracks).await;
            if !catalog::any_track_matches(&probes, self.preferred().as_str()) && !dl_song {
                return Err(AppError::Unavailable(format!(
                    "This album is not available in the selected quality ({})",
                    self.preferred()
                )));
            }
            self.emit_json(&serde_json::json!({
                "albumData": album,
                "tracks": probes,
            }));
            return Ok(());
        }

        let artist_id = album
            .relationships
            .artists
            .data
            .first()
            .map(|a| a.id.clone())
            .unwrap_or_default();
        let artist_folder = self.artist_folder_name(&album.attributes.artist_name, &artist_id);

        let album_quality = if self.config.album_folder_format.contains("{Quality}") {
            self.album_quality(storefront, &all_tracks).await
        } else {
            String::new()
        };
        let tag_token = self.tag_token(
            album.attributes.is_apple_digital_master || album.attributes.is_mastered_for_itunes,
            &album.attributes.content_rating,
        );
        let album_folder = sanitize(&apply_template(
            &self.config.album_folder_format,
            &[
                ("{ReleaseDate}", album.attributes.release_date.as_str()),
                (
                    "{ReleaseYear}",
                    album.attributes.release_date.get(..4).unwrap_or_default(),
                ),
                (
                    "{ArtistName}",
                    limit_string(&album.attributes.artist_name, self.config.limit_max).as_str(),
                ),
                (
                    "{AlbumName}",
                    limit_string(&album.attributes.name, self.config.limit_max).as_str(),
                ),
                ("{UPC}", album.attributes.upc.as_str()),
                ("{RecordLabel}", album.attributes.record_label.as_str()),
                ("{Copyright}", album.attributes.copyright.as_str()),
                ("{AlbumId}", album_id),
                ("{Quality}", album_quality.as_str()),
                ("{Codec}", self.preferred().as_str()),
                ("{Tag}", tag_token.as_str()),
            ],
        ));

        let container_dir = PathBuf::from(self.config.save_folder_for(self.preferred()))
            .join(&artist_folder)
            .join(&album_folder);
        tokio::fs::create_dir_all(&container_dir).await?;

        if self.config.save_artist_cover
            && let Some(artist) = album.relationships.artists.data.first()
            && !artist.attributes.artwork.url.is_empty()
        {
            let artist_dir = PathBuf::from(self.config.save_folder_for(self.preferred()))
                .join(&artist_folder);
            if let Err(e) = write_cover(
                &self.http,
                &artist_dir,
                "folder",
                &artist.attributes.artwork.url,
                &self.config.cover_size,
                &self.config.cover_format,
            )
            .await
            {
                warn!(error = %e, "failed to write artist cover");
            }
        }

        let cover_path = match write_cover(
            &self.http,
            &container_dir,
            "cover",
            &album.attributes.artwork.url,
            &self.config.cover_size,
            &self.config.cover_format,
        )
        .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "failed to write cover");
                None
            }
        };

        let total = all_tracks.len() as u32;
        for (index, track) in all_tracks.into_iter().enumerate() {
            let (task_num, task_total) = if dl_song {
                match url_track_id {
                    // Unknown ?i= ids make the whole run a no-op.
                    Some(id) if id == track.id => (
                        track.attributes.track_number,
                        album.attributes.track_count,
                    ),
                    _ => continue,
                }
            } else {
                (index as u32 + 1, total)
            };

            let mut job = TrackJob {
                storefront: storefront.to_string(),
                pre_kind: "albums".to_string(),
                pre_id: album_id.to_string(),
                task_num,
                task_total,
                master_url: String::new(),
                artist_folder: artist_folder.clone(),
                container_folder: album_folder.clone(),
                cover_path: cover_path.clone(),
                playlist: None,
                album: Some(album.clone()),
                is_user_playlist: false,
                data: track,
            };

            self.announce_stream(&mut job).await;
            self.rip_track(&mut job).await;
            if dl_song {
                break;
            }
        }
        Ok(())
    }

    pub async fn rip_playlist(
        &mut self,
        storefront: &str,
        playlist_id: &str,
        json_output: bool,
    ) -> Result<(), AppError> {
        let response = self.amp.playlist(storefront, playlist_id).await?;
        let playlist = response
            .data
            .into_iter()
            .next()
            .ok_or(catalog::CatalogError::Empty { what: "playlist" })?;
        let is_user_playlist = playlist_id.starts_with("pl.u-");

        let tracks = playlist.relationships.tracks.data.clone();
        if json_output {
            let probes = self.probe_all(storefront, tracks).await;
            if !catalog::any_track_matches(&probes, self.preferred().as_str()) {
                return Err(AppError::Unavailable(format!(
                    "This playlist is not available in the selected quality ({})",
                    self.preferred()
                )));
            }
            self.emit_json(&serde_json::json!({
                "albumData": {
                    "type": "playlists",
                    "id": playlist_id,
                    "attributes": {
                        "name": playlist.attributes.name,
                        "artistName": playlist.attributes.curator_name,
                        "url": playlist.attributes.url,
                        "artwork": playlist.attributes.artwork,
                    },
                },
                "tracks": probes,
            }));
            return Ok(());
        }

        let base_dir = PathBuf::from(self.config.save_folder_for(self.preferred()));
        let curator_dir = if self.make_curator_folder {
            base_dir.join(self.artist_folder_name("Apple Music", ""))
        } else {
            base_dir
        };

        let playlist_folder = sanitize(&apply_template(
            &self.config.playlist_folder_format,
            &[
                ("{ArtistName}", "Apple Music"),
                (
                    "{PlaylistName}",
                    limit_string(&playlist.attributes.name, self.config.limit_max).as_str(),
                ),
                ("{PlaylistId}", playlist_id),
                ("{Quality}", ""),
                ("{Codec}", self.preferred().as_str()),
                ("{Tag}", ""),
            ],
        ));
        let container_dir = curator_dir.join(&playlist_folder);
        tokio::fs::create_dir_all(&container_dir).await?;

        let cover_path = match write_cover(
            &self.http,
            &container_dir,
            "cover",
            &playlist.attributes.artwork.url,
            &self.config.cover_size,
            &self.config.cover_format,
        )
        .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "failed to write cover");
                None
            }
        };

        // The playlist folder sits directly under the (curator) root: the
        // rip joins base/artist/container, so the artist component is empty.
        let artist_component = if self.make_curator_folder {
            self.artist_folder_name("Apple Music", "")
        } else {
            String::new()
        };

        let total = tracks.len() as u32;
        for (index, track) in tracks.into_iter().enumerate() {
            let mut job = TrackJob {
                storefront: storefront.to_string(),
                pre_kind: "playlists".to_string(),
                pre_id: playlist_id.to_string(),
                task_num: index as u32 + 1,
                task_total: total,
                master_url: String::new(),
                artist_folder: artist_component.clone(),
                container_folder: playlist_folder.clone(),
                cover_path: cover_path.clone(),
                playlist: Some(playlist.clone()),
                album: None,
                is_user_playlist,
                data: track,
            };

            self.announce_stream(&mut job).await;
            self.rip_track(&mut job).await;
        }
        Ok(())
    }

    /// Resolve the track's master URL and emit the `trackstream` record.
    async fn announce_stream(&self, job: &mut TrackJob) {
        let Some(master_url) = self.song_master_url(&job.storefront, &job.data.id).await else {
            return;
        };
        job.master_url = master_url;

        if let Ok((master, base)) = self.fetch_master(&job.master_url).await
            && let Ok(selection) = hls::select_audio(&master, &base, &self.policy)
            && !selection.audio_group.is_empty()
        {
            self.emit(ProgressRecord::TrackStream {
                tracknum: job.task_num,
                totaltracks: job.task_total,
                name: job.data.attributes.name.clone(),
                streamgroup: selection.audio_group,
            });
        }
    }

    /// `{Quality}` for album folder templating: Atmos and plain AAC have
    /// fixed answers; otherwise the first track's manifest decides. A first
    /// track without enhanced HLS downgrades the album to AAC 256.
    async fn album_quality(&self, storefront: &str, tracks: &[TrackData]) -> String {
        match self.preferred() {
            CodecLabel::Atmos => format!("{}Kbps", self.config.atmos_max.saturating_sub(2000)),
            CodecLabel::Aac if self.config.aac_type == "aac-lc" => "256Kbps".to_string(),
            _ => {
                let Some(first) = tracks.first() else {
                    return String::new();
                };
                match self.song_master_url(storefront, &first.id).await {
                    None => "256Kbps".to_string(),
                    Some(master_url) => {
                        let Ok(base) = Url::parse(&master_url) else {
                            return String::new();
                        };
                        match hls::fetch_playlist_text(&self.http, &base).await {
                            Ok(text) => hls::selection_quality(&text, &base, &self.policy)
                                .map(|(_, quality)| quality)
                                .unwrap_or_default(),
                            Err(e) => {
                                warn!(error = %e, "failed to resolve album quality");
                                String::new()
                            }
                        }
                    }
                }
            }
        }
    }

    fn skip_track(&mut self, name: &str) {
        self.emit(ProgressRecord::TrackSkip {
            name: name.to_string(),
            reason: format!("Not available in {}", self.preferred()),
        });
        self.counters.unavailable += 1;
    }

    /// Download, decrypt and tag one track. Failures are counted, never
    /// propagated: the next track always gets its chance.
    pub async fn rip_track(&mut self, job: &mut TrackJob) {
        self.counters.total += 1;

        if job.pre_kind == "playlists" && self.config.use_songinfo_for_playlist {
            if let Err(e) = self.fill_album_data(job).await {
                warn!(error = %e, "failed to get original album data");
            }
        }

        if job.data.kind == "music-videos" {
            self.rip_embedded_music_video(job).await;
            return;
        }

        let name = job.data.attributes.name.clone();
        if job.master_url.is_empty() {
            self.skip_track(&name);
            return;
        }
        let (master, base) = match self.fetch_master(&job.master_url).await {
            Ok(parsed) => parsed,
            Err(_) => {
                self.skip_track(&name);
                return;
            }
        };
        let selection = match hls::select_audio(&master, &base, &self.policy) {
            Ok(selection) => selection,
            Err(_) => {
                self.skip_track(&name);
                return;
            }
        };

        let runner = runner_for(&selection, &self.config.aac_type);
        let total_bytes = expected_bytes(
            &master,
            &selection,
            job.data.attributes.duration_in_millis,
        );

        self.emit(ProgressRecord::TrackStart {
            track_num: job.task_num,
            total_tracks: job.task_total,
            name: name.clone(),
            codec: selection.codec.as_str().to_string(),
            runner,
            total_bytes,
            is_user_playlist: (job.pre_kind == "playlists" && job.is_user_playlist)
                .then_some(true),
        });

        let save_dir = PathBuf::from(self.config.save_folder_for(selection.codec))
            .join(&job.artist_folder)
            .join(&job.container_folder);
        if let Err(e) = tokio::fs::create_dir_all(&save_dir).await {
            error!(error = %e, "failed to create save directory");
            self.counters.error += 1;
            return;
        }

        let quality = if self.config.song_file_format.contains("{Quality}") {
            hls::quality_for(&master, &selection).unwrap_or_default()
        } else {
            String::new()
        };
        let tag_token = self.tag_token(
            job.data.attributes.is_apple_digital_master,
            &job.data.attributes.content_rating,
        );
        let song_name = apply_template(
            &self.config.song_file_format,
            &[
                ("{SongId}", job.data.id.as_str()),
                ("{SongNumber}", format!("{:02}", job.task_num).as_str()),
                (
                    "{SongName}",
                    limit_string(&name, self.config.limit_max).as_str(),
                ),
                (
                    "{DiscNumber}",
                    job.data.attributes.disc_number.to_string().as_str(),
                ),
                (
                    "{TrackNumber}",
                    job.data.attributes.track_number.to_string().as_str(),
                ),
                ("{Quality}", quality.as_str()),
                ("{Tag}", tag_token.as_str()),
                ("{Codec}", selection.codec.as_str()),
            ],
        );
        let filename = format!("{}.m4a", sanitize(&song_name));
        let track_path = save_dir.join(&filename);

        match tokio::fs::try_exists(&track_path).await {
            Ok(true) => {
                info!(path = %track_path.display(), "track already exists locally");
                self.counters.success += 1;
                self.counters
                    .ok_tracks
                    .entry(job.pre_id.clone())
                    .or_default()
                    .push(job.task_num);
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to check for existing track"),
        }

        let download = match runner {
            Runner::Cdm => {
                ripper::run_cdm_track(
                    &self.http,
                    &job.data.id,
                    self.amp.token(),
                    &self.config.media_user_token,
                    &self.key_source,
                    &self.tools,
                    &track_path,
                )
                .await
            }
            Runner::DecryptSocket => {
                ripper::run_socket_track(
                    &self.http,
                    &job.data.id,
                    &selection.url,
                    &track_path,
                    &SocketRunnerConfig {
                        key_helper_addr: self.config.decrypt_m3u8_port.clone(),
                        max_memory_mib: self.config.max_memory_limit,
                    },
                )
                .await
            }
        };
        if let Err(e) = download {
            error!(track = %name, error = %e, "track download failed");
            self.counters.error += 1;
            return;
        }

        // Per-track cover for playlist rips when configured; otherwise the
        // container cover.
        let mut temp_cover: Option<PathBuf> = None;
        let cover = if self.config.embed_cover {
            if (job.pre_id.contains("pl.") || job.pre_id.contains("ra."))
                && self.config.dl_albumcover_for_playlist
            {
                match write_cover(
                    &self.http,
                    &save_dir,
                    &job.data.id,
                    &job.data.attributes.artwork.url,
                    &self.config.cover_size,
                    &self.config.cover_format,
                )
                .await
                {
                    Ok(path) => {
                        temp_cover = Some(path.clone());
                        Some(path)
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to write track cover");
                        job.cover_path.clone()
                    }
                }
            } else {
                job.cover_path.clone()
            }
        } else {
            None
        };

        let mut tags = build_tags(
            &self.config,
            &TagContext {
                track: &job.data,
                container_kind: &job.pre_kind,
                container_id: &job.pre_id,
                album: job.album.as_ref(),
                playlist: job.playlist.as_ref(),
                task_num: job.task_num,
                task_total: job.task_total,
            },
        );
        tags.cover = cover.map(|p| p.to_string_lossy().into_owned());

        if let Err(e) = self.tools.stamp_tags(&track_path, &tags.to_itags()).await {
            error!(track = %name, error = %e, "failed to write tags");
            self.counters.error += 1;
            return;
        }
        if let Some(temp_cover) = temp_cover
            && let Err(e) = tokio::fs::remove_file(&temp_cover).await
        {
            warn!(path = %temp_cover.display(), error = %e, "failed to remove track cover");
        }

        self.emit(ProgressRecord::TrackComplete {
            track_num: job.task_num,
            total_tracks: job.task_total,
            name,
        });
        self.counters.success += 1;
        self.counters
            .ok_tracks
            .entry(job.pre_id.clone())
            .or_default()
            .push(job.task_num);
    }

    /// Fetch the parent album of a playlist track for album-accurate tags.
    async fn fill_album_data(&self, job: &mut TrackJob) -> Result<(), AppError> {
        if job.album.is_some() {
            return Ok(());
        }
        let album_id = job
            .data
            .relationships
            .albums
            .data
            .first()
            .map(|album| album.id.clone())
            .ok_or(catalog::CatalogError::Empty { what: "album ref" })?;
        let response = self.amp.album(&job.storefront, &album_id).await?;
        job.album = response.data.into_iter().next();
        Ok(())
    }

    /// A music video inside an album or playlist track list.
    async fn rip_embedded_music_video(&mut self, job: &mut TrackJob) {
        if self.config.media_user_token.len() <= 50 {
            warn!("media-user-token is not set, skipping music video");
            self.counters.success += 1;
            return;
        }
        if !ripper::tools::tool_on_path(&self.tools.mp4decrypt) {
            warn!(tool = %self.tools.mp4decrypt, "block-mode decryptor not found, skipping music video");
            self.counters.success += 1;
            return;
        }

        let artist_folder = if job.artist_folder.is_empty() {
            sanitize(&job.data.attributes.artist_name)
        } else {
            job.artist_folder.clone()
        };
        let mv_id = job.data.id.clone();
        let storefront = job.storefront.clone();
        let result = crate::music_video::download_music_video(
            self,
            &storefront,
            &mv_id,
            job.task_num,
            job.task_total,
            &artist_folder,
        )
        .await;
        match result {
            Ok(()) => self.counters.success += 1,
            Err(e) => {
                error!(error = %e, "failed to download music video");
                self.counters.error += 1;
            }
        }
    }
}

/// Runner selection: the socket runner for everything the selector labels
/// ALAC or ATMOS (Atmos-flavored AAC lands there via its ATMOS label);
/// the content-key runner only for plain `aac-lc`/`aac`.
pub fn runner_for(selection: &StreamSelection, aac_type: &str) -> Runner {
    if selection.codec == CodecLabel::Aac
        && (aac_type.eq_ignore_ascii_case("aac-lc") || aac_type.eq_ignore_ascii_case("aac"))
    {
        Runner::Cdm
    } else {
        Runner::DecryptSocket
    }
}

/// Expected size from variant bandwidth × duration.
pub fn expected_bytes(
    master: &MasterPlaylist,
    selection: &StreamSelection,
    duration_ms: u64,
) -> i64 {
    match hls::bandwidth_for_group(master, &selection.audio_group) {
        Some(bandwidth) if duration_ms > 0 => {
            let seconds = duration_ms as f64 / 1000.0;
            ((bandwidth as f64 / 8.0) * seconds) as i64
        }
        _ => 0,
    }
}
