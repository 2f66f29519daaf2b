//! Music-video download pipeline.
//!
//! Two parallel segmented downloads (video + audio) feed the external
//! block-mode decryptor, followed by an external remux into the final
//! file. A 500 ms aggregator blends both byte counters into the progress
//! records; remuxing owns the 90–99% band.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ripper::mv::{StreamCounters, progress_aggregator, run_mv_stream};
use ripper::{ContentKeySource, ProgressEmitter, ProgressRecord, Runner, webplayback};
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use crate::covers::write_cover;
use crate::error::AppError;
use crate::paths::sanitize;
use crate::rip::App;

struct MvStream {
    key: String,
    urls: Vec<Url>,
}

/// Resolve one MV stream: variant selection, asset extraction, content key.
async fn resolve_stream(
    app: &App,
    adam_id: &str,
    playlist_url: &Url,
    video: bool,
) -> Result<MvStream, AppError> {
    let master = hls::fetch_master(&app.http, playlist_url).await?;
    let stream_url = if video {
        hls::select_mv_video(&master, playlist_url, app.config.mv_max)?
    } else {
        hls::select_mv_audio(
            &master,
            playlist_url,
            hls::MvAudioType::parse(&app.config.mv_audio_type),
        )?
    };

    let asset = webplayback::extract_asset(&app.http, stream_url.as_str(), true).await?;
    let key = app.key_source.content_key(adam_id, &asset.key_id).await?;

    // The init map downloads as segment zero.
    let mut urls = vec![asset.map_url];
    urls.extend(asset.segment_urls);
    Ok(MvStream {
        key: key.value,
        urls,
    })
}

fn emit_locked(emitter: &Arc<Mutex<ProgressEmitter>>, record: &ProgressRecord) {
    emitter.lock().expect("emitter lock").emit(record);
}

/// Download, decrypt and remux one music video.
pub async fn download_music_video(
    app: &mut App,
    storefront: &str,
    mv_id: &str,
    task_num: u32,
    task_total: u32,
    artist_folder: &str,
) -> Result<(), AppError> {
    let info = app.amp.music_video(storefront, mv_id).await?;
    let attrs = info
        .data
        .first()
        .map(|mv| mv.attributes.clone())
        .ok_or(catalog::CatalogError::Empty { what: "music video" })?;

    app.emit(ProgressRecord::TrackStart {
        track_num: task_num,
        total_tracks: task_total,
        name: attrs.name.clone(),
        codec: "H.264/AAC".to_string(),
        runner: Runner::Cdm,
        total_bytes: 0,
        is_user_playlist: None,
    });
    app.emit(ProgressRecord::TrackStreamMv {
        track_num: task_num,
        total_tracks: task_total,
        name: attrs.name.clone(),
        stream_group: "Music Video".to_string(),
    });

    let save_dir = PathBuf::from(&app.config.mv_save_folder).join(artist_folder);
    tokio::fs::create_dir_all(&save_dir).await?;

    let mv_name = sanitize(&format!(
        "{} - {}",
        sanitize(&attrs.artist_name),
        sanitize(&attrs.name)
    ));
    let out_path = save_dir.join(format!("{mv_name}.mp4"));
    if tokio::fs::try_exists(&out_path).await.unwrap_or(false) {
        info!(path = %out_path.display(), "music video already exists locally");
        return Ok(());
    }

    let playlist_url = webplayback::fetch_song(
        &app.http,
        mv_id,
        app.amp.token(),
        &app.config.media_user_token,
    )
    .await
    .map(|song| song.hls_playlist_url)
    .unwrap_or_default();
    if playlist_url.is_empty() {
        return Err(ripper::RipError::Credential {
            reason: "media-user-token may be wrong or expired".to_string(),
        }
        .into());
    }
    let playlist_url = Url::parse(&playlist_url).map_err(|_| AppError::InvalidUrl {
        input: playlist_url.clone(),
    })?;

    let video = resolve_stream(app, mv_id, &playlist_url, true).await?;
    let audio = resolve_stream(app, mv_id, &playlist_url, false).await?;

    let video_counters = StreamCounters::default();
    let audio_counters = StreamCounters::default();
    let (done_tx, done_rx) = watch::channel(false);

    let aggregator = {
        let emitter = Arc::clone(&app.emitter);
        let video_counters = video_counters.clone();
        let audio_counters = audio_counters.clone();
        let name = attrs.name.clone();
        let mut size_sent = false;
        tokio::spawn(progress_aggregator(
            video_counters.clone(),
            audio_counters.clone(),
            done_rx,
            move |percent| {
                let downloaded = video_counters.downloaded() + audio_counters.downloaded();
                let total = video_counters.total() + audio_counters.total();
                let mut emitter = emitter.lock().expect("emitter lock");
                if !size_sent && total > 0 {
                    emitter.emit_throttled(&ProgressRecord::Size { total_bytes: total });
                    size_sent = true;
                }
                if total > 0 {
                    emitter.emit_throttled(&ProgressRecord::Bytes {
                        downloaded_bytes: downloaded,
                        total_bytes: total,
                    });
                }
                emitter.emit_throttled(&ProgressRecord::TrackProgress {
                    track_num: task_num,
                    total_tracks: task_total,
                    name: name.clone(),
                    percent: (percent * 100.0) as u32,
                });
            },
        ))
    };

    let vid_path = save_dir.join(format!("{mv_id}_vid.mp4"));
    let aud_path = save_dir.join(format!("{mv_id}_aud.mp4"));
    // Both streams download in parallel; the aggregator blends their
    // counters into one percentage.
    let download = tokio::try_join!(
        run_mv_stream(
            &app.http,
            &video.key,
            &video.urls,
            &vid_path,
            &video_counters,
            &app.tools,
        ),
        run_mv_stream(
            &app.http,
            &audio.key,
            &audio.urls,
            &aud_path,
            &audio_counters,
            &app.tools,
        ),
    );

    let _ = done_tx.send(true);
    let _ = aggregator.await;
    download?;

    app.emit(ProgressRecord::TrackProgress {
        track_num: task_num,
        total_tracks: task_total,
        name: attrs.name.clone(),
        percent: 90,
    });

    // Thumbnail cover for the tag stamp, removed after remuxing.
    let thumbnail = match write_cover(
        &app.http,
        &save_dir,
        &format!("{mv_name}_thumbnail"),
        &attrs.artwork.url,
        &app.config.cover_size,
        &app.config.cover_format,
    )
    .await
    {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(error = %e, "failed to save music-video thumbnail");
            None
        }
    };

    let mut itags = "tool=".to_string();
    if let Some(thumbnail) = &thumbnail {
        itags.push_str(&format!(":cover={}", thumbnail.display()));
    }

    info!("remuxing music video");
    let remux = {
        let emitter = Arc::clone(&app.emitter);
        let name = attrs.name.clone();
        app.tools
            .remux_mv(&itags, &vid_path, &aud_path, &out_path, move |percent| {
                emit_locked(
                    &emitter,
                    &ProgressRecord::TrackProgress {
                        track_num: task_num,
                        total_tracks: task_total,
                        name: name.clone(),
                        percent,
                    },
                );
            })
            .await
    };

    for staging in [&vid_path, &aud_path] {
        if let Err(e) = tokio::fs::remove_file(staging).await {
            warn!(path = %staging.display(), error = %e, "failed to remove staging file");
        }
    }
    if let Some(thumbnail) = thumbnail
        && let Err(e) = tokio::fs::remove_file(&thumbnail).await
    {
        warn!(path = %thumbnail.display(), error = %e, "failed to remove thumbnail");
    }
    remux?;

    app.emit(ProgressRecord::TrackComplete {
        track_num: task_num,
        total_tracks: task_total,
        name: attrs.name,
    });
    Ok(())
}
