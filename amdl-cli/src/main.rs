mod artist;
mod cli;
mod config;
mod covers;
mod error;
mod music_video;
mod paths;
mod rip;
mod tags;

use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use ripper::{CdmHelperCommand, ExternalTools, ProgressEmitter};
use tracing::{Level, error, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::Args;
use crate::config::Config;
use crate::error::AppError;
use crate::rip::{App, Counters};

fn init_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::from_default_env().add_directive(Level::INFO.into()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Logs go to stderr; stdout belongs to the progress protocol.
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn build_http_client() -> Result<Client, AppError> {
    Client::builder()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| AppError::Config {
            reason: format!("failed to build HTTP client: {e}"),
        })
}

async fn run(args: Args) -> Result<ExitCode, AppError> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_overrides(&args);

    let http = build_http_client()?;
    let token = catalog::developer_token(Some(&config.authorization_token))?;
    let amp = catalog::AmpClient::new(http.clone(), token, config.language.clone());

    let emitter = Arc::new(Mutex::new(ProgressEmitter::stdout()));
    let policy = config.selection_policy(&args.codec_preference);
    let mut app = App {
        http,
        amp,
        policy,
        tools: ExternalTools::default(),
        key_source: CdmHelperCommand {
            command: config.cdm_helper.clone(),
        },
        emitter,
        counters: Counters::default(),
        make_curator_folder: args.make_curator_folder,
        config,
    };

    if let Some(artist_url) = &args.resolve_artist {
        if !args.json_output {
            eprintln!("Error: --resolve-artist requires --json-output.");
            return Ok(ExitCode::from(1));
        }
        let document = match artist::resolve_artist(&app.amp, artist_url).await {
            Ok(document) => document,
            Err(e) => {
                error!(error = %e, "artist resolution failed");
                return Ok(ExitCode::from(1));
            }
        };
        app.emitter
            .lock()
            .expect("emitter lock")
            .emit_json_document(&document);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(mut url) = args.url.clone() else {
        return Ok(ExitCode::SUCCESS);
    };
    let mut dl_song = args.song;

    // Song URLs normalize into their album URL plus `?i=<song-id>`.
    if url.contains("/song/") {
        let Some((storefront, song_id)) = catalog::parse_song_url(&url) else {
            error!(url = %url, "invalid song URL");
            return Ok(ExitCode::SUCCESS);
        };
        match app.amp.song_album_url(&storefront, &song_id).await {
            Ok(album_url) => {
                url = album_url;
                dl_song = true;
            }
            Err(e) => {
                error!(error = %e, "failed to resolve song URL to album URL");
                return Ok(ExitCode::SUCCESS);
            }
        }
    }

    let url_track_id = url::Url::parse(&url)
        .ok()
        .and_then(|parsed| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "i")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|id| !id.is_empty());

    if url.contains("/music-video/") {
        let Some((storefront, mv_id)) = catalog::parse_music_video_url(&url) else {
            error!(url = %url, "invalid music video URL");
            return Ok(ExitCode::SUCCESS);
        };
        if args.json_output {
            match app.amp.music_video(&storefront, &mv_id).await {
                Ok(info) if !info.data.is_empty() => {
                    let mv = info.data.into_iter().next().expect("checked non-empty");
                    let mv_entry = serde_json::json!({
                        "id": mv.id,
                        "type": "music-videos",
                        "attributes": {
                            "name": mv.attributes.name,
                            "artistName": mv.attributes.artist_name,
                            "artwork": mv.attributes.artwork,
                            "url": mv.attributes.url,
                        },
                    });
                    let document = serde_json::json!({
                        "albumData": mv_entry.clone(),
                        "tracks": [{
                            "trackData": mv_entry,
                            "availableQualities": [],
                            "availableCodecs": [],
                        }],
                    });
                    app.emitter
                        .lock()
                        .expect("emitter lock")
                        .emit_json_document(&document);
                }
                Ok(_) => error!("empty music video response"),
                Err(e) => error!(error = %e, "failed to get music video info"),
            }
        } else if args.music_video {
            match app.amp.music_video(&storefront, &mv_id).await {
                Ok(info) => {
                    let artist_name = info
                        .data
                        .first()
                        .map(|mv| mv.attributes.artist_name.clone())
                        .unwrap_or_default();
                    let artist_folder = app.artist_folder_name(&artist_name, "");
                    if let Err(e) = music_video::download_music_video(
                        &mut app,
                        &storefront,
                        &mv_id,
                        1,
                        1,
                        &artist_folder,
                    )
                    .await
                    {
                        error!(error = %e, "failed to process music video");
                    }
                }
                Err(e) => error!(error = %e, "failed to get music video info"),
            }
        }
    } else if url.contains("/album/") {
        if let Some((storefront, album_id)) = catalog::parse_album_url(&url) {
            if let Err(e) = app
                .rip_album(
                    &storefront,
                    &album_id,
                    url_track_id.as_deref(),
                    dl_song,
                    args.json_output,
                )
                .await
            {
                error!(error = %e, "failed to process album");
            }
        }
    } else if url.contains("/playlist/") {
        if let Some((storefront, playlist_id)) =
            catalog::parse_playlist_url(&url, &app.config.storefront)
        {
            if let Err(e) = app
                .rip_playlist(&storefront, &playlist_id, args.json_output)
                .await
            {
                error!(error = %e, "failed to process playlist");
            }
        }
    } else {
        warn!(url = %url, "URL type not supported");
    }

    let counters = &app.counters;
    if counters.total > 0 {
        tracing::info!(
            total = counters.total,
            success = counters.success,
            errors = counters.error,
            unavailable = counters.unavailable,
            "run finished"
        );
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}
