//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

/// Apple Music track/album/playlist/music-video acquisition engine.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "amdl", version, about, long_about = None)]
pub struct Args {
    /// Apple Music URL (album, playlist, song, music video or artist).
    pub url: Option<String>,

    /// Preferred codec: ATMOS, ALAC, AAC, LOSSLESS, HIRES, HIRES-LOSSLESS,
    /// AAC-LC, AAC-STEREO, AAC-BINAURAL or AAC-DOWNMIX (case-insensitive).
    #[arg(long, default_value = "")]
    pub codec_preference: String,

    /// Treat an album URL with `?i=<track-id>` as a single-song download.
    #[arg(long)]
    pub song: bool,

    /// Download a music video instead of only probing it.
    #[arg(long)]
    pub music_video: bool,

    /// Emit probe/metadata JSON between the sentinel lines instead of
    /// downloading.
    #[arg(long)]
    pub json_output: bool,

    /// Resolve an artist's combined album and music-video list
    /// (requires --json-output).
    #[arg(long, value_name = "ARTIST_URL")]
    pub resolve_artist: Option<String>,

    /// Create an intermediate curator directory for playlists.
    #[arg(long)]
    pub make_curator_folder: bool,

    /// Configuration file path.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    // Configuration overrides; unset flags keep the config-file values.
    #[arg(long)]
    pub alac_save_folder: Option<String>,
    #[arg(long)]
    pub atmos_save_folder: Option<String>,
    #[arg(long)]
    pub aac_save_folder: Option<String>,
    #[arg(long)]
    pub mv_save_folder: Option<String>,
    #[arg(long)]
    pub album_folder_format: Option<String>,
    #[arg(long)]
    pub playlist_folder_format: Option<String>,
    #[arg(long)]
    pub song_file_format: Option<String>,
    #[arg(long)]
    pub artist_folder_format: Option<String>,
    #[arg(long)]
    pub aac_type: Option<String>,
    #[arg(long)]
    pub alac_max: Option<u32>,
    #[arg(long)]
    pub atmos_max: Option<u32>,
    #[arg(long)]
    pub mv_audio_type: Option<String>,
    #[arg(long)]
    pub mv_max: Option<u32>,
    #[arg(long)]
    pub embed_cover: Option<bool>,
    #[arg(long)]
    pub cover_size: Option<String>,
    #[arg(long)]
    pub cover_format: Option<String>,
    #[arg(long)]
    pub dl_albumcover_for_playlist: Option<bool>,
    #[arg(long)]
    pub save_artist_cover: Option<bool>,
    #[arg(long)]
    pub use_songinfo_for_playlist: Option<bool>,
    #[arg(long)]
    pub explicit_choice: Option<String>,
    #[arg(long)]
    pub clean_choice: Option<String>,
    #[arg(long)]
    pub apple_master_choice: Option<String>,
    #[arg(long)]
    pub media_user_token: Option<String>,
    #[arg(long)]
    pub authorization_token: Option<String>,
    #[arg(long)]
    pub storefront: Option<String>,
    #[arg(long)]
    pub language: Option<String>,
    #[arg(long)]
    pub limit_max: Option<usize>,
    #[arg(long)]
    pub max_memory_limit: Option<u64>,
    #[arg(long)]
    pub decrypt_m3u8_port: Option<String>,
    #[arg(long)]
    pub cdm_helper: Option<String>,

    /// Suppress all log output except warnings and errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose logging (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
