//! YAML configuration with CLI overrides.
//!
//! The config file lives next to the executable or in the working
//! directory (`config.yaml`); every field can be overridden by the
//! matching command-line flag.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::cli::Args;
use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub alac_save_folder: String,
    pub atmos_save_folder: String,
    pub aac_save_folder: String,
    pub mv_save_folder: String,

    pub album_folder_format: String,
    pub playlist_folder_format: String,
    pub song_file_format: String,
    pub artist_folder_format: String,

    pub aac_type: String,
    pub alac_max: u32,
    pub atmos_max: u32,
    pub mv_audio_type: String,
    pub mv_max: u32,

    pub embed_cover: bool,
    pub cover_size: String,
    pub cover_format: String,
    pub dl_albumcover_for_playlist: bool,
    pub save_artist_cover: bool,

    pub use_songinfo_for_playlist: bool,
    pub explicit_choice: String,
    pub clean_choice: String,
    pub apple_master_choice: String,

    pub media_user_token: String,
    pub authorization_token: String,
    pub storefront: String,
    pub language: String,

    pub limit_max: usize,
    pub max_memory_limit: u64,
    pub decrypt_m3u8_port: String,
    pub cdm_helper: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alac_save_folder: "AM-DL downloads".to_string(),
            atmos_save_folder: "AM-DL-Atmos downloads".to_string(),
            aac_save_folder: "AM-DL-AAC downloads".to_string(),
            mv_save_folder: String::new(),

            album_folder_format: "{AlbumName}".to_string(),
            playlist_folder_format: "{PlaylistName}".to_string(),
            song_file_format: "{SongNumber}. {SongName}".to_string(),
            artist_folder_format: "{ArtistName}".to_string(),

            aac_type: "aac-lc".to_string(),
            alac_max: 192_000,
            atmos_max: 2768,
            mv_audio_type: "atmos".to_string(),
            mv_max: 2160,

            embed_cover: true,
            cover_size: "5000x5000".to_string(),
            cover_format: "jpg".to_string(),
            dl_albumcover_for_playlist: false,
            save_artist_cover: false,

            use_songinfo_for_playlist: false,
            explicit_choice: "[E]".to_string(),
            clean_choice: "[C]".to_string(),
            apple_master_choice: "[M]".to_string(),

            media_user_token: String::new(),
            authorization_token: String::new(),
            storefront: "us".to_string(),
            language: "en-US".to_string(),

            limit_max: 120,
            max_memory_limit: 400,
            decrypt_m3u8_port: "127.0.0.1:10020".to_string(),
            cdm_helper: "amdl-cdm-helper".to_string(),
        }
    }
}

impl Config {
    /// Load `config.yaml` from the explicit path, the executable's
    /// directory, or the working directory; absent files fall back to
    /// defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        let mut candidates: Vec<std::path::PathBuf> = Vec::new();
        if let Some(path) = explicit {
            candidates.push(path.to_path_buf());
        } else {
            if let Ok(exe) = std::env::current_exe()
                && let Some(dir) = exe.parent()
            {
                candidates.push(dir.join("config.yaml"));
            }
            candidates.push("config.yaml".into());
        }

        for candidate in &candidates {
            match std::fs::read_to_string(candidate) {
                Ok(text) => {
                    debug!(path = %candidate.display(), "loaded configuration");
                    let mut config: Config =
                        serde_yaml::from_str(&text).map_err(|e| AppError::Config {
                            reason: format!("{}: {e}", candidate.display()),
                        })?;
                    config.normalize();
                    return Ok(config);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(AppError::Config {
                        reason: format!("{}: {e}", candidate.display()),
                    });
                }
            }
        }

        if explicit.is_some() {
            return Err(AppError::Config {
                reason: "configuration file not found".to_string(),
            });
        }
        let mut config = Config::default();
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        if self.storefront.len() != 2 {
            self.storefront = "us".to_string();
        }
        if self.mv_save_folder.trim().is_empty() {
            self.mv_save_folder = Path::new(&self.alac_save_folder)
                .join("Music Videos")
                .to_string_lossy()
                .into_owned();
        }
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply_overrides(&mut self, args: &Args) {
        macro_rules! take {
            ($field:ident) => {
                if let Some(value) = &args.$field {
                    self.$field = value.clone();
                }
            };
        }
        take!(alac_save_folder);
        take!(atmos_save_folder);
        take!(aac_save_folder);
        take!(mv_save_folder);
        take!(album_folder_format);
        take!(playlist_folder_format);
        take!(song_file_format);
        take!(artist_folder_format);
        take!(aac_type);
        take!(mv_audio_type);
        take!(explicit_choice);
        take!(clean_choice);
        take!(apple_master_choice);
        take!(media_user_token);
        take!(authorization_token);
        take!(storefront);
        take!(language);
        take!(decrypt_m3u8_port);
        take!(cdm_helper);
        take!(cover_size);
        take!(cover_format);

        if let Some(value) = args.alac_max {
            self.alac_max = value;
        }
        if let Some(value) = args.atmos_max {
            self.atmos_max = value;
        }
        if let Some(value) = args.mv_max {
            self.mv_max = value;
        }
        if let Some(value) = args.limit_max {
            self.limit_max = value;
        }
        if let Some(value) = args.max_memory_limit {
            self.max_memory_limit = value;
        }
        if let Some(value) = args.embed_cover {
            self.embed_cover = value;
        }
        if let Some(value) = args.dl_albumcover_for_playlist {
            self.dl_albumcover_for_playlist = value;
        }
        if let Some(value) = args.use_songinfo_for_playlist {
            self.use_songinfo_for_playlist = value;
        }
        if let Some(value) = args.save_artist_cover {
            self.save_artist_cover = value;
        }

        self.normalize();
    }

    /// Selection policy for the preferred codec.
    pub fn selection_policy(&self, codec_preference: &str) -> hls::SelectionPolicy {
        hls::SelectionPolicy {
            codec: hls::CodecLabel::from_preference(codec_preference),
            aac_type: self.aac_type.clone(),
            alac_max_sample_rate: self.alac_max,
        }
    }

    pub fn save_folder_for(&self, codec: hls::CodecLabel) -> &str {
        match codec {
            hls::CodecLabel::Atmos => &self.atmos_save_folder,
            hls::CodecLabel::Aac => &self.aac_save_folder,
            hls::CodecLabel::Alac => &self.alac_save_folder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_normalize_mv_folder() {
        let config = Config::load(None).unwrap();
        assert!(config.mv_save_folder.ends_with("Music Videos"));
        assert_eq!(config.storefront, "us");
    }

    #[test]
    fn test_yaml_round_trip_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "alac-save-folder: /music/lossless\nstorefront: gbx\nalac-max: 48000\naac-type: aac-binaural\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.alac_save_folder, "/music/lossless");
        assert_eq!(config.alac_max, 48_000);
        assert_eq!(config.aac_type, "aac-binaural");
        // Three-letter storefront is invalid and resets to us.
        assert_eq!(config.storefront, "us");
        // Untouched fields keep defaults.
        assert_eq!(config.atmos_max, 2768);
    }

    #[test]
    fn test_missing_explicit_config_errors() {
        assert!(matches!(
            Config::load(Some(Path::new("/definitely/missing/config.yaml"))),
            Err(AppError::Config { .. })
        ));
    }
}
