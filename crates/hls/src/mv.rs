//! Music-video variant selection.
//!
//! Music videos publish a video master (variants named `..._<w>x<h>_...`)
//! and alternative-audio renditions grouped as `audio-atmos`, `audio-ac3`
//! and `audio-stereo-256`, with a `_gr<n>_` generation token in the URI.

use std::sync::LazyLock;

use m3u8_rs::{AlternativeMediaType, MasterPlaylist};
use regex::Regex;
use url::Url;

use crate::error::SelectError;
use crate::select::variants_by_bandwidth;

static RESOLUTION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(\d+)x(\d+)").expect("static regex compiles"));

static GENERATION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_gr(\d+)_").expect("static regex compiles"));

/// Preferred MV audio flavor; decides the rendition-group priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MvAudioType {
    #[default]
    Atmos,
    Ac3,
    Aac,
}

impl MvAudioType {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ac3" => Self::Ac3,
            "aac" => Self::Aac,
            _ => Self::Atmos,
        }
    }

    fn group_priority(&self) -> &'static [&'static str] {
        match self {
            Self::Atmos => &["audio-atmos", "audio-ac3", "audio-stereo-256"],
            Self::Ac3 => &["audio-ac3", "audio-stereo-256"],
            Self::Aac => &["audio-stereo-256"],
        }
    }
}

/// Highest-bandwidth video variant whose `_<w>x<h>` URI token stays within
/// `max_height`.
pub fn select_mv_video(
    master: &MasterPlaylist,
    base: &Url,
    max_height: u32,
) -> Result<Url, SelectError> {
    for variant in variants_by_bandwidth(master) {
        let Some(caps) = RESOLUTION_TOKEN.captures(&variant.uri) else {
            continue;
        };
        let Ok(height) = caps[2].parse::<u32>() else {
            continue;
        };
        if height <= max_height {
            return Ok(base.join(&variant.uri)?);
        }
    }
    Err(SelectError::NoVideoStream)
}

/// Best audio rendition for the MV audio preference.
///
/// Eligible renditions are those whose group id appears in the preference's
/// priority list; the earliest-listed group wins, and within one group the
/// higher `_gr<n>_` generation wins.
pub fn select_mv_audio(
    master: &MasterPlaylist,
    base: &Url,
    audio_type: MvAudioType,
) -> Result<Url, SelectError> {
    let priority = audio_type.group_priority();

    let mut best: Option<(usize, u64, &str)> = None;
    for alternative in &master.alternatives {
        if alternative.media_type != AlternativeMediaType::Audio {
            continue;
        }
        let Some(uri) = alternative.uri.as_deref() else {
            continue;
        };
        let Some(rank) = priority.iter().position(|g| *g == alternative.group_id) else {
            continue;
        };
        let Some(caps) = GENERATION_TOKEN.captures(uri) else {
            continue;
        };
        let Ok(generation) = caps[1].parse::<u64>() else {
            continue;
        };

        let better = match &best {
            None => true,
            Some((best_rank, best_generation, _)) => {
                rank < *best_rank || (rank == *best_rank && generation > *best_generation)
            }
        };
        if better {
            best = Some((rank, generation, uri));
        }
    }

    let (_, _, uri) = best.ok_or(SelectError::NoAudioRendition)?;
    Ok(base.join(uri)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::parse_master;

    const MV_VIDEO_MASTER: &str = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-STREAM-INF:BANDWIDTH=14000000,AVERAGE-BANDWIDTH=13000000,CODECS=\"avc1.640028\",RESOLUTION=3840x2160
video/file_3840x2160_gr12_.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=8000000,AVERAGE-BANDWIDTH=7500000,CODECS=\"avc1.640028\",RESOLUTION=1920x1080
video/file_1920x1080_gr10_.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=4000000,AVERAGE-BANDWIDTH=3600000,CODECS=\"avc1.64001f\",RESOLUTION=1280x720
video/file_1280x720_gr8_.m3u8
";

    const MV_AUDIO_MASTER: &str = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-stereo-256\",NAME=\"stereo\",URI=\"audio/stereo_gr2_.m3u8\"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-stereo-256\",NAME=\"stereo-hi\",URI=\"audio/stereo_gr4_.m3u8\"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-ac3\",NAME=\"surround\",URI=\"audio/ac3_gr6_.m3u8\"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-atmos\",NAME=\"atmos\",URI=\"audio/atmos_gr3_.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=8000000,AVERAGE-BANDWIDTH=7500000,CODECS=\"avc1.640028\",AUDIO=\"audio-atmos\"
video/file_1920x1080_gr10_.m3u8
";

    fn base() -> Url {
        Url::parse("https://mvod.example.com/item/master.m3u8").unwrap()
    }

    #[test]
    fn test_mv_video_respects_height_cap() {
        let master = parse_master(MV_VIDEO_MASTER).unwrap();
        let url = select_mv_video(&master, &base(), 1080).unwrap();
        assert!(url.as_str().ends_with("file_1920x1080_gr10_.m3u8"));
    }

    #[test]
    fn test_mv_video_unlimited_takes_top_bandwidth() {
        let master = parse_master(MV_VIDEO_MASTER).unwrap();
        let url = select_mv_video(&master, &base(), 2160).unwrap();
        assert!(url.as_str().ends_with("file_3840x2160_gr12_.m3u8"));
    }

    #[test]
    fn test_mv_video_none_within_cap() {
        let master = parse_master(MV_VIDEO_MASTER).unwrap();
        assert!(matches!(
            select_mv_video(&master, &base(), 480),
            Err(SelectError::NoVideoStream)
        ));
    }

    #[test]
    fn test_mv_audio_prefers_atmos_group_over_higher_generation() {
        let master = parse_master(MV_AUDIO_MASTER).unwrap();
        let url = select_mv_audio(&master, &base(), MvAudioType::Atmos).unwrap();
        assert!(url.as_str().ends_with("atmos_gr3_.m3u8"));
    }

    #[test]
    fn test_mv_audio_ac3_preference_skips_atmos() {
        let master = parse_master(MV_AUDIO_MASTER).unwrap();
        let url = select_mv_audio(&master, &base(), MvAudioType::Ac3).unwrap();
        assert!(url.as_str().ends_with("ac3_gr6_.m3u8"));
    }

    #[test]
    fn test_mv_audio_generation_breaks_ties_within_group() {
        let master = parse_master(MV_AUDIO_MASTER).unwrap();
        let url = select_mv_audio(&master, &base(), MvAudioType::Aac).unwrap();
        assert!(url.as_str().ends_with("stereo_gr4_.m3u8"));
    }
}
