//! Audio variant selection per codec policy.

use m3u8_rs::{MasterPlaylist, Playlist, VariantStream, parse_playlist_res};
use url::Url;

use crate::error::SelectError;

/// Codec family of a selected variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecLabel {
    Atmos,
    Alac,
    Aac,
}

impl CodecLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Atmos => "ATMOS",
            Self::Alac => "ALAC",
            Self::Aac => "AAC",
        }
    }

    /// Map a user-facing codec preference to its family; unknown or empty
    /// preferences fall back to ALAC.
    pub fn from_preference(pref: &str) -> Self {
        match pref.to_ascii_uppercase().as_str() {
            "ATMOS" => Self::Atmos,
            "AAC" | "AAC-LC" | "AAC_STEREO" | "AAC-STEREO" | "AAC-BINAURAL" | "AAC_DOWNMIX"
            | "AAC-DOWNMIX" => Self::Aac,
            _ => Self::Alac,
        }
    }
}

impl std::fmt::Display for CodecLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AAC variant sub-policy, parsed from the configured `aac-type` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacSubtype {
    Lc,
    Binaural,
    Downmix,
}

impl AacSubtype {
    pub fn parse(aac_type: &str) -> Result<Self, SelectError> {
        match aac_type.to_ascii_lowercase().as_str() {
            "aac-lc" | "aac" => Ok(Self::Lc),
            "aac-binaural" => Ok(Self::Binaural),
            "aac-downmix" => Ok(Self::Downmix),
            other => Err(SelectError::UnsupportedAacType(other.to_string())),
        }
    }

    fn matches_group(&self, group: &str) -> bool {
        let g = group.to_ascii_lowercase();
        match self {
            Self::Lc => !g.contains("binaural") && !g.contains("downmix"),
            Self::Binaural => g.contains("binaural"),
            Self::Downmix => g.contains("downmix"),
        }
    }
}

/// Everything variant selection depends on.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    pub codec: CodecLabel,
    /// Configured `aac-type` string (`aac-lc`, `aac`, `aac-binaural`,
    /// `aac-downmix`); kept raw because probing compares it verbatim.
    pub aac_type: String,
    /// Maximum ALAC sample rate in Hz.
    pub alac_max_sample_rate: u32,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            codec: CodecLabel::Alac,
            aac_type: "aac-lc".to_string(),
            alac_max_sample_rate: 192_000,
        }
    }
}

/// A chosen variant: resolved media-playlist URL, codec family, audio group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSelection {
    pub url: Url,
    pub codec: CodecLabel,
    pub audio_group: String,
}

/// Parse master-playlist text, rejecting media playlists.
pub fn parse_master(text: &str) -> Result<MasterPlaylist, SelectError> {
    match parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) => Ok(master),
        Ok(Playlist::MediaPlaylist(_)) => Err(SelectError::NotMaster),
        Err(e) => Err(SelectError::Parse {
            reason: e.to_string(),
        }),
    }
}

/// Variants in descending `average-bandwidth` order (input order on ties,
/// so selection stays deterministic).
pub(crate) fn variants_by_bandwidth(master: &MasterPlaylist) -> Vec<&VariantStream> {
    let mut variants: Vec<&VariantStream> = master.variants.iter().collect();
    variants.sort_by_key(|v| std::cmp::Reverse(v.average_bandwidth.unwrap_or(0)));
    variants
}

fn audio_group(variant: &VariantStream) -> &str {
    variant.audio.as_deref().unwrap_or("")
}

fn codecs(variant: &VariantStream) -> &str {
    variant.codecs.as_deref().unwrap_or("")
}

/// Sample rate and bit depth from an ALAC audio-group tail
/// (`...-<sample-rate>-<bit-depth>`).
pub(crate) fn alac_group_params(group: &str) -> Option<(u32, &str)> {
    let parts: Vec<&str> = group.split('-').collect();
    if parts.len() < 3 {
        return None;
    }
    let sample_rate: u32 = parts[parts.len() - 2].parse().ok()?;
    Some((sample_rate, parts[parts.len() - 1]))
}

fn resolve(base: &Url, uri: &str) -> Result<Url, SelectError> {
    Ok(base.join(uri)?)
}

/// Pick the variant the policy asks for.
///
/// Variants are scanned in descending average-bandwidth order; the first
/// match wins. Returns `CodecUnavailable` when the family (or the AAC
/// subtype, or an ALAC rate within bounds) is absent.
pub fn select_audio(
    master: &MasterPlaylist,
    base: &Url,
    policy: &SelectionPolicy,
) -> Result<StreamSelection, SelectError> {
    let variants = variants_by_bandwidth(master);

    match policy.codec {
        CodecLabel::Atmos => {
            for v in &variants {
                if codecs(v) == "ec-3" && audio_group(v).contains("atmos") {
                    return Ok(StreamSelection {
                        url: resolve(base, &v.uri)?,
                        codec: CodecLabel::Atmos,
                        audio_group: audio_group(v).to_string(),
                    });
                }
            }
        }
        CodecLabel::Alac => {
            for v in &variants {
                if codecs(v) != "alac" {
                    continue;
                }
                let Some((sample_rate, _)) = alac_group_params(audio_group(v)) else {
                    continue;
                };
                if sample_rate <= policy.alac_max_sample_rate {
                    return Ok(StreamSelection {
                        url: resolve(base, &v.uri)?,
                        codec: CodecLabel::Alac,
                        audio_group: audio_group(v).to_string(),
                    });
                }
            }
        }
        CodecLabel::Aac => {
            let subtype = AacSubtype::parse(&policy.aac_type)?;
            for v in &variants {
                if codecs(v) == "mp4a.40.2" && subtype.matches_group(audio_group(v)) {
                    return Ok(StreamSelection {
                        url: resolve(base, &v.uri)?,
                        codec: CodecLabel::Aac,
                        audio_group: audio_group(v).to_string(),
                    });
                }
            }
        }
    }

    Err(SelectError::CodecUnavailable {
        codec: policy.codec.as_str().to_string(),
    })
}

/// `bandwidth` of the variant carrying the given audio group, for
/// size/ETA estimation.
pub fn bandwidth_for_group(master: &MasterPlaylist, group: &str) -> Option<u64> {
    master
        .variants
        .iter()
        .find(|v| audio_group(v) == group)
        .map(|v| v.bandwidth)
}

/// Folder-template quality string for an already-made selection.
///
/// ALAC quality reads `<bits>B-<kHz>kHz` from the audio group; everything
/// else reports `<kbps>Kbps` from the variant bandwidth.
pub fn quality_for(
    master: &MasterPlaylist,
    selection: &StreamSelection,
) -> Result<String, SelectError> {
    match selection.codec {
        CodecLabel::Alac => {
            let (sample_rate, bits) = alac_group_params(&selection.audio_group)
                .ok_or(SelectError::NoAudioRendition)?;
            Ok(format!("{bits}B-{:.1}kHz", f64::from(sample_rate) / 1000.0))
        }
        _ => {
            let bandwidth =
                bandwidth_for_group(master, &selection.audio_group).unwrap_or_default();
            Ok(format!("{}Kbps", bandwidth / 1000))
        }
    }
}

/// Variant URL plus the quality string for the policy.
///
/// A media playlist passes through with quality `"Unknown"`.
pub fn selection_quality(
    text: &str,
    base: &Url,
    policy: &SelectionPolicy,
) -> Result<(Url, String), SelectError> {
    let master = match parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) => master,
        Ok(Playlist::MediaPlaylist(_)) => return Ok((base.clone(), "Unknown".to_string())),
        Err(e) => {
            return Err(SelectError::Parse {
                reason: e.to_string(),
            });
        }
    };

    let selection = select_audio(&master, base, policy)?;
    let quality = quality_for(&master, &selection)?;
    Ok((selection.url, quality))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MASTER_AUDIO: &str = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-stereo-256\",NAME=\"stereo\",URI=\"aac/256/stream.m3u8\"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-alac-stereo-48000-24\",NAME=\"alac48\",URI=\"alac/48/stream.m3u8\"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-alac-stereo-96000-24\",NAME=\"alac96\",URI=\"alac/96/stream.m3u8\"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-atmos-2768\",NAME=\"atmos\",URI=\"atmos/2768/stream.m3u8\"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-atmos-binaural-768\",NAME=\"binaural\",URI=\"aac/binaural/stream.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=990000,AVERAGE-BANDWIDTH=900000,CODECS=\"mp4a.40.2\",AUDIO=\"audio-stereo-256\"
aac/256/stream.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,AVERAGE-BANDWIDTH=768000,CODECS=\"mp4a.40.2\",AUDIO=\"audio-atmos-binaural-768\"
aac/binaural/stream.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1200000,AVERAGE-BANDWIDTH=1100000,CODECS=\"alac\",AUDIO=\"audio-alac-stereo-48000-24\"
alac/48/stream.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,AVERAGE-BANDWIDTH=2300000,CODECS=\"alac\",AUDIO=\"audio-alac-stereo-96000-24\"
alac/96/stream.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2900000,AVERAGE-BANDWIDTH=2768000,CODECS=\"ec-3\",AUDIO=\"audio-atmos-2768\"
atmos/2768/stream.m3u8
";

    pub(crate) fn base_url() -> Url {
        Url::parse("https://streams.example.com/item/master.m3u8").unwrap()
    }

    fn policy(codec: CodecLabel) -> SelectionPolicy {
        SelectionPolicy {
            codec,
            ..SelectionPolicy::default()
        }
    }

    #[test]
    fn test_alac_picks_highest_bandwidth_within_limit() {
        let master = parse_master(MASTER_AUDIO).unwrap();
        let selection = select_audio(&master, &base_url(), &policy(CodecLabel::Alac)).unwrap();
        assert_eq!(selection.audio_group, "audio-alac-stereo-96000-24");
        assert_eq!(
            selection.url.as_str(),
            "https://streams.example.com/item/alac/96/stream.m3u8"
        );
    }

    #[test]
    fn test_alac_respects_max_sample_rate() {
        let master = parse_master(MASTER_AUDIO).unwrap();
        let constrained = SelectionPolicy {
            codec: CodecLabel::Alac,
            alac_max_sample_rate: 48_000,
            ..SelectionPolicy::default()
        };
        let selection = select_audio(&master, &base_url(), &constrained).unwrap();
        assert_eq!(selection.audio_group, "audio-alac-stereo-48000-24");
    }

    #[test]
    fn test_alac_unavailable_below_every_rate() {
        let only_96k = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio-alac-stereo-96000-24\",NAME=\"alac96\",URI=\"alac/96/stream.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=2500000,AVERAGE-BANDWIDTH=2300000,CODECS=\"alac\",AUDIO=\"audio-alac-stereo-96000-24\"
alac/96/stream.m3u8
";
        let master = parse_master(only_96k).unwrap();
        let constrained = SelectionPolicy {
            codec: CodecLabel::Alac,
            alac_max_sample_rate: 48_000,
            ..SelectionPolicy::default()
        };
        let err = select_audio(&master, &base_url(), &constrained).unwrap_err();
        assert!(matches!(err, SelectError::CodecUnavailable { .. }));
    }

    #[test]
    fn test_atmos_needs_atmos_group() {
        let master = parse_master(MASTER_AUDIO).unwrap();
        let selection = select_audio(&master, &base_url(), &policy(CodecLabel::Atmos)).unwrap();
        assert_eq!(selection.codec, CodecLabel::Atmos);
        assert_eq!(selection.audio_group, "audio-atmos-2768");
    }

    #[test]
    fn test_aac_binaural_beats_higher_bandwidth_stereo() {
        let master = parse_master(MASTER_AUDIO).unwrap();
        let binaural = SelectionPolicy {
            codec: CodecLabel::Aac,
            aac_type: "aac-binaural".to_string(),
            ..SelectionPolicy::default()
        };
        let selection = select_audio(&master, &base_url(), &binaural).unwrap();
        assert_eq!(selection.audio_group, "audio-atmos-binaural-768");
    }

    #[test]
    fn test_aac_lc_skips_binaural_and_downmix() {
        let master = parse_master(MASTER_AUDIO).unwrap();
        let selection = select_audio(&master, &base_url(), &policy(CodecLabel::Aac)).unwrap();
        assert_eq!(selection.audio_group, "audio-stereo-256");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let master = parse_master(MASTER_AUDIO).unwrap();
        let first = select_audio(&master, &base_url(), &policy(CodecLabel::Alac)).unwrap();
        for _ in 0..5 {
            let again = select_audio(&master, &base_url(), &policy(CodecLabel::Alac)).unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_bandwidth_for_group() {
        let master = parse_master(MASTER_AUDIO).unwrap();
        assert_eq!(
            bandwidth_for_group(&master, "audio-alac-stereo-96000-24"),
            Some(2_500_000)
        );
        assert_eq!(bandwidth_for_group(&master, "audio-none"), None);
    }

    #[test]
    fn test_quality_strings() {
        let (_, alac_quality) =
            selection_quality(MASTER_AUDIO, &base_url(), &policy(CodecLabel::Alac)).unwrap();
        assert_eq!(alac_quality, "24B-96.0kHz");

        let (_, atmos_quality) =
            selection_quality(MASTER_AUDIO, &base_url(), &policy(CodecLabel::Atmos)).unwrap();
        assert_eq!(atmos_quality, "2900Kbps");
    }

    #[test]
    fn test_media_playlist_passes_through_as_unknown() {
        let media = "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg0.mp4\n#EXT-X-ENDLIST\n";
        let (url, quality) =
            selection_quality(media, &base_url(), &SelectionPolicy::default()).unwrap();
        assert_eq!(url, base_url());
        assert_eq!(quality, "Unknown");
    }

    #[test]
    fn test_master_required_for_selection() {
        let media = "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg0.mp4\n#EXT-X-ENDLIST\n";
        assert!(matches!(parse_master(media), Err(SelectError::NotMaster)));
    }

    #[test]
    fn test_codec_preference_mapping() {
        assert_eq!(CodecLabel::from_preference("atmos"), CodecLabel::Atmos);
        assert_eq!(CodecLabel::from_preference("HIRES-LOSSLESS"), CodecLabel::Alac);
        assert_eq!(CodecLabel::from_preference("aac-binaural"), CodecLabel::Aac);
        assert_eq!(CodecLabel::from_preference(""), CodecLabel::Alac);
        assert_eq!(CodecLabel::from_preference("flac"), CodecLabel::Alac);
    }
}
