//! Per-codec quality enumeration for availability probing.

use std::sync::LazyLock;

use m3u8_rs::MasterPlaylist;
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::select::{CodecLabel, SelectionPolicy, alac_group_params, variants_by_bandwidth};

static STEREO_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"audio-stereo-\d+").expect("static regex compiles"));

/// One probed quality entry, serialized into the bulk-JSON probe result.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QualityInfo {
    pub codec: String,
    pub url: String,
    pub quality: String,
    pub group: String,
    pub selected: bool,
}

/// Qualities and codec names exposed by one master playlist.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    pub qualities: Vec<QualityInfo>,
    pub codecs: Vec<String>,
}

/// Best variant per codec family, in fixed ATMOS, ALAC, AAC order.
///
/// The entry matching the preferred codec is flagged `selected`; for AAC
/// only when the `audio-stereo-<n>`-normalized group equals the configured
/// `aac-type` verbatim.
pub fn probe_qualities(
    master: &MasterPlaylist,
    base: &Url,
    policy: &SelectionPolicy,
) -> ProbeOutcome {
    let mut best: [Option<QualityInfo>; 3] = [None, None, None];

    for variant in variants_by_bandwidth(master) {
        let group = variant.audio.as_deref().unwrap_or("");
        let codecs = variant.codecs.as_deref().unwrap_or("");

        let (slot, label, quality) = if codecs == "ec-3" && group.contains("atmos") {
            (0, CodecLabel::Atmos, format!("{}Kbps", variant.bandwidth / 1000))
        } else if codecs == "alac" {
            let Some((sample_rate, bits)) = alac_group_params(group) else {
                continue;
            };
            (
                1,
                CodecLabel::Alac,
                format!("{bits}-bit/{}kHz", sample_rate / 1000),
            )
        } else if codecs == "mp4a.40.2" {
            (2, CodecLabel::Aac, format!("{}Kbps", variant.bandwidth / 1000))
        } else {
            continue;
        };

        if best[slot].is_some() {
            continue;
        }
        let url = match base.join(&variant.uri) {
            Ok(url) => url.to_string(),
            Err(_) => continue,
        };
        best[slot] = Some(QualityInfo {
            codec: label.as_str().to_string(),
            url,
            quality,
            group: group.to_string(),
            selected: false,
        });
    }

    let mut outcome = ProbeOutcome::default();
    for entry in best.into_iter().flatten() {
        let mut entry = entry;
        if entry.codec == policy.codec.as_str() {
            entry.selected = if policy.codec == CodecLabel::Aac {
                let normalized = STEREO_GROUP.replace_all(&entry.group, "aac");
                normalized.eq_ignore_ascii_case(&policy.aac_type)
            } else {
                true
            };
        }
        outcome.codecs.push(entry.codec.clone());
        outcome.qualities.push(entry);
    }
    outcome
}
