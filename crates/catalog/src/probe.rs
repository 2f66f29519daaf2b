//! Parallel availability probing.
//!
//! A pool of workers fetches each track's song manifest and master playlist
//! to enumerate available codecs without downloading media. A failed probe
//! yields an empty-qualities entry; it never aborts its peers. Results are
//! gathered back into the original track order.

use futures_util::{StreamExt, stream};
use hls::{ProbeOutcome, QualityInfo, SelectionPolicy, parse_master};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::client::AmpClient;
use crate::models::TrackData;

/// Concurrent probe workers.
const PROBE_WORKERS: usize = 20;

/// Probe result for one track, in bulk-JSON shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackProbe {
    #[serde(skip)]
    pub index: usize,
    pub track_data: TrackData,
    pub available_qualities: Vec<QualityInfo>,
    pub available_codecs: Vec<String>,
}

async fn probe_one(
    client: &AmpClient,
    http: &Client,
    storefront: &str,
    policy: &SelectionPolicy,
    index: usize,
    track: TrackData,
) -> TrackProbe {
    let outcome = probe_track_qualities(client, http, storefront, policy, &track).await;
    TrackProbe {
        index,
        track_data: track,
        available_qualities: outcome.qualities,
        available_codecs: outcome.codecs,
    }
}

async fn probe_track_qualities(
    client: &AmpClient,
    http: &Client,
    storefront: &str,
    policy: &SelectionPolicy,
    track: &TrackData,
) -> ProbeOutcome {
    let manifest = match client.song(storefront, &track.id).await {
        Ok(manifest) => manifest,
        Err(e) => {
            debug!(track_id = %track.id, error = %e, "song probe failed");
            return ProbeOutcome::default();
        }
    };
    // A song without enhanced-hls exposes no codecs at all.
    let master_url = match manifest.data.first() {
        Some(song) if !song.attributes.extended_asset_urls.enhanced_hls.is_empty() => {
            song.attributes.extended_asset_urls.enhanced_hls.clone()
        }
        _ => return ProbeOutcome::default(),
    };
    let Ok(base) = Url::parse(&master_url) else {
        return ProbeOutcome::default();
    };

    let body = match http.get(base.clone()).send().await {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(track_id = %track.id, error = %e, "playlist body read failed");
                return ProbeOutcome::default();
            }
        },
        Ok(response) => {
            debug!(track_id = %track.id, status = %response.status(), "playlist fetch failed");
            return ProbeOutcome::default();
        }
        Err(e) => {
            debug!(track_id = %track.id, error = %e, "playlist fetch failed");
            return ProbeOutcome::default();
        }
    };

    match parse_master(&body) {
        Ok(master) => hls::probe_qualities(&master, &base, policy),
        Err(_) => ProbeOutcome::default(),
    }
}

/// Probe every track with bounded parallelism.
///
/// `on_progress` fires once per completed probe with `(done, total)` —
/// completion order, not track order. The returned vector is sorted by the
/// original track index.
pub async fn probe_tracks(
    client: &AmpClient,
    http: &Client,
    storefront: &str,
    policy: &SelectionPolicy,
    tracks: Vec<TrackData>,
    mut on_progress: impl FnMut(usize, usize),
) -> Vec<TrackProbe> {
    let total = tracks.len();
    let mut probes = stream::iter(tracks.into_iter().enumerate().map(|(index, track)| {
        probe_one(client, http, storefront, policy, index, track)
    }))
    .buffer_unordered(PROBE_WORKERS);

    let mut results = Vec::with_capacity(total);
    while let Some(probe) = probes.next().await {
        results.push(probe);
        on_progress(results.len(), total);
    }
    results.sort_by_key(|probe| probe.index);
    results
}

/// True when at least one probed track exposes the preferred codec.
pub fn any_track_matches(probes: &[TrackProbe], preferred: &str) -> bool {
    probes
        .iter()
        .any(|probe| probe.available_codecs.iter().any(|codec| codec == preferred))
}
