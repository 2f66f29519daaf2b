//! Artist discography resolution.
//!
//! Enumerates an artist's album and music-video ids in parallel, then
//! fetches both detail sets in parallel. Enumeration failures degrade to a
//! warning; detail failures are fatal. Music videos are adapted into the
//! album item shape before marshaling.

use catalog::{AmpClient, ArtistMediaAttributes, ArtistMediaItem, MusicVideoItem};
use tracing::warn;

use crate::error::AppError;

fn adapt_music_video(mv: MusicVideoItem) -> ArtistMediaItem {
    ArtistMediaItem {
        id: mv.id,
        kind: mv.kind,
        href: mv.href,
        attributes: ArtistMediaAttributes {
            artist_name: mv.attributes.artist_name,
            artwork: mv.attributes.artwork,
            name: mv.attributes.name,
            release_date: mv.attributes.release_date,
            url: mv.attributes.url,
            track_count: 1,
            is_single: true,
            is_compilation: false,
        },
    }
}

/// Combined album + music-video array for one artist URL.
pub async fn resolve_artist(amp: &AmpClient, artist_url: &str) -> Result<serde_json::Value, AppError> {
    let (storefront, artist_id) =
        catalog::parse_artist_url(artist_url).ok_or_else(|| AppError::InvalidUrl {
            input: artist_url.to_string(),
        })?;

    let (album_ids, mv_ids) = tokio::join!(
        amp.artist_relationship_ids(&storefront, &artist_id, "albums"),
        amp.artist_relationship_ids(&storefront, &artist_id, "music-videos"),
    );
    let album_ids = album_ids.unwrap_or_else(|e| {
        warn!(artist_id, error = %e, "could not enumerate albums");
        Vec::new()
    });
    let mv_ids = mv_ids.unwrap_or_else(|e| {
        warn!(artist_id, error = %e, "could not enumerate music videos");
        Vec::new()
    });

    let (albums, music_videos) = tokio::join!(
        amp.albums_batch(&storefront, &album_ids),
        amp.music_videos_batch(&storefront, &mv_ids),
    );
    let mut combined = albums?;
    combined.extend(music_videos?.into_iter().map(adapt_music_video));

    Ok(serde_json::to_value(combined).expect("artist media serializes"))
}

#[cfg(test)]
mod tests {
    use catalog::MusicVideoItem;

    use super::*;

    #[test]
    fn test_music_video_adapts_to_album_shape() {
        let mv: MusicVideoItem = serde_json::from_str(
            r#"{
                "id": "1549184387",
                "type": "music-videos",
                "href": "/v1/catalog/us/music-videos/1549184387",
                "attributes": {
                    "name": "Your Man",
                    "artistName": "Joji",
                    "releaseDate": "2020-12-10",
                    "url": "https://music.apple.com/us/music-video/your-man/1549184387",
                    "artwork": {"url": "https://art/{w}x{h}bb.jpg"}
                }
            }"#,
        )
        .unwrap();

        let adapted = adapt_music_video(mv);
        let json = serde_json::to_value(&adapted).unwrap();
        assert_eq!(json["type"], "music-videos");
        assert_eq!(json["attributes"]["trackCount"], 1);
        assert_eq!(json["attributes"]["isSingle"], true);
        assert_eq!(json["attributes"]["artistName"], "Joji");
    }
}
