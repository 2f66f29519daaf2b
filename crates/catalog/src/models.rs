//! Partial models of the AMP catalog responses.
//!
//! One schema per endpoint, modeling only the fields the pipeline reads.
//! Everything is `#[serde(default)]`-tolerant: Apple adds fields freely and
//! omits them just as freely across storefronts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Artwork {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedAssetUrls {
    #[serde(default)]
    pub enhanced_hls: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionVideo {
    #[serde(default)]
    pub video: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorialVideo {
    #[serde(default)]
    pub motion_detail_square: MotionVideo,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResourceRef {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceRefs {
    #[serde(default)]
    pub data: Vec<ResourceRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtistRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attributes: ArtistRefAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtistRefAttributes {
    #[serde(default)]
    pub artwork: Artwork,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtistRefs {
    #[serde(default)]
    pub data: Vec<ArtistRef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackAttributes {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub album_name: String,
    #[serde(default)]
    pub composer_name: String,
    #[serde(default)]
    pub genre_names: Vec<String>,
    #[serde(default)]
    pub track_number: u32,
    #[serde(default)]
    pub disc_number: u32,
    #[serde(default)]
    pub duration_in_millis: u64,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub isrc: String,
    #[serde(default)]
    pub content_rating: String,
    #[serde(default)]
    pub is_apple_digital_master: bool,
    #[serde(default)]
    pub artwork: Artwork,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub extended_asset_urls: ExtendedAssetUrls,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackRelationships {
    #[serde(default)]
    pub albums: ResourceRefs,
    #[serde(default)]
    pub artists: ArtistRefs,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrackData {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: TrackAttributes,
    #[serde(default, skip_serializing)]
    pub relationships: TrackRelationships,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SongResponse {
    #[serde(default)]
    pub data: Vec<TrackData>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumAttributes {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub upc: String,
    #[serde(default)]
    pub record_label: String,
    #[serde(default)]
    pub copyright: String,
    #[serde(default)]
    pub track_count: u32,
    #[serde(default)]
    pub content_rating: String,
    #[serde(default)]
    pub is_apple_digital_master: bool,
    #[serde(default)]
    pub is_mastered_for_itunes: bool,
    #[serde(default)]
    pub is_single: bool,
    #[serde(default)]
    pub is_compilation: bool,
    #[serde(default)]
    pub artwork: Artwork,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub editorial_video: EditorialVideo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumRelationships {
    #[serde(default)]
    pub tracks: TracksRelationship,
    #[serde(default)]
    pub artists: ArtistRefs,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TracksRelationship {
    #[serde(default)]
    pub data: Vec<TrackData>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AlbumData {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: AlbumAttributes,
    #[serde(default, skip_serializing)]
    pub relationships: AlbumRelationships,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlbumResponse {
    #[serde(default)]
    pub data: Vec<AlbumData>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistAttributes {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub curator_name: String,
    #[serde(default)]
    pub artwork: Artwork,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlaylistData {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: PlaylistAttributes,
    #[serde(default, skip_serializing)]
    pub relationships: AlbumRelationships,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistResponse {
    #[serde(default)]
    pub data: Vec<PlaylistData>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicVideoAttributes {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub artwork: Artwork,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub duration_in_millis: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MusicVideoData {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: MusicVideoAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MusicVideoResponse {
    #[serde(default)]
    pub data: Vec<MusicVideoData>,
}

/// One page of an artist relationship listing (ids only).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PagedIds {
    #[serde(default)]
    pub data: Vec<ResourceRef>,
    #[serde(default)]
    pub next: String,
}

/// Album-shaped item of an artist discography; music videos are adapted
/// into this shape before marshaling.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistMediaAttributes {
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub artwork: Artwork,
    #[serde(default)]
    pub is_compilation: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub track_count: u32,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_single: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ArtistMediaItem {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub attributes: ArtistMediaAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MusicVideoItem {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub attributes: MusicVideoAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BatchAlbums {
    #[serde(default)]
    pub data: Vec<ArtistMediaItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BatchMusicVideos {
    #[serde(default)]
    pub data: Vec<MusicVideoItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_response_tolerates_unknown_fields() {
        let json = r#"{
            "data": [{
                "id": "1613600188",
                "type": "songs",
                "href": "/v1/catalog/us/songs/1613600188",
                "attributes": {
                    "name": "Glimpse of Us",
                    "artistName": "Joji",
                    "albumName": "SMITHEREENS",
                    "genreNames": ["Alternative", "Music"],
                    "trackNumber": 1,
                    "discNumber": 1,
                    "durationInMillis": 233456,
                    "releaseDate": "2022-06-10",
                    "isrc": "USRC12201254",
                    "isAppleDigitalMaster": true,
                    "contentRating": "explicit",
                    "audioTraits": ["atmos", "lossless"],
                    "extendedAssetUrls": {
                        "plus": "https://example/plus.m3u8",
                        "enhancedHls": "https://example/master.m3u8"
                    },
                    "artwork": {"url": "https://art/{w}x{h}bb.jpg", "width": 3000, "height": 3000}
                },
                "relationships": {
                    "albums": {"data": [{"id": "1613600184", "type": "albums"}]},
                    "artists": {"data": [{"id": "1258279972", "type": "artists"}]}
                }
            }]
        }"#;

        let parsed: SongResponse = serde_json::from_str(json).unwrap();
        let track = &parsed.data[0];
        assert_eq!(track.id, "1613600188");
        assert_eq!(track.kind, "songs");
        assert_eq!(track.attributes.artist_name, "Joji");
        assert_eq!(
            track.attributes.extended_asset_urls.enhanced_hls,
            "https://example/master.m3u8"
        );
        assert_eq!(track.relationships.albums.data[0].id, "1613600184");
        assert_eq!(track.attributes.content_rating, "explicit");
    }

    #[test]
    fn test_album_response_with_tracks() {
        let json = r#"{
            "data": [{
                "id": "1613600184",
                "type": "albums",
                "attributes": {
                    "name": "SMITHEREENS",
                    "artistName": "Joji",
                    "releaseDate": "2022-11-04",
                    "upc": "886449990061",
                    "recordLabel": "88rising",
                    "copyright": "2022 88rising",
                    "trackCount": 9,
                    "isMasteredForItunes": true,
                    "artwork": {"url": "https://art/{w}x{h}bb.jpg"}
                },
                "relationships": {
                    "tracks": {"data": [
                        {"id": "1", "type": "songs", "attributes": {"name": "t1"}},
                        {"id": "2", "type": "songs", "attributes": {"name": "t2"}}
                    ]},
                    "artists": {"data": [{"id": "1258279972"}]}
                }
            }]
        }"#;

        let parsed: AlbumResponse = serde_json::from_str(json).unwrap();
        let album = &parsed.data[0];
        assert_eq!(album.attributes.track_count, 9);
        assert!(album.attributes.is_mastered_for_itunes);
        assert_eq!(album.relationships.tracks.data.len(), 2);
        assert_eq!(album.relationships.artists.data[0].id, "1258279972");
    }

    #[test]
    fn test_missing_optional_blocks_default() {
        let json = r#"{"data": [{"id": "x", "type": "songs"}]}"#;
        let parsed: SongResponse = serde_json::from_str(json).unwrap();
        let track = &parsed.data[0];
        assert!(track.attributes.extended_asset_urls.enhanced_hls.is_empty());
        assert!(track.relationships.albums.data.is_empty());
        assert_eq!(track.attributes.duration_in_millis, 0);
    }

    #[test]
    fn test_artist_media_item_serializes_camel_case() {
        let item = ArtistMediaItem {
            id: "99".into(),
            kind: "albums".into(),
            href: "/v1/catalog/us/albums/99".into(),
            attributes: ArtistMediaAttributes {
                artist_name: "Tester".into(),
                name: "Album".into(),
                release_date: "2024-01-01".into(),
                track_count: 1,
                is_single: true,
                ..ArtistMediaAttributes::default()
            },
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "albums");
        assert_eq!(json["attributes"]["artistName"], "Tester");
        assert_eq!(json["attributes"]["isSingle"], true);
        assert_eq!(json["attributes"]["trackCount"], 1);
    }
}
