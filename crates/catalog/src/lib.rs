//! Apple AMP catalog API client.
//!
//! Metadata lookups for songs, albums, playlists, music videos and artist
//! discographies, plus the parallel availability probe used to answer "is
//! this album available in the selected quality?" without downloading.
//! Responses are partially modeled; unknown fields are tolerated.

mod client;
mod error;
mod models;
mod probe;
mod token;
mod urls;

pub use client::AmpClient;
pub use error::CatalogError;
pub use models::{
    AlbumData, AlbumResponse, ArtistMediaAttributes, ArtistMediaItem, Artwork, MusicVideoData,
    MusicVideoItem, MusicVideoResponse, PlaylistData, PlaylistResponse, ResourceRef, SongResponse,
    TrackData,
};
pub use probe::{TrackProbe, any_track_matches, probe_tracks};
pub use token::developer_token;
pub use urls::{
    parse_album_url, parse_artist_url, parse_music_video_url, parse_playlist_url, parse_song_url,
};
