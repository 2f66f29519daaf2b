//! Metadata tag assembly for the external tag stamper.
//!
//! The full tag set is rendered into the remuxer's `name=value` pair
//! syntax (colon-separated) and stamped in one pass. Playlist tagging
//! branches on `use-songinfo-for-playlist`: with it, the track's parent
//! album supplies the album fields; without it, the playlist acts as the
//! album (disc 1/1, track = task ordinal of task total).

use catalog::{AlbumData, PlaylistData, TrackData};
use tracing::warn;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    Explicit,
    Clean,
    None,
}

impl Advisory {
    pub fn from_rating(rating: &str) -> Self {
        match rating {
            "explicit" => Self::Explicit,
            "clean" => Self::Clean,
            _ => Self::None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Clean => "clean",
            Self::None => "none",
        }
    }
}

/// The full tag set written to every output file.
#[derive(Debug, Clone, Default)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub composer: String,
    pub genre: String,
    pub disc_number: u32,
    pub disc_total: u32,
    pub track_number: u32,
    pub track_total: u32,
    pub isrc: String,
    pub upc: String,
    pub release_date: String,
    pub publisher: String,
    pub copyright: String,
    pub advisory: Option<Advisory>,
    pub album_id: Option<u64>,
    pub artist_id: Option<u64>,
    pub lyrics: Option<String>,
    pub cover: Option<String>,
}

/// Context for building a track's tags.
pub struct TagContext<'a> {
    pub track: &'a TrackData,
    pub container_kind: &'a str,
    pub container_id: &'a str,
    pub album: Option<&'a AlbumData>,
    pub playlist: Option<&'a PlaylistData>,
    pub task_num: u32,
    pub task_total: u32,
}

pub fn build_tags(config: &Config, ctx: &TagContext<'_>) -> TrackTags {
    let attrs = &ctx.track.attributes;
    let mut tags = TrackTags {
        title: attrs.name.clone(),
        artist: attrs.artist_name.clone(),
        album: attrs.album_name.clone(),
        composer: attrs.composer_name.clone(),
        genre: attrs.genre_names.first().cloned().unwrap_or_default(),
        disc_number: attrs.disc_number,
        track_number: attrs.track_number,
        isrc: attrs.isrc.clone(),
        release_date: attrs.release_date.clone(),
        advisory: Some(Advisory::from_rating(&attrs.content_rating)),
        ..TrackTags::default()
    };

    if ctx.container_kind == "albums" {
        tags.album_id = ctx.container_id.parse().ok();
    }
    tags.artist_id = ctx
        .track
        .relationships
        .artists
        .data
        .first()
        .and_then(|artist| artist.id.parse().ok());

    let is_playlist = ctx.container_kind == "playlists" || ctx.container_kind == "stations";
    if is_playlist && !config.use_songinfo_for_playlist {
        playlist_as_album(&mut tags, ctx);
    } else if is_playlist {
        if let Some(album) = ctx.album {
            album_fields(&mut tags, album);
        } else {
            warn!("album data unavailable, tagging with playlist metadata");
            playlist_as_album(&mut tags, ctx);
        }
    } else if let Some(album) = ctx.album {
        album_fields(&mut tags, album);
    }

    tags
}

fn playlist_as_album(tags: &mut TrackTags, ctx: &TagContext<'_>) {
    tags.disc_number = 1;
    tags.disc_total = 1;
    tags.track_number = ctx.task_num;
    tags.track_total = ctx.task_total;
    if let Some(playlist) = ctx.playlist {
        tags.album = playlist.attributes.name.clone();
        tags.album_artist = playlist.attributes.curator_name.clone();
    }
}

fn album_fields(tags: &mut TrackTags, album: &AlbumData) {
    let attrs = &album.attributes;
    tags.album = attrs.name.clone();
    tags.album_artist = attrs.artist_name.clone();
    tags.track_total = attrs.track_count;
    tags.upc = attrs.upc.clone();
    tags.publisher = attrs.record_label.clone();
    tags.release_date = attrs.release_date.clone();
    tags.copyright = attrs.copyright.clone();
}

impl TrackTags {
    /// Render into the stamper's colon-separated `name=value` pairs,
    /// starting with the tool marker.
    pub fn to_itags(&self) -> String {
        let mut pairs: Vec<String> = vec!["tool=".to_string()];
        let mut push = |name: &str, value: &str| {
            if !value.is_empty() {
                pairs.push(format!("{name}={value}"));
            }
        };

        push("title", &self.title);
        push("artist", &self.artist);
        push("album", &self.album);
        push("album_artist", &self.album_artist);
        push("composer", &self.composer);
        push("genre", &self.genre);
        if self.disc_number > 0 {
            let value = if self.disc_total > 0 {
                format!("{}/{}", self.disc_number, self.disc_total)
            } else {
                self.disc_number.to_string()
            };
            push("disk", &value);
        }
        if self.track_number > 0 {
            let value = if self.track_total > 0 {
                format!("{}/{}", self.track_number, self.track_total)
            } else {
                self.track_number.to_string()
            };
            push("tracknum", &value);
        }
        push("isrc", &self.isrc);
        push("upc", &self.upc);
        push("created", &self.release_date);
        push("publisher", &self.publisher);
        push("copyright", &self.copyright);
        if let Some(advisory) = &self.advisory {
            pairs.push(format!("advisory={}", advisory.as_str()));
        }
        if let Some(album_id) = self.album_id {
            pairs.push(format!("album_id={album_id}"));
        }
        if let Some(artist_id) = self.artist_id {
            pairs.push(format!("artist_id={artist_id}"));
        }
        if let Some(lyrics) = &self.lyrics
            && !lyrics.is_empty()
        {
            pairs.push(format!("lyrics={lyrics}"));
        }
        if let Some(cover) = &self.cover {
            pairs.push(format!("cover={cover}"));
        }

        pairs.join(":")
    }
}
