//! Authenticated AMP API client.

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::error::CatalogError;
use crate::models::{
    AlbumResponse, ArtistMediaItem, BatchAlbums, BatchMusicVideos, MusicVideoItem,
    MusicVideoResponse, PagedIds, PlaylistResponse, SongResponse,
};

const API_BASE: &str = "https://amp-api.music.apple.com";
const ORIGIN: &str = "https://music.apple.com";
const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Page size for relationship listings and batch detail lookups.
const PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct AmpClient {
    http: Client,
    base: Url,
    token: String,
    language: String,
}

impl AmpClient {
    pub fn new(http: Client, token: String, language: String) -> Self {
        Self {
            http,
            base: Url::parse(API_BASE).expect("static URL parses"),
            token,
            language,
        }
    }

    /// Same client against a different API origin; used by tests.
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = base;
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, CatalogError> {
        let url = self
            .base
            .join(path_and_query)
            .map_err(|_| CatalogError::InvalidUrl {
                kind: "api",
                input: path_and_query.to_string(),
            })?;

        let response = self
            .http
            .get(url.clone())
            .bearer_auth(&self.token)
            .header(reqwest::header::ORIGIN, ORIGIN)
            .header(reqwest::header::USER_AGENT, DESKTOP_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                status,
                url: url.to_string(),
            });
        }
        debug!(url = %url, "catalog request ok");
        Ok(response.json::<T>().await?)
    }

    pub async fn song(&self, storefront: &str, id: &str) -> Result<SongResponse, CatalogError> {
        self.get_json(&format!(
            "/v1/catalog/{storefront}/songs/{id}?l={}",
            self.language
        ))
        .await
    }

    pub async fn album(&self, storefront: &str, id: &str) -> Result<AlbumResponse, CatalogError> {
        self.get_json(&format!(
            "/v1/catalog/{storefront}/albums/{id}?l={}",
            self.language
        ))
        .await
    }

    pub async fn playlist(
        &self,
        storefront: &str,
        id: &str,
    ) -> Result<PlaylistResponse, CatalogError> {
        self.get_json(&format!(
            "/v1/catalog/{storefront}/playlists/{id}?l={}",
            self.language
        ))
        .await
    }

    pub async fn music_video(
        &self,
        storefront: &str,
        id: &str,
    ) -> Result<MusicVideoResponse, CatalogError> {
        self.get_json(&format!(
            "/v1/catalog/{storefront}/music-videos/{id}?l={}",
            self.language
        ))
        .await
    }

    /// All ids of an artist relationship (`albums` or `music-videos`),
    /// paginated until the server stops returning a `next` cursor.
    pub async fn artist_relationship_ids(
        &self,
        storefront: &str,
        artist_id: &str,
        relationship: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let mut ids = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: PagedIds = self
                .get_json(&format!(
                    "/v1/catalog/{storefront}/artists/{artist_id}/{relationship}?limit={PAGE_LIMIT}&offset={offset}"
                ))
                .await?;
            ids.extend(page.data.into_iter().map(|item| item.id));
            if page.next.is_empty() {
                break;
            }
            offset += PAGE_LIMIT;
        }
        debug!(artist_id, relationship, count = ids.len(), "enumerated artist relationship");
        Ok(ids)
    }

    /// Batch album details, chunked to the API's 100-id limit.
    pub async fn albums_batch(
        &self,
        storefront: &str,
        ids: &[String],
    ) -> Result<Vec<ArtistMediaItem>, CatalogError> {
        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(PAGE_LIMIT) {
            let batch: BatchAlbums = self
                .get_json(&format!(
                    "/v1/catalog/{storefront}/albums?ids={}",
                    chunk.join(",")
                ))
                .await?;
            items.extend(batch.data);
        }
        Ok(items)
    }

    /// Batch music-video details, chunked to the API's 100-id limit.
    pub async fn music_videos_batch(
        &self,
        storefront: &str,
        ids: &[String],
    ) -> Result<Vec<MusicVideoItem>, CatalogError> {
        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(PAGE_LIMIT) {
            let batch: BatchMusicVideos = self
                .get_json(&format!(
                    "/v1/catalog/{storefront}/music-videos?ids={}",
                    chunk.join(",")
                ))
                .await?;
            items.extend(batch.data);
        }
        Ok(items)
    }

    /// Resolve a song URL to its album URL, keeping the song id as the
    /// `?i=` query parameter.
    pub async fn song_album_url(
        &self,
        storefront: &str,
        song_id: &str,
    ) -> Result<String, CatalogError> {
        let manifest = self.song(storefront, song_id).await?;
        let song = manifest
            .data
            .first()
            .ok_or(CatalogError::Empty { what: "song" })?;
        let album_id = song
            .relationships
            .albums
            .data
            .first()
            .map(|album| album.id.clone())
            .unwrap_or_default();
        if album_id.is_empty() {
            warn!(song_id, "song has no album relationship");
            return Err(CatalogError::Empty { what: "song album" });
        }
        Ok(format!(
            "https://music.apple.com/{storefront}/album/1/{album_id}?i={song_id}"
        ))
    }
}
