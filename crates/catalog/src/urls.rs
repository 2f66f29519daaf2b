//! Apple Music URL recognizers.
//!
//! Each recognizer returns `(storefront, id)`. Playlists come in two shapes
//! (with and without a name slug); the slugless library form has no
//! storefront of its own and falls back to the supplied default.

use std::sync::LazyLock;

use regex::Regex;

static ALBUM_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https://(?:beta\.music|music|classical\.music)\.apple\.com/(\w{2})(?:/album|/album/.+))/(?:id)?(\d[^\D]+)(?:$|\?)",
    )
    .expect("static regex compiles")
});

static MUSIC_VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https://(?:beta\.music|music)\.apple\.com/(\w{2})(?:/music-video|/music-video/.+))/(?:id)?(\d[^\D]+)(?:$|\?)",
    )
    .expect("static regex compiles")
});

static SONG_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https://(?:beta\.music|music|classical\.music)\.apple\.com/(\w{2})(?:/song|/song/.+))/(?:id)?(\d[^\D]+)(?:$|\?)",
    )
    .expect("static regex compiles")
});

static ARTIST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https://(?:beta\.music|music|classical\.music)\.apple\.com/(\w{2})(?:/artist|/artist/.+))/(?:id)?(\d[^\D]+)(?:$|\?)",
    )
    .expect("static regex compiles")
});

static PLAYLIST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https://(?:beta\.music|music|classical\.music)\.apple\.com/(?:(\w{2})/playlist|library/playlist))/(?:id)?((?:p|pl)\.[\w-]+)(?:$|\?)",
    )
    .expect("static regex compiles")
});

static PLAYLIST_SLUG_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https://(?:beta\.music|music|classical\.music)\.apple\.com/(\w{2})/playlist/[^/]+/)(?:id)?(pl\.[\w.-]+)(?:$|\?)",
    )
    .expect("static regex compiles")
});

fn capture_pair(regex: &Regex, url: &str) -> Option<(String, String)> {
    let caps = regex.captures(url)?;
    Some((
        caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
        caps.get(2).map(|m| m.as_str().to_string())?,
    ))
}

pub fn parse_album_url(url: &str) -> Option<(String, String)> {
    capture_pair(&ALBUM_URL, url)
}

pub fn parse_music_video_url(url: &str) -> Option<(String, String)> {
    capture_pair(&MUSIC_VIDEO_URL, url)
}

pub fn parse_song_url(url: &str) -> Option<(String, String)> {
    capture_pair(&SONG_URL, url)
}

pub fn parse_artist_url(url: &str) -> Option<(String, String)> {
    capture_pair(&ARTIST_URL, url)
}

pub fn parse_playlist_url(url: &str, default_storefront: &str) -> Option<(String, String)> {
    if let Some((storefront, id)) = capture_pair(&PLAYLIST_URL, url) {
        let storefront = if storefront.is_empty() {
            default_storefront.to_string()
        } else {
            storefront
        };
        return Some((storefront, id));
    }
    capture_pair(&PLAYLIST_SLUG_URL, url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_album_urls() {
        assert_eq!(
            parse_album_url("https://music.apple.com/us/album/smithereens/1613600184"),
            Some(("us".into(), "1613600184".into()))
        );
        assert_eq!(
            parse_album_url("https://beta.music.apple.com/jp/album/1613600184?i=1613600188"),
            Some(("jp".into(), "1613600184".into()))
        );
        assert_eq!(
            parse_album_url("https://classical.music.apple.com/de/album/id1613600184"),
            Some(("de".into(), "1613600184".into()))
        );
        assert!(parse_album_url("https://music.apple.com/us/playlist/pl.abc").is_none());
    }

    #[test]
    fn test_song_url_and_mv_url() {
        assert_eq!(
            parse_song_url("https://music.apple.com/us/song/glimpse-of-us/1613600188"),
            Some(("us".into(), "1613600188".into()))
        );
        assert_eq!(
            parse_music_video_url("https://music.apple.com/us/music-video/some-video/1549184387"),
            Some(("us".into(), "1549184387".into()))
        );
        // classical host has no music videos
        assert!(
            parse_music_video_url(
                "https://classical.music.apple.com/us/music-video/x/1549184387"
            )
            .is_none()
        );
    }

    #[test]
    fn test_playlist_url_shapes() {
        assert_eq!(
            parse_playlist_url(
                "https://music.apple.com/us/playlist/pl.5ee8333dbe944d9f9151e97d92d1ead9",
                "us"
            ),
            Some(("us".into(), "pl.5ee8333dbe944d9f9151e97d92d1ead9".into()))
        );
        assert_eq!(
            parse_playlist_url(
                "https://music.apple.com/us/playlist/todays-hits/pl.f4d106fed2bd41149aaacabb233eb5eb",
                "us"
            ),
            Some(("us".into(), "pl.f4d106fed2bd41149aaacabb233eb5eb".into()))
        );
        // Library playlists carry no storefront; the default applies.
        assert_eq!(
            parse_playlist_url(
                "https://music.apple.com/library/playlist/p.qQXLxPLtA75zg8e",
                "gb"
            ),
            Some(("gb".into(), "p.qQXLxPLtA75zg8e".into()))
        );
        assert_eq!(
            parse_playlist_url("https://music.apple.com/us/playlist/pl.u-76oNlGgFJkzr1Ee", "us"),
            Some(("us".into(), "pl.u-76oNlGgFJkzr1Ee".into()))
        );
    }

    #[test]
    fn test_artist_url() {
        assert_eq!(
            parse_artist_url("https://music.apple.com/us/artist/joji/1258279972"),
            Some(("us".into(), "1258279972".into()))
        );
    }

    #[test]
    fn test_non_apple_urls_rejected() {
        assert!(parse_album_url("https://example.com/us/album/123456").is_none());
        assert!(parse_song_url("http://music.apple.com/us/song/123456").is_none());
    }
}
