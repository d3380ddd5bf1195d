//! Spotify Web API client for artist details, top tracks and albums.
//!
//! Access tokens come from a [`TokenProvider`]; without one every request
//! short-circuits to `None`.

use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::cached_or_fetch;
use crate::cache::{CacheKind, UnifiedCache};
use crate::fetch::{FetchRequest, SecureFetch};
use crate::track::TrackSnapshot;

const SPOTIFY_API_BASE: &str = "https://api.spotify.com";
const TOP_TRACKS_MARKET: &str = "US";
const TOP_TRACKS_LIMIT: usize = 5;
const ALBUMS_LIMIT: usize = 4;

/// Source of Spotify bearer tokens.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn is_logged_in(&self) -> bool {
        self.access_token().is_some()
    }
}

/// A fixed token, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        StaticToken(token.filter(|t| !t.trim().is_empty()))
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyImage {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Followers {
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyArtist {
    pub id: String,
    pub name: String,
    pub genres: Vec<String>,
    pub popularity: Option<u32>,
    pub followers: Option<Followers>,
    pub images: Vec<SpotifyImage>,
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyAlbum {
    pub id: String,
    pub name: String,
    pub album_type: Option<String>,
    pub release_date: Option<String>,
    pub total_tracks: Option<u32>,
    pub images: Vec<SpotifyImage>,
    pub artists: Vec<ArtistRef>,
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyTrack {
    pub id: String,
    pub name: String,
    pub duration_ms: Option<u64>,
    pub popularity: Option<u32>,
    pub artists: Vec<ArtistRef>,
    pub album: Option<SpotifyAlbum>,
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct TopTracksResponse {
    #[serde(default)]
    tracks: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct AlbumsResponse {
    #[serde(default)]
    items: Vec<SpotifyAlbum>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    artists: Option<ArtistsPage>,
}

#[derive(Debug, Deserialize)]
struct ArtistsPage {
    #[serde(default)]
    items: Vec<SpotifyArtist>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotifyMetadata {
    pub artist: SpotifyArtist,
    pub top_tracks: Vec<SpotifyTrack>,
    pub top_albums: Vec<SpotifyAlbum>,
}

/// Track id from an `open.spotify.com/track/<id>` link or a
/// `spotify:track:<id>` URI.
pub fn extract_track_id(spotify_url: &str) -> Option<String> {
    let id = if let Some(rest) = spotify_url.strip_prefix("spotify:track:") {
        rest
    } else {
        let (_, rest) = spotify_url.split_once("/track/")?;
        rest
    };
    let id: String = id.chars().take_while(|c| c.is_ascii_alphanumeric()).collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

pub struct SpotifyClient {
    tokens: Arc<dyn TokenProvider>,
    cache: Arc<UnifiedCache>,
    fetch: Arc<SecureFetch>,
    base_url: String,
}

impl SpotifyClient {
    pub fn new(tokens: Arc<dyn TokenProvider>, cache: Arc<UnifiedCache>, fetch: Arc<SecureFetch>) -> Self {
        SpotifyClient {
            tokens,
            cache,
            fetch,
            base_url: SPOTIFY_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn is_logged_in(&self) -> bool {
        self.tokens.is_logged_in()
    }

    /// Authenticated GET against `/v1/<endpoint>`. `None` on any failure,
    /// including an `error` member in an otherwise successful body.
    fn make_request<T: serde::de::DeserializeOwned>(&self, endpoint: &str, params: &[(&str, &str)]) -> Option<T> {
        let Some(token) = self.tokens.access_token() else {
            warn!("Spotify: no access token");
            return None;
        };

        let raw = format!("{}/v1/{}", self.base_url, endpoint);
        let parsed = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        let url = match parsed {
            Ok(url) => url,
            Err(e) => {
                error!("Invalid Spotify URL for {}: {}", endpoint, e);
                return None;
            }
        };

        let request = FetchRequest::get(url.as_str()).header("Authorization", &format!("Bearer {}", token));
        let response = match self.fetch.fetch(&request) {
            Ok(response) => response,
            Err(e) => {
                error!("Spotify request failed ({}): {}", endpoint, e);
                return None;
            }
        };

        let body: Value = match response.json() {
            Ok(body) => body,
            Err(e) => {
                error!("Spotify returned unreadable body ({}): {}", endpoint, e);
                return None;
            }
        };
        if let Some(err) = body.get("error") {
            error!("Spotify API error ({}): {}", endpoint, err);
            return None;
        }
        if !response.ok() {
            error!("Spotify HTTP {} ({})", response.status(), endpoint);
            return None;
        }

        match serde_json::from_value(body) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Unexpected Spotify payload ({}): {}", endpoint, e);
                None
            }
        }
    }

    pub fn get_track(&self, track_id: &str) -> Option<SpotifyTrack> {
        cached_or_fetch(&self.cache, CacheKind::Metadata, &format!("track:{}", track_id), || {
            self.make_request(&format!("tracks/{}", track_id), &[])
        })
    }

    pub fn get_artist(&self, artist_id: &str) -> Option<SpotifyArtist> {
        cached_or_fetch(
            &self.cache,
            CacheKind::Metadata,
            &format!("spotify_artist:{}", artist_id),
            || self.make_request(&format!("artists/{}", artist_id), &[]),
        )
    }

    /// Up to five top tracks; empty when unavailable.
    pub fn get_artist_top_tracks(&self, artist_id: &str) -> Vec<SpotifyTrack> {
        cached_or_fetch(
            &self.cache,
            CacheKind::Metadata,
            &format!("spotify_toptracks:{}", artist_id),
            || {
                self.make_request::<TopTracksResponse>(
                    &format!("artists/{}/top-tracks", artist_id),
                    &[("market", TOP_TRACKS_MARKET)],
                )
                .map(|r| r.tracks.into_iter().take(TOP_TRACKS_LIMIT).collect::<Vec<_>>())
            },
        )
        .unwrap_or_default()
    }

    pub fn get_artist_albums(&self, artist_id: &str) -> Vec<SpotifyAlbum> {
        cached_or_fetch(
            &self.cache,
            CacheKind::Metadata,
            &format!("spotify_albums:{}", artist_id),
            || {
                self.make_request::<AlbumsResponse>(
                    &format!("artists/{}/albums", artist_id),
                    &[("include_groups", "album"), ("limit", ALBUMS_LIMIT.to_string().as_str())],
                )
                .map(|r| r.items.into_iter().take(ALBUMS_LIMIT).collect::<Vec<_>>())
            },
        )
        .unwrap_or_default()
    }

    pub fn search_artist(&self, name: &str) -> Option<SpotifyArtist> {
        if name.is_empty() {
            return None;
        }
        cached_or_fetch(
            &self.cache,
            CacheKind::Metadata,
            &format!("spotify_search:{}", name.to_lowercase()),
            || {
                self.make_request::<SearchResponse>("search", &[("q", name), ("type", "artist"), ("limit", "1")])
                    .and_then(|r| r.artists)
                    .and_then(|page| page.items.into_iter().next())
            },
        )
    }

    /// Resolve the playing track's primary artist, preferring the track link
    /// over a name search.
    fn resolve_artist(&self, track: &TrackSnapshot) -> Option<SpotifyArtist> {
        let from_track = track
            .spotify_url
            .as_deref()
            .and_then(extract_track_id)
            .and_then(|id| self.get_track(&id))
            .and_then(|t| t.artists.into_iter().next())
            .and_then(|a| self.get_artist(&a.id));

        from_track.or_else(|| self.search_artist(&track.artist))
    }

    pub fn fetch_metadata(&self, track: &TrackSnapshot) -> Option<SpotifyMetadata> {
        if !self.is_logged_in() {
            debug!("Spotify: not logged in, skipping");
            return None;
        }

        let artist = self.resolve_artist(track)?;
        let (top_tracks, top_albums) = thread::scope(|s| {
            let tracks = s.spawn(|| self.get_artist_top_tracks(&artist.id));
            let albums = s.spawn(|| self.get_artist_albums(&artist.id));
            (
                tracks.join().unwrap_or_default(),
                albums.join().unwrap_or_default(),
            )
        });

        info!(
            "Spotify: {} ({} top tracks, {} albums)",
            artist.name,
            top_tracks.len(),
            top_albums.len()
        );
        Some(SpotifyMetadata {
            artist,
            top_tracks,
            top_albums,
        })
    }
}
