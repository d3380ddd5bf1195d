//! Per-track enrichment: every provider is asked concurrently and the
//! answers are joined into one [`Enrichment`].
//!
//! A provider that fails or panics contributes nothing; the others are
//! unaffected.

use std::thread;
use std::time::Duration;

use log::{error, info};
use serde::Serialize;

use crate::cache::UnifiedCache;
use crate::providers::audiodb::AudioDbMetadata;
use crate::providers::spotify::{SpotifyAlbum, SpotifyMetadata, SpotifyTrack};
use crate::providers::{AudioDbClient, ImageCache, Lyrics, LyricsClient, SpotifyClient};
use crate::track::{MediaSource, MediaState, TrackChangeDetector, TrackEvent, TrackSnapshot};

const MAX_ARTIST_IMAGES: usize = 8;

/// A top track or album as shown in the carousel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Highlight {
    pub name: String,
    /// Popularity for tracks, track count for albums.
    pub detail: Option<String>,
    pub image: Option<String>,
    pub artist: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedArtist {
    pub name: Option<String>,
    /// TheAudioDB record when that provider answered.
    pub details: Option<crate::providers::AudioDbArtist>,
    pub all_images: Vec<String>,
    pub spotify_popularity: Option<u32>,
    pub spotify_genres: Vec<String>,
    pub spotify_followers: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistMetadata {
    pub artist: MergedArtist,
    pub top_tracks: Vec<Highlight>,
    pub top_albums: Vec<Highlight>,
    pub has_spotify_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Enrichment {
    pub lyrics: Option<Lyrics>,
    pub artist: Option<ArtistMetadata>,
    /// Album artwork as a data URI.
    pub artwork: Option<String>,
}

fn track_highlight(track: &SpotifyTrack) -> Highlight {
    Highlight {
        name: track.name.clone(),
        detail: track.popularity.map(|p| p.to_string()),
        image: track
            .album
            .as_ref()
            .and_then(|album| album.images.first())
            .map(|img| img.url.clone()),
        artist: track.artists.first().map(|a| a.name.clone()),
        url: track.external_urls.spotify.clone(),
    }
}

fn album_highlight(album: &SpotifyAlbum) -> Highlight {
    Highlight {
        name: album.name.clone(),
        detail: album.total_tracks.map(|n| format!("{} tracks", n)),
        image: album.images.first().map(|img| img.url.clone()),
        artist: album.artists.first().map(|a| a.name.clone()),
        url: album.external_urls.spotify.clone(),
    }
}

/// Keep non-empty, first occurrence only, at most eight.
fn dedup_images<'a>(images: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for url in images {
        if url.is_empty() || out.contains(url) {
            continue;
        }
        out.push(url.clone());
        if out.len() == MAX_ARTIST_IMAGES {
            break;
        }
    }
    out
}

/// Combine both metadata providers. TheAudioDB supplies the base record;
/// Spotify adds its lead image, popularity, genres, followers and highlights.
pub fn merge_artist_metadata(
    audiodb: Option<AudioDbMetadata>,
    spotify: Option<SpotifyMetadata>,
) -> Option<ArtistMetadata> {
    match (audiodb, spotify) {
        (None, None) => None,
        (Some(adb), None) => {
            let artist = adb.artist;
            Some(ArtistMetadata {
                artist: MergedArtist {
                    name: artist.name.clone(),
                    all_images: dedup_images(&artist.all_images),
                    details: Some(artist),
                    ..MergedArtist::default()
                },
                top_tracks: Vec::new(),
                top_albums: Vec::new(),
                has_spotify_data: false,
            })
        }
        (adb, Some(sp)) => {
            let spotify_images: Vec<String> = sp.artist.images.iter().map(|img| img.url.clone()).collect();
            let all_images = match &adb {
                Some(adb) => dedup_images(spotify_images.iter().take(1).chain(&adb.artist.all_images)),
                None => dedup_images(&spotify_images),
            };
            let details = adb.map(|m| m.artist);
            let name = details
                .as_ref()
                .and_then(|d| d.name.clone())
                .or_else(|| Some(sp.artist.name.clone()).filter(|n| !n.is_empty()));

            Some(ArtistMetadata {
                artist: MergedArtist {
                    name,
                    details,
                    all_images,
                    spotify_popularity: sp.artist.popularity,
                    spotify_genres: sp.artist.genres.clone(),
                    spotify_followers: sp.artist.followers.as_ref().map(|f| f.total),
                },
                top_tracks: sp.top_tracks.iter().map(track_highlight).collect(),
                top_albums: sp.top_albums.iter().map(album_highlight).collect(),
                has_spotify_data: true,
            })
        }
    }
}

fn join_or_none<T>(handle: thread::ScopedJoinHandle<'_, Option<T>>, provider: &str) -> Option<T> {
    handle.join().unwrap_or_else(|_| {
        error!("{} lookup panicked", provider);
        None
    })
}

pub struct Enricher {
    lyrics: LyricsClient,
    audiodb: AudioDbClient,
    spotify: SpotifyClient,
    images: ImageCache,
}

impl Enricher {
    pub fn new(lyrics: LyricsClient, audiodb: AudioDbClient, spotify: SpotifyClient, images: ImageCache) -> Self {
        Enricher {
            lyrics,
            audiodb,
            spotify,
            images,
        }
    }

    pub fn lyrics(&self) -> &LyricsClient {
        &self.lyrics
    }

    pub fn audiodb(&self) -> &AudioDbClient {
        &self.audiodb
    }

    pub fn spotify(&self) -> &SpotifyClient {
        &self.spotify
    }

    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    pub fn enrich(&self, track: &TrackSnapshot) -> Enrichment {
        let (lyrics, audiodb, spotify, artwork) = thread::scope(|s| {
            let lyrics = s.spawn(|| self.lyrics.fetch_lyrics(&track.title, &track.artist));
            let audiodb = s.spawn(|| self.audiodb.fetch_metadata(&track.artist));
            let spotify = s.spawn(|| {
                if self.spotify.is_logged_in() {
                    self.spotify.fetch_metadata(track)
                } else {
                    None
                }
            });
            let artwork = s.spawn(|| track.artwork_url.as_deref().and_then(|url| self.images.get_image(url)));

            (
                join_or_none(lyrics, "Lyrics"),
                join_or_none(audiodb, "TheAudioDB"),
                join_or_none(spotify, "Spotify"),
                join_or_none(artwork, "Artwork"),
            )
        });

        Enrichment {
            lyrics,
            artist: merge_artist_metadata(audiodb, spotify),
            artwork,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// A new track with everything known about it.
    Track(Box<TrackSnapshot>, Box<Enrichment>),
    /// The player no longer reports a usable track.
    Cleared,
}

/// Poll `source` until it closes, enriching each new track once.
///
/// Expired entries are swept from `cache` before the first poll.
pub fn watch<S, F>(enricher: &Enricher, cache: &UnifiedCache, source: &mut S, interval: Duration, mut on_update: F)
where
    S: MediaSource,
    F: FnMut(Update),
{
    let removed = cache.clear_expired();
    if removed > 0 {
        info!("Removed {} expired cache entries", removed);
    }

    let mut detector = TrackChangeDetector::new();
    loop {
        let state = source.poll();
        if state == MediaState::Closed {
            break;
        }

        let had_track = detector.current_key().is_some();
        match detector.observe(state) {
            TrackEvent::Changed(track) => {
                info!("Now playing: {} - {}", track.artist, track.title);
                let enrichment = enricher.enrich(&track);
                on_update(Update::Track(Box::new(track), Box::new(enrichment)));
            }
            TrackEvent::Cleared if had_track => on_update(Update::Cleared),
            TrackEvent::Cleared | TrackEvent::Unchanged(_) => {}
        }

        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
}
