//! Synced lyrics from LRCLIB.
//!
//! Search results are matched against the playing track by normalised title
//! and artist. Only results carrying time-synced lyrics are accepted.

use std::sync::Arc;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use super::cached_or_fetch;
use crate::cache::{CacheKind, UnifiedCache};
use crate::fetch::{FetchRequest, SecureFetch};

const LRCLIB_SEARCH_URL: &str = "https://lrclib.net/api/search";

/// Lyrics for one track, as cached and handed to the display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lyrics {
    /// LRC text with `[mm:ss.xx]` timestamps.
    pub synced: String,
    #[serde(default)]
    pub plain: Option<String>,
    #[serde(default)]
    pub instrumental: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiLyrics {
    #[serde(default)]
    track_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    artist_name: Option<String>,
    #[serde(default)]
    synced_lyrics: Option<String>,
    #[serde(default)]
    plain_lyrics: Option<String>,
    #[serde(default)]
    instrumental: bool,
}

impl ApiLyrics {
    fn title(&self) -> &str {
        self.track_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("")
    }
}

/// Cache key for a track's lyrics: `"{title}-{artist}"`, lowercased.
pub fn lyrics_cache_key(title: &str, artist: &str) -> String {
    format!("{}-{}", title, artist).to_lowercase()
}

/// Lowercase and keep only ASCII letters and digits.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Exact title+artist match, else title-only match, else the first result.
fn find_best_match<'a>(results: &'a [ApiLyrics], title: &str, artist: &str) -> Option<&'a ApiLyrics> {
    let target_title = normalize(title);
    let target_artist = normalize(artist);

    results
        .iter()
        .find(|item| {
            normalize(item.title()) == target_title
                && normalize(item.artist_name.as_deref().unwrap_or("")) == target_artist
        })
        .or_else(|| results.iter().find(|item| normalize(item.title()) == target_title))
        .or_else(|| results.first())
}

pub struct LyricsClient {
    cache: Arc<UnifiedCache>,
    fetch: Arc<SecureFetch>,
    search_url: String,
}

impl LyricsClient {
    pub fn new(cache: Arc<UnifiedCache>, fetch: Arc<SecureFetch>) -> Self {
        LyricsClient {
            cache,
            fetch,
            search_url: LRCLIB_SEARCH_URL.to_string(),
        }
    }

    pub fn with_search_url(mut self, url: &str) -> Self {
        self.search_url = url.to_string();
        self
    }

    pub fn fetch_lyrics(&self, title: &str, artist: &str) -> Option<Lyrics> {
        let key = lyrics_cache_key(title, artist);
        cached_or_fetch(&self.cache, CacheKind::Lyrics, &key, || {
            self.fetch_from_api(title, artist)
        })
    }

    fn fetch_from_api(&self, title: &str, artist: &str) -> Option<Lyrics> {
        let query = format!("{} {}", title, artist);
        let url = match Url::parse_with_params(&self.search_url, &[("q", query.as_str())]) {
            Ok(url) => url,
            Err(e) => {
                error!("Invalid lyrics search URL {}: {}", self.search_url, e);
                return None;
            }
        };

        let response = match self.fetch.fetch(&FetchRequest::get(url.as_str())) {
            Ok(response) => response,
            Err(e) => {
                warn!("Lyrics search failed for {} - {}: {}", artist, title, e);
                return None;
            }
        };
        if !response.ok() {
            warn!("Lyrics search returned HTTP {}", response.status());
            return None;
        }

        let results: Vec<ApiLyrics> = match response.json() {
            Ok(results) => results,
            Err(e) => {
                debug!("Unexpected lyrics search payload: {}", e);
                return None;
            }
        };

        let best = find_best_match(&results, title, artist)?;
        match &best.synced_lyrics {
            Some(synced) if !synced.is_empty() => Some(Lyrics {
                synced: synced.clone(),
                plain: best.plain_lyrics.clone(),
                instrumental: best.instrumental,
            }),
            _ => {
                debug!("No synced lyrics for {} - {}", artist, title);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::StaticConnectivity;
    use crate::fetch::testing::{fetcher, FakeTransport, Reply};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn api(title: &str, artist: &str, synced: Option<&str>) -> ApiLyrics {
        ApiLyrics {
            track_name: Some(title.to_string()),
            artist_name: Some(artist.to_string()),
            synced_lyrics: synced.map(str::to_string),
            ..ApiLyrics::default()
        }
    }

    fn client(dir: &TempDir, transport: &Arc<FakeTransport>) -> LyricsClient {
        let cache = UnifiedCache::open(
            dir.path(),
            Duration::from_secs(3600),
            Arc::new(StaticConnectivity::online()),
        )
        .unwrap();
        LyricsClient::new(Arc::new(cache), fetcher(transport))
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(lyrics_cache_key("Shape of You", "Ed Sheeran"), "shape of you-ed sheeran");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Don't Stop Me Now!"), "dontstopmenow");
        assert_eq!(normalize("  AC/DC "), "acdc");
    }

    #[test]
    fn test_best_match_preference() {
        let results = vec![
            api("Karma Police (Live)", "Radiohead", None),
            api("Karma Police", "Cover Band", None),
            api("karma police", "RADIOHEAD", None),
        ];
        let best = find_best_match(&results, "Karma Police", "Radiohead").unwrap();
        assert_eq!(best.artist_name.as_deref(), Some("RADIOHEAD"));

        let best = find_best_match(&results, "Karma Police", "Someone Else").unwrap();
        assert_eq!(best.artist_name.as_deref(), Some("Cover Band"));

        let best = find_best_match(&results, "Unknown", "Nobody").unwrap();
        assert_eq!(best.title(), "Karma Police (Live)");

        assert!(find_best_match(&[], "a", "b").is_none());
    }

    #[test]
    fn test_fetch_and_cache() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new().route(
            "lrclib.net/api/search",
            vec![Reply::json(
                200,
                json!([{
                    "trackName": "Shape of You",
                    "artistName": "Ed Sheeran",
                    "syncedLyrics": "[00:01.00]hello",
                    "plainLyrics": "hello",
                    "instrumental": false
                }]),
            )],
        ));
        let client = client(&dir, &transport);

        let lyrics = client.fetch_lyrics("Shape of You", "Ed Sheeran").unwrap();
        assert_eq!(lyrics.synced, "[00:01.00]hello");
        assert_eq!(lyrics.plain.as_deref(), Some("hello"));

        // Served from cache the second time.
        assert_eq!(client.fetch_lyrics("Shape of You", "Ed Sheeran"), Some(lyrics));
        assert_eq!(transport.call_count("lrclib"), 1);

        let url = &transport.calls()[0].0;
        assert!(url.starts_with("https://lrclib.net/api/search?q=Shape+of+You+Ed+Sheeran"));
    }

    #[test]
    fn test_results_without_synced_lyrics_are_not_found() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new().route(
            "lrclib",
            vec![Reply::json(200, json!([{"trackName": "Song", "artistName": "A", "plainLyrics": "x"}]))],
        ));
        assert_eq!(client(&dir, &transport).fetch_lyrics("Song", "A"), None);
    }

    #[test]
    fn test_malformed_and_failed_responses_are_not_found() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            FakeTransport::new()
                .route("q=Weird", vec![Reply::json(200, json!({"unexpected": true}))])
                .route("q=Broken", vec![Reply::Status(500, b"oops".to_vec())])
                .route("q=Empty", vec![Reply::json(200, json!([]))]),
        );
        let client = client(&dir, &transport);

        assert_eq!(client.fetch_lyrics("Weird", "A"), None);
        assert_eq!(client.fetch_lyrics("Broken", "A"), None);
        assert_eq!(client.fetch_lyrics("Empty", "A"), None);
        assert_eq!(client.fetch_lyrics("Offline", "A"), None);
    }
}
