//! TheAudioDB artist metadata client.
//!
//! Uses the public test key. Requests are spaced at least 500 ms apart.

use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use super::cached_or_fetch;
use crate::cache::{CacheKind, UnifiedCache};
use crate::fetch::{FetchRequest, SecureFetch};
use crate::rate_limiter::{Outcome, RateLimiter};

const AUDIODB_BASE_URL: &str = "https://www.theaudiodb.com";
const AUDIODB_API_KEY: &str = "523532";
const MIN_REQUEST_INTERVAL_MS: u64 = 500;
const BIO_SUMMARY_LIMIT: usize = 300;

// ── API response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiSearchResponse {
    #[serde(default)]
    artists: Option<Vec<ApiArtist>>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiArtist {
    #[serde(rename = "strArtist")]
    name: Option<String>,
    #[serde(rename = "strArtistAlternate")]
    alternate_name: Option<String>,
    #[serde(rename = "strCountry")]
    country: Option<String>,
    #[serde(rename = "strCountryCode")]
    country_code: Option<String>,
    #[serde(rename = "intFormedYear")]
    formed_year: Option<String>,
    #[serde(rename = "intBornYear")]
    born_year: Option<String>,
    #[serde(rename = "intDiedYear")]
    died_year: Option<String>,
    #[serde(rename = "strDisbanded")]
    disbanded: Option<String>,
    #[serde(rename = "strGenre")]
    genre: Option<String>,
    #[serde(rename = "strStyle")]
    style: Option<String>,
    #[serde(rename = "strMood")]
    mood: Option<String>,
    #[serde(rename = "strGender")]
    gender: Option<String>,
    #[serde(rename = "intMembers")]
    members: Option<String>,
    #[serde(rename = "strBiographyEN")]
    biography_en: Option<String>,
    #[serde(rename = "strBiographyDE")]
    biography_de: Option<String>,
    #[serde(rename = "strBiographyFR")]
    biography_fr: Option<String>,
    #[serde(rename = "strBiographyES")]
    biography_es: Option<String>,
    #[serde(rename = "strBiographyPT")]
    biography_pt: Option<String>,
    #[serde(rename = "strBiographyIT")]
    biography_it: Option<String>,
    #[serde(rename = "strBiographyJP")]
    biography_jp: Option<String>,
    #[serde(rename = "strBiographyRU")]
    biography_ru: Option<String>,
    #[serde(rename = "strWebsite")]
    website: Option<String>,
    #[serde(rename = "strFacebook")]
    facebook: Option<String>,
    #[serde(rename = "strTwitter")]
    twitter: Option<String>,
    #[serde(rename = "strArtistThumb")]
    thumb: Option<String>,
    #[serde(rename = "strArtistLogo")]
    logo: Option<String>,
    #[serde(rename = "strArtistClearart")]
    clearart: Option<String>,
    #[serde(rename = "strArtistWideThumb")]
    wide_thumb: Option<String>,
    #[serde(rename = "strArtistFanart")]
    fanart: Option<String>,
    #[serde(rename = "strArtistFanart2")]
    fanart2: Option<String>,
    #[serde(rename = "strArtistFanart3")]
    fanart3: Option<String>,
    #[serde(rename = "strArtistFanart4")]
    fanart4: Option<String>,
    #[serde(rename = "strArtistBanner")]
    banner: Option<String>,
    #[serde(rename = "strMusicBrainzID")]
    musicbrainz_id: Option<String>,
}

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Biography {
    /// English biography cut to 300 characters.
    pub summary: Option<String>,
    pub content: Option<String>,
    pub de: Option<String>,
    pub fr: Option<String>,
    pub es: Option<String>,
    pub pt: Option<String>,
    pub it: Option<String>,
    pub jp: Option<String>,
    pub ru: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioDbArtist {
    pub name: Option<String>,
    pub alternate_name: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub formed_year: Option<String>,
    pub born_year: Option<String>,
    pub died_year: Option<String>,
    pub disbanded: Option<String>,
    pub genre: Option<String>,
    pub style: Option<String>,
    pub mood: Option<String>,
    pub gender: Option<String>,
    pub members: Option<String>,
    pub bio: Biography,
    pub website: Option<String>,
    pub facebook: Option<String>,
    pub twitter: Option<String>,
    /// Thumb, fanart 1-4, wide thumb and banner, in that order, empties removed.
    pub all_images: Vec<String>,
    pub thumb: Option<String>,
    pub logo: Option<String>,
    pub clearart: Option<String>,
    pub banner: Option<String>,
    pub music_brainz_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDbMetadata {
    pub artist: AudioDbArtist,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Cut `text` to `limit` characters, appending `...` when shortened.
fn truncate_bio(text: Option<&str>, limit: usize) -> Option<String> {
    let text = text.filter(|t| !t.is_empty())?;
    if text.chars().count() <= limit {
        return Some(text.to_string());
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    Some(cut)
}

fn parse_artist(api: ApiArtist) -> AudioDbArtist {
    let all_images = [
        &api.thumb,
        &api.fanart,
        &api.fanart2,
        &api.fanart3,
        &api.fanart4,
        &api.wide_thumb,
        &api.banner,
    ]
    .into_iter()
    .flatten()
    .filter(|url| !url.is_empty())
    .cloned()
    .collect();

    AudioDbArtist {
        bio: Biography {
            summary: truncate_bio(api.biography_en.as_deref(), BIO_SUMMARY_LIMIT),
            content: api.biography_en,
            de: api.biography_de,
            fr: api.biography_fr,
            es: api.biography_es,
            pt: api.biography_pt,
            it: api.biography_it,
            jp: api.biography_jp,
            ru: api.biography_ru,
        },
        all_images,
        name: api.name,
        alternate_name: api.alternate_name,
        country: api.country,
        country_code: api.country_code,
        formed_year: api.formed_year,
        born_year: api.born_year,
        died_year: api.died_year,
        disbanded: api.disbanded,
        genre: api.genre,
        style: api.style,
        mood: api.mood,
        gender: api.gender,
        members: api.members,
        website: api.website,
        facebook: api.facebook,
        twitter: api.twitter,
        thumb: api.thumb,
        logo: api.logo,
        clearart: api.clearart,
        banner: api.banner,
        music_brainz_id: api.musicbrainz_id,
    }
}

pub fn artist_cache_key(artist: &str) -> String {
    format!("audiodb_artist:{}", artist.to_lowercase())
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct AudioDbClient {
    cache: Arc<UnifiedCache>,
    fetch: Arc<SecureFetch>,
    rate_limiter: RateLimiter,
    base_url: String,
    user_agent: String,
}

impl AudioDbClient {
    pub fn new(cache: Arc<UnifiedCache>, fetch: Arc<SecureFetch>) -> Self {
        AudioDbClient {
            cache,
            fetch,
            rate_limiter: RateLimiter::from_millis("TheAudioDB", MIN_REQUEST_INTERVAL_MS),
            base_url: format!("{}/api/v1/json/{}", AUDIODB_BASE_URL, AUDIODB_API_KEY),
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    /// GET `endpoint` with spacing between requests. `None` on any failure.
    fn make_request(&self, endpoint: &str, params: &[(&str, &str)]) -> Option<ApiSearchResponse> {
        let url = match Url::parse_with_params(&format!("{}/{}", self.base_url, endpoint), params) {
            Ok(url) => url,
            Err(e) => {
                error!("Invalid TheAudioDB URL: {}", e);
                return None;
            }
        };

        self.rate_limiter.acquire();

        let request = FetchRequest::get(url.as_str()).header("User-Agent", &self.user_agent);
        let response = match self.fetch.fetch(&request) {
            Ok(response) => response,
            Err(e) => {
                self.rate_limiter.record(Outcome::Failed);
                error!("TheAudioDB request failed: {}", e);
                return None;
            }
        };
        if !response.ok() {
            let outcome = if response.status() == 429 {
                Outcome::Throttled
            } else {
                Outcome::Failed
            };
            self.rate_limiter.record(outcome);
            error!("TheAudioDB error: HTTP {}", response.status());
            return None;
        }
        self.rate_limiter.record(Outcome::Ok);

        match response.json() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Unexpected TheAudioDB payload: {}", e);
                None
            }
        }
    }

    pub fn search_artist(&self, artist_name: &str) -> Option<AudioDbArtist> {
        if artist_name.is_empty() {
            return None;
        }

        let key = artist_cache_key(artist_name);
        cached_or_fetch(&self.cache, CacheKind::Metadata, &key, || {
            let start = Instant::now();
            let found = self
                .make_request("search.php", &[("s", artist_name)])
                .and_then(|response| response.artists)
                .and_then(|artists| artists.into_iter().next())
                .map(parse_artist);
            let elapsed = start.elapsed().as_millis();

            match &found {
                Some(_) => info!("TheAudioDB found ({}ms): {}", elapsed, artist_name),
                None => warn!("TheAudioDB not found ({}ms): {}", elapsed, artist_name),
            }
            found
        })
    }

    pub fn fetch_metadata(&self, artist_name: &str) -> Option<AudioDbMetadata> {
        if artist_name.is_empty() {
            log::debug!("TheAudioDB: no artist name provided");
            return None;
        }
        self.search_artist(artist_name)
            .map(|artist| AudioDbMetadata { artist })
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

    fn client(dir: &TempDir, transport: &Arc<FakeTransport>) -> AudioDbClient {
        let cache = UnifiedCache::open(
            dir.path(),
            Duration::from_secs(3600),
            Arc::new(StaticConnectivity::online()),
        )
        .unwrap();
        AudioDbClient::new(Arc::new(cache), fetcher(transport))
            .with_rate_limiter(RateLimiter::unlimited("test"))
    }

    #[test]
    fn test_truncate_bio() {
        assert_eq!(truncate_bio(None, 10), None);
        assert_eq!(truncate_bio(Some(""), 10), None);
        assert_eq!(truncate_bio(Some("short"), 10).as_deref(), Some("short"));
        assert_eq!(truncate_bio(Some("0123456789abc"), 10).as_deref(), Some("0123456789..."));
        assert_eq!(truncate_bio(Some("ééééé"), 3).as_deref(), Some("ééé..."));
    }

    #[test]
    fn test_parse_artist_collects_images() {
        let api = ApiArtist {
            name: Some("Björk".into()),
            thumb: Some("t.jpg".into()),
            fanart: Some("".into()),
            fanart3: Some("f3.jpg".into()),
            banner: Some("b.jpg".into()),
            biography_en: Some("x".repeat(400)),
            ..ApiArtist::default()
        };
        let artist = parse_artist(api);
        assert_eq!(artist.all_images, vec!["t.jpg", "f3.jpg", "b.jpg"]);
        assert_eq!(artist.bio.summary.as_ref().unwrap().len(), 303);
        assert_eq!(artist.bio.content.as_ref().unwrap().len(), 400);
    }

    #[test]
    fn test_search_artist_fetches_and_caches() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new().route(
            "search.php",
            vec![Reply::json(
                200,
                json!({"artists": [{
                    "strArtist": "Radiohead",
                    "strCountry": "Abingdon, England",
                    "strGenre": "Alternative Rock",
                    "intFormedYear": "1985",
                    "strArtistThumb": "https://r2.theaudiodb.com/thumb.jpg",
                    "strArtistFanart": null
                }]}),
            )],
        ));
        let client = client(&dir, &transport);

        let meta = client.fetch_metadata("Radiohead").unwrap();
        assert_eq!(meta.artist.name.as_deref(), Some("Radiohead"));
        assert_eq!(meta.artist.formed_year.as_deref(), Some("1985"));
        assert_eq!(meta.artist.all_images, vec!["https://r2.theaudiodb.com/thumb.jpg"]);

        assert_eq!(client.search_artist("RADIOHEAD"), Some(meta.artist));
        assert_eq!(transport.call_count("search.php"), 1);
        assert!(transport.calls()[0]
            .0
            .ends_with("/api/v1/json/523532/search.php?s=Radiohead"));
    }

    #[test]
    fn test_unknown_artist_and_errors() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            FakeTransport::new()
                .route("s=Nobody", vec![Reply::json(200, json!({"artists": null}))])
                .route("s=Broken", vec![Reply::Status(502, Vec::new())]),
        );
        let client = client(&dir, &transport);

        assert_eq!(client.fetch_metadata("Nobody"), None);
        assert_eq!(client.fetch_metadata("Broken"), None);
        assert_eq!(client.fetch_metadata(""), None);
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn test_rate_limit_response_widens_the_gap() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new().route("s=Busy", vec![Reply::Status(429, Vec::new())]));
        let client = client(&dir, &transport).with_rate_limiter(RateLimiter::new(
            "test",
            Duration::ZERO,
            Duration::from_secs(10),
            0,
        ));

        assert_eq!(client.fetch_metadata("Busy"), None);
        assert_eq!(client.rate_limiter.gap(), Duration::from_secs(10));
    }
}
