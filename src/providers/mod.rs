//! Data providers in front of the cache.
//!
//! Every provider answers the same way: a fresh cache hit wins; otherwise
//! the network is asked and a result is written back; if the network has
//! nothing, whatever the cache still holds is returned, however old. The
//! helpers here are the only implementation of that sequence.

pub mod audiodb;
pub mod images;
pub mod lyrics;
pub mod spotify;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{CacheKind, Payload, UnifiedCache};

pub use audiodb::{AudioDbArtist, AudioDbClient, AudioDbMetadata};
pub use images::ImageCache;
pub use lyrics::{Lyrics, LyricsClient};
pub use spotify::{SpotifyClient, SpotifyMetadata, StaticToken, TokenProvider};

fn fetch_then_fallback<T>(
    kind: CacheKind,
    key: &str,
    hit: impl FnOnce() -> Option<T>,
    fetch: impl FnOnce() -> Option<T>,
    store: impl FnOnce(&T) -> bool,
    fallback: impl FnOnce() -> Option<T>,
) -> Option<T> {
    if let Some(cached) = hit() {
        debug!("Cache hit: {}/{}", kind, key);
        return Some(cached);
    }

    if let Some(fresh) = fetch() {
        if !store(&fresh) {
            warn!("Could not cache {}/{}", kind, key);
        }
        return Some(fresh);
    }

    let stale = fallback();
    if stale.is_some() {
        debug!("Serving stored copy of {}/{} after failed refresh", kind, key);
    }
    stale
}

/// Cached JSON record for `key`, refreshed through `fetch` when missing or stale.
pub fn cached_or_fetch<T, F>(cache: &UnifiedCache, kind: CacheKind, key: &str, fetch: F) -> Option<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Option<T>,
{
    fetch_then_fallback(
        kind,
        key,
        || cache.get_json(kind, key),
        fetch,
        |fresh| cache.set_json(kind, key, fresh),
        || cache.peek_json(kind, key),
    )
}

/// Cached image for `key` as a data URI, downloaded through `fetch` when
/// missing or stale.
pub fn cached_image_or_fetch<F>(cache: &UnifiedCache, key: &str, fetch: F) -> Option<String>
where
    F: FnOnce() -> Option<Vec<u8>>,
{
    let kind = CacheKind::Images;
    fetch_then_fallback(
        kind,
        key,
        || cache.get(kind, key).and_then(|c| c.into_image()),
        || fetch().filter(|bytes| !bytes.is_empty()).map(|bytes| crate::cache::image_data_uri(&bytes)),
        |uri| cache.set(kind, key, &Payload::DataUri(uri.clone())),
        || cache.peek(kind, key).and_then(|c| c.into_image()),
    )
}
