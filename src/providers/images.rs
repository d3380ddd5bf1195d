//! Artwork and artist images, stored as JPEG data URIs keyed by source URL.

use std::sync::Arc;

use log::{debug, warn};

use super::cached_image_or_fetch;
use crate::cache::UnifiedCache;
use crate::fetch::SecureFetch;

pub struct ImageCache {
    cache: Arc<UnifiedCache>,
    fetch: Arc<SecureFetch>,
}

impl ImageCache {
    pub fn new(cache: Arc<UnifiedCache>, fetch: Arc<SecureFetch>) -> Self {
        ImageCache { cache, fetch }
    }

    /// Data URI for the image at `url`, downloading it when not cached.
    pub fn get_image(&self, url: &str) -> Option<String> {
        if url.is_empty() {
            return None;
        }
        cached_image_or_fetch(&self.cache, url, || self.download(url))
    }

    fn download(&self, url: &str) -> Option<Vec<u8>> {
        match self.fetch.get(url) {
            Ok(response) if response.status() == 200 => {
                debug!("Downloaded image {} ({} bytes)", url, response.bytes().len());
                Some(response.into_bytes())
            }
            Ok(response) => {
                warn!("Image download failed: HTTP {} for {}", response.status(), url);
                None
            }
            Err(e) => {
                warn!("Image download failed for {}: {}", url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{decode_image_data_uri, CacheKind};
    use crate::clock::ManualClock;
    use crate::connectivity::StaticConnectivity;
    use crate::fetch::testing::{fetcher, FakeTransport, Reply};
    use std::time::Duration;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn images(dir: &TempDir, transport: &Arc<FakeTransport>) -> (ImageCache, Arc<UnifiedCache>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(
            UnifiedCache::open_with_clock(dir.path(), HOUR, Arc::new(StaticConnectivity::online()), clock.clone())
                .unwrap(),
        );
        (ImageCache::new(cache.clone(), fetcher(transport)), cache, clock)
    }

    #[test]
    fn test_download_and_cache() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            FakeTransport::new().route("cover.jpg", vec![Reply::Status(200, vec![0xFF, 0xD8, 0xFF, 0xE0])]),
        );
        let (images, cache, _) = images(&dir, &transport);

        let uri = images.get_image("https://img.example/cover.jpg").unwrap();
        assert_eq!(decode_image_data_uri(&uri).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xE0]);
        assert!(cache.has(CacheKind::Images, "https://img.example/cover.jpg"));

        assert_eq!(images.get_image("https://img.example/cover.jpg"), Some(uri));
        assert_eq!(transport.call_count("cover.jpg"), 1);
    }

    #[test]
    fn test_failures_are_none() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            FakeTransport::new()
                .route("gone.jpg", vec![Reply::Status(404, b"not found".to_vec())])
                .route("moved.jpg", vec![Reply::Status(204, Vec::new())]),
        );
        let (images, _, _) = images(&dir, &transport);

        assert_eq!(images.get_image(""), None);
        assert_eq!(images.get_image("https://img.example/gone.jpg"), None);
        assert_eq!(images.get_image("https://img.example/moved.jpg"), None);
        assert_eq!(images.get_image("https://unreachable.example/x.jpg"), None);
        assert!(transport.calls().iter().all(|(url, _)| !url.is_empty()));
    }

    #[test]
    fn test_stale_image_served_when_download_fails() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new().route(
            "a.jpg",
            vec![Reply::Status(200, vec![1, 2, 3]), Reply::Status(500, Vec::new())],
        ));
        let (images, _, clock) = images(&dir, &transport);

        let first = images.get_image("https://img.example/a.jpg").unwrap();
        clock.advance(HOUR * 3);
        assert_eq!(images.get_image("https://img.example/a.jpg"), Some(first));
        assert_eq!(transport.call_count("a.jpg"), 2);
    }
}
