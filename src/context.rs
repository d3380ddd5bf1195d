//! Builds the shared cache, fetcher and provider clients from a [`Config`].

use std::sync::Arc;

use log::{debug, info};

use crate::cache::UnifiedCache;
use crate::config::Config;
use crate::connectivity::{Connectivity, Prober, StaticConnectivity};
use crate::enrich::Enricher;
use crate::error::StartupError;
use crate::fetch::SecureFetch;
use crate::providers::{AudioDbClient, ImageCache, LyricsClient, SpotifyClient, StaticToken};

pub struct AppContext {
    pub cache: Arc<UnifiedCache>,
    pub fetch: Arc<SecureFetch>,
    pub enricher: Enricher,
}

impl AppContext {
    /// `offline` pins connectivity to offline so every cached entry is served
    /// regardless of age and no probe is sent.
    pub fn build(config: &Config, offline: bool) -> Result<Self, StartupError> {
        let fetch = Arc::new(SecureFetch::with_ureq(config.user_agent(), config.request_timeout())?);
        Self::with_fetch(config, offline, fetch)
    }

    pub fn with_fetch(config: &Config, offline: bool, fetch: Arc<SecureFetch>) -> Result<Self, StartupError> {
        let connectivity: Arc<dyn Connectivity> = if offline {
            info!("Offline mode: serving cached data only");
            Arc::new(StaticConnectivity::offline())
        } else {
            Arc::new(Prober::new(
                fetch.clone(),
                config.probe_url(),
                config.probe_timeout(),
                config.connectivity_recheck(),
            ))
        };

        let root = config.cache_root();
        debug!("Cache root: {}", root.display());
        let cache = Arc::new(UnifiedCache::open(&root, config.cache_expiry(), connectivity)?);

        let tokens = Arc::new(StaticToken::new(config.spotify_access_token.clone()));
        let enricher = Enricher::new(
            LyricsClient::new(cache.clone(), fetch.clone()),
            AudioDbClient::new(cache.clone(), fetch.clone()).with_user_agent(config.user_agent()),
            SpotifyClient::new(tokens, cache.clone(), fetch.clone()),
            ImageCache::new(cache.clone(), fetch.clone()),
        );

        Ok(AppContext { cache, fetch, enricher })
    }
}
