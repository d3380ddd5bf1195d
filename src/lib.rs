pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod providers;
pub mod rate_limiter;
pub mod track;

pub use cache::{CacheEntryInfo, CacheKind, CacheStats, Cached, Payload, UnifiedCache};
pub use config::Config;
pub use connectivity::{Connectivity, ConnectivityState, Prober, StaticConnectivity};
pub use context::AppContext;
pub use enrich::{merge_artist_metadata, ArtistMetadata, Enricher, Enrichment, Update};
pub use error::{CacheError, ConfigError, FetchError, StartupError};
pub use fetch::{ConnectionMode, FetchRequest, FetchResponse, SecureFetch, Transport, UreqTransport};
pub use track::{JsonLinesSource, MediaSource, MediaState, TrackChangeDetector, TrackEvent, TrackSnapshot};
