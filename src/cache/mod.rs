//! Offline-first disk cache shared by every data provider.
//!
//! # Layout
//!
//! ```text
//! <root>/index.json          kind -> hash -> {key, timestamp, file}
//! <root>/images/<hash>.jpg
//! <root>/lyrics/<hash>.json
//! <root>/metadata/<hash>.json
//! ```
//!
//! # Staleness
//!
//! An entry older than the expiry window is reported as a miss only when the
//! network is confirmed reachable, so the caller refreshes it. When offline,
//! every readable entry is served regardless of age. Expired entries are
//! never deleted on read; [`UnifiedCache::peek`] still returns them as a
//! fallback when a refresh fails.
//!
//! All index mutations happen under one mutex and end with a full atomic
//! rewrite of `index.json`.

pub mod entry;
pub mod index;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::connectivity::Connectivity;
use crate::error::{CacheError, CacheResult};

pub use entry::{
    decode_image_data_uri, hash_key, image_data_uri, CacheEntryInfo, CacheKind, Cached, IndexRecord, Payload,
};
pub use index::Index;

const INDEX_FILE: &str = "index.json";

/// Entry counts and age range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub kinds: BTreeMap<CacheKind, usize>,
    pub total: usize,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}

pub struct UnifiedCache {
    root: PathBuf,
    index_path: PathBuf,
    expiry: Duration,
    index: Mutex<Index>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
}

impl UnifiedCache {
    /// Open (or create) a cache rooted at `root`.
    pub fn open(
        root: impl Into<PathBuf>,
        expiry: Duration,
        connectivity: Arc<dyn Connectivity>,
    ) -> CacheResult<Self> {
        Self::open_with_clock(root, expiry, connectivity, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        root: impl Into<PathBuf>,
        expiry: Duration,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        let root = root.into();
        for dir in std::iter::once(root.clone())
            .chain(CacheKind::ALL.iter().map(|kind| root.join(kind.dir_name())))
        {
            fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        }

        let index_path = root.join(INDEX_FILE);
        let index = Index::load(&index_path);
        debug!("Opened cache at {} with {} entries", root.display(), index.len());

        Ok(UnifiedCache {
            root,
            index_path,
            expiry,
            index: Mutex::new(index),
            connectivity,
            clock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn connectivity(&self) -> &Arc<dyn Connectivity> {
        &self.connectivity
    }

    fn entry_path(&self, kind: CacheKind, hash: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(kind.file_name(hash))
    }

    fn age_exceeds_expiry(&self, timestamp: i64, now: i64) -> bool {
        now.saturating_sub(timestamp) > self.expiry.as_millis() as i64
    }

    fn persist(&self, index: &Index) -> CacheResult<()> {
        index.save(&self.index_path).map_err(|e| {
            error!("Failed to save cache index: {}", e);
            e
        })
    }

    /// True if the index holds a record for `key`. Does not look at the file
    /// or its age.
    pub fn has(&self, kind: CacheKind, key: &str) -> bool {
        self.index.lock().contains(kind, &hash_key(key))
    }

    /// Cached value for `key`, or `None` when absent, unreadable, or stale
    /// while online.
    pub fn get(&self, kind: CacheKind, key: &str) -> Option<Cached> {
        self.read(kind, key, false)
    }

    /// Cached value for `key` regardless of age.
    pub fn peek(&self, kind: CacheKind, key: &str) -> Option<Cached> {
        self.read(kind, key, true)
    }

    fn read(&self, kind: CacheKind, key: &str, allow_stale: bool) -> Option<Cached> {
        let hash = hash_key(key);
        let record = self.index.lock().get(kind, &hash).cloned()?;

        let path = self.entry_path(kind, &hash);
        if !path.exists() {
            debug!("Cache file for {}/{} is gone, pruning its record", kind, key);
            self.prune(kind, &hash, false);
            return None;
        }

        if !allow_stale
            && self.age_exceeds_expiry(record.timestamp, self.clock.now_millis())
            && self.connectivity.is_online()
        {
            debug!("Cache entry {}/{} is stale, due for refresh", kind, key);
            return None;
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Read failed for {}/{}: {}", kind, key, e);
                return None;
            }
        };

        match entry::decode_payload(kind, &bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cache entry {}/{} is corrupt, discarding: {}", kind, key, e);
                self.prune(kind, &hash, true);
                None
            }
        }
    }

    fn prune(&self, kind: CacheKind, hash: &str, remove_file: bool) {
        if remove_file {
            let path = self.entry_path(kind, hash);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    error!("Failed to delete {}: {}", path.display(), e);
                }
            }
        }
        let mut index = self.index.lock();
        if index.remove(kind, hash).is_some() {
            let _ = self.persist(&index);
        }
    }

    /// Store `payload` under `key`. Returns `false` when the payload is
    /// rejected or anything fails on disk.
    pub fn set(&self, kind: CacheKind, key: &str, payload: &Payload) -> bool {
        match self.try_set(kind, key, payload) {
            Ok(()) => true,
            Err(CacheError::InvalidPayload(reason)) => {
                debug!("Not caching {}/{}: {}", kind, key, reason);
                false
            }
            Err(e) => {
                error!("Write failed for {}/{}: {}", kind, key, e);
                false
            }
        }
    }

    fn try_set(&self, kind: CacheKind, key: &str, payload: &Payload) -> CacheResult<()> {
        let bytes = entry::encode_payload(kind, payload)?;
        let hash = hash_key(key);
        let path = self.entry_path(kind, &hash);

        fs::write(&path, &bytes).map_err(|e| CacheError::io(&path, e))?;

        let record = IndexRecord {
            key: key.to_string(),
            timestamp: self.clock.now_millis(),
            file: kind.file_name(&hash),
        };

        let mut index = self.index.lock();
        index.insert(kind, hash, record);
        self.persist(&index)
    }

    /// Typed read of a JSON entry. A value that no longer fits `T` is a miss.
    pub fn get_json<T: DeserializeOwned>(&self, kind: CacheKind, key: &str) -> Option<T> {
        Self::typed(kind, key, self.get(kind, key)?)
    }

    /// Typed read of a JSON entry regardless of age.
    pub fn peek_json<T: DeserializeOwned>(&self, kind: CacheKind, key: &str) -> Option<T> {
        Self::typed(kind, key, self.peek(kind, key)?)
    }

    fn typed<T: DeserializeOwned>(kind: CacheKind, key: &str, cached: Cached) -> Option<T> {
        let value = cached.into_json()?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("Cached {}/{} has an unexpected shape: {}", kind, key, e);
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, kind: CacheKind, key: &str, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(json) => self.set(kind, key, &Payload::Json(json)),
            Err(e) => {
                error!("Could not serialize {}/{}: {}", kind, key, e);
                false
            }
        }
    }

    /// Remove one entry. Returns `false` if it did not exist or the index
    /// could not be saved.
    pub fn delete_one(&self, kind: CacheKind, key: &str) -> bool {
        let hash = hash_key(key);
        let mut index = self.index.lock();
        if !index.contains(kind, &hash) {
            return false;
        }

        let path = self.entry_path(kind, &hash);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                error!("Failed to delete cache entry {}/{}: {}", kind, key, e);
                return false;
            }
        }

        index.remove(kind, &hash);
        self.persist(&index).is_ok()
    }

    /// Delete entries older than the expiry window. Does nothing while
    /// offline so an offline session never loses its only copy. Returns the
    /// number of entries removed.
    pub fn clear_expired(&self) -> usize {
        if !self.connectivity.is_online() {
            debug!("Offline, keeping expired cache entries");
            return 0;
        }

        let now = self.clock.now_millis();
        let mut index = self.index.lock();

        let expired: Vec<(CacheKind, String)> = index
            .iter()
            .filter(|(_, _, record)| self.age_exceeds_expiry(record.timestamp, now))
            .map(|(kind, hash, _)| (kind, hash.to_string()))
            .collect();

        let mut cleared = 0;
        for (kind, hash) in expired {
            let path = self.entry_path(kind, &hash);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!("Failed to delete expired cache file {}: {}", path.display(), e);
                    continue;
                }
            }
            index.remove(kind, &hash);
            cleared += 1;
        }

        if cleared > 0 {
            let _ = self.persist(&index);
            info!("Cleared {} expired cache entries", cleared);
        }
        cleared
    }

    /// Delete every entry and reset the index.
    pub fn clear_all(&self) {
        let mut index = self.index.lock();
        for (kind, hash, _) in index.iter() {
            let path = self.entry_path(kind, hash);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    error!("Failed to delete cache file {}: {}", path.display(), e);
                }
            }
        }
        index.clear();
        let _ = self.persist(&index);
        info!("Cache cleared completely");
    }

    pub fn list_all_entries(&self) -> Vec<CacheEntryInfo> {
        self.index.lock().entries()
    }

    /// Size of the entry's file in bytes, 0 if there is none.
    pub fn entry_size(&self, kind: CacheKind, key: &str) -> u64 {
        let path = self.entry_path(kind, &hash_key(key));
        match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    error!("Failed to get file size of {}: {}", path.display(), e);
                }
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        let mut stats = CacheStats::default();
        for kind in CacheKind::ALL {
            let count = index.count(kind);
            if count > 0 {
                stats.kinds.insert(kind, count);
            }
        }
        stats.total = index.len();
        for (_, _, record) in index.iter() {
            let ts = record.timestamp;
            stats.oldest_entry = Some(stats.oldest_entry.map_or(ts, |o| o.min(ts)));
            stats.newest_entry = Some(stats.newest_entry.map_or(ts, |n| n.max(ts)));
        }
        stats
    }
}
