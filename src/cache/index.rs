//! The durable `index.json` document.
//!
//! Shape on disk: `{ "<kind>": { "<hash>": { "key", "timestamp", "file" } } }`.
//! Payloads never live in the index. Every mutation rewrites the whole file
//! through a temp file and rename, so a crash leaves either the old or the
//! new document, never a torn one.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::entry::{CacheEntryInfo, CacheKind, IndexRecord};
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index {
    kinds: BTreeMap<CacheKind, BTreeMap<String, IndexRecord>>,
}

impl Index {
    /// Read the index, treating a missing or unreadable document as empty.
    pub fn load(path: &Path) -> Index {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(_) => return Index::default(),
        };
        match serde_json::from_slice(&content) {
            Ok(index) => index,
            Err(e) => {
                warn!("Cache index {} is unreadable, starting empty: {}", path.display(), e);
                Index::default()
            }
        }
    }

    /// Rewrite the whole document atomically.
    pub fn save(&self, path: &Path) -> CacheResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let json = serde_json::to_vec_pretty(self)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
        tmp.write_all(&json).map_err(|e| CacheError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| CacheError::io(path, e.error))?;
        Ok(())
    }

    pub fn get(&self, kind: CacheKind, hash: &str) -> Option<&IndexRecord> {
        self.kinds.get(&kind).and_then(|records| records.get(hash))
    }

    pub fn contains(&self, kind: CacheKind, hash: &str) -> bool {
        self.get(kind, hash).is_some()
    }

    pub fn insert(&mut self, kind: CacheKind, hash: String, record: IndexRecord) {
        self.kinds.entry(kind).or_default().insert(hash, record);
    }

    pub fn remove(&mut self, kind: CacheKind, hash: &str) -> Option<IndexRecord> {
        self.kinds.get_mut(&kind).and_then(|records| records.remove(hash))
    }

    pub fn clear(&mut self) {
        self.kinds.clear();
    }

    pub fn len(&self) -> usize {
        self.kinds.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, kind: CacheKind) -> usize {
        self.kinds.get(&kind).map_or(0, BTreeMap::len)
    }

    /// All records as `(kind, hash, record)`, ordered by kind then hash.
    pub fn iter(&self) -> impl Iterator<Item = (CacheKind, &str, &IndexRecord)> + '_ {
        self.kinds.iter().flat_map(|(kind, records)| {
            records
                .iter()
                .map(move |(hash, record)| (*kind, hash.as_str(), record))
        })
    }

    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        self.iter()
            .map(|(kind, hash, record)| CacheEntryInfo {
                kind,
                key: record.key.clone(),
                timestamp: record.timestamp,
                file: record.file.clone(),
                hash: hash.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &str, timestamp: i64) -> IndexRecord {
        IndexRecord {
            key: key.to_string(),
            timestamp,
            file: format!("{key}.json"),
        }
    }

    #[test]
    fn test_missing_and_corrupt_index_load_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        assert!(Index::load(&path).is_empty());

        fs::write(&path, "{ not json").unwrap();
        assert!(Index::load(&path).is_empty());

        fs::write(&path, r#"{"videos": {}}"#).unwrap();
        assert!(Index::load(&path).is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");

        let mut index = Index::default();
        index.insert(CacheKind::Lyrics, "aaa".into(), record("a", 1));
        index.insert(CacheKind::Metadata, "bbb".into(), record("b", 2));
        index.save(&path).unwrap();

        let loaded = Index::load(&path);
        assert_eq!(loaded, index);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.count(CacheKind::Lyrics), 1);
        assert_eq!(loaded.count(CacheKind::Images), 0);
    }

    #[test]
    fn test_document_shape() {
        let mut index = Index::default();
        index.insert(CacheKind::Images, "abc".into(), record("https://x/a.jpg", 7));
        let value = serde_json::to_value(&index).unwrap();
        assert_eq!(value["images"]["abc"]["key"], "https://x/a.jpg");
        assert_eq!(value["images"]["abc"]["timestamp"], 7);
        assert_eq!(value["images"]["abc"]["file"], "https://x/a.jpg.json");
    }

    #[test]
    fn test_remove_and_entries() {
        let mut index = Index::default();
        index.insert(CacheKind::Lyrics, "h1".into(), record("a", 1));
        index.insert(CacheKind::Lyrics, "h2".into(), record("b", 2));

        assert!(index.remove(CacheKind::Lyrics, "h1").is_some());
        assert!(index.remove(CacheKind::Lyrics, "h1").is_none());
        assert!(index.remove(CacheKind::Images, "h2").is_none());

        let entries = index.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hash, "h2");
        assert_eq!(entries[0].kind, CacheKind::Lyrics);
    }
}
