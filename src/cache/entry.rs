//! Cache entry definitions: content kinds, payloads and index records.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};

/// Length of the hex digest used as the on-disk file stem.
pub const HASH_LEN: usize = 32;

/// Prefix of every image value handed back by the cache.
pub const IMAGE_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Content category of a cache entry. Decides the sub-directory, the file
/// extension and how the payload is encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Images,
    Lyrics,
    Metadata,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [CacheKind::Images, CacheKind::Lyrics, CacheKind::Metadata];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::Images => "images",
            CacheKind::Lyrics => "lyrics",
            CacheKind::Metadata => "metadata",
        }
    }

    /// Sub-directory of the cache root holding this kind's files.
    pub fn dir_name(self) -> &'static str {
        self.as_str()
    }

    pub fn extension(self) -> &'static str {
        match self {
            CacheKind::Images => "jpg",
            CacheKind::Lyrics | CacheKind::Metadata => "json",
        }
    }

    pub fn file_name(self, hash: &str) -> String {
        format!("{}.{}", hash, self.extension())
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown cache kind '{0}' (expected images, lyrics or metadata)")]
pub struct UnknownKind(String);

impl FromStr for CacheKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "images" | "image" => Ok(CacheKind::Images),
            "lyrics" => Ok(CacheKind::Lyrics),
            "metadata" => Ok(CacheKind::Metadata),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A value offered to [`crate::cache::UnifiedCache::set`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw image bytes.
    Bytes(Vec<u8>),
    /// A `data:image/...;base64,...` URI.
    DataUri(String),
    /// Structured data: lyrics records and provider metadata.
    Json(Value),
}

/// A value read back from the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached {
    /// Image bytes re-encoded as a base64 data URI.
    Image(String),
    Json(Value),
}

impl Cached {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Cached::Json(value) => Some(value),
            Cached::Image(_) => None,
        }
    }

    pub fn into_image(self) -> Option<String> {
        match self {
            Cached::Image(uri) => Some(uri),
            Cached::Json(_) => None,
        }
    }
}

/// Metadata kept in the index for each stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub key: String,
    /// Write time, epoch milliseconds.
    pub timestamp: i64,
    pub file: String,
}

/// Flattened view of one entry, for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntryInfo {
    #[serde(rename = "type")]
    pub kind: CacheKind,
    pub key: String,
    pub timestamp: i64,
    pub file: String,
    pub hash: String,
}

/// Deterministic file stem for a lookup key: SHA-256, hex, truncated.
pub fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_LEN);
    hex
}

/// Encode image bytes the way the cache hands them out.
pub fn image_data_uri(bytes: &[u8]) -> String {
    format!("{}{}", IMAGE_DATA_URI_PREFIX, STANDARD.encode(bytes))
}

/// Decode the base64 segment of an image data URI.
pub fn decode_image_data_uri(uri: &str) -> CacheResult<Vec<u8>> {
    if !uri.starts_with("data:image") {
        return Err(CacheError::InvalidPayload("not an image data URI"));
    }
    let (_, data) = uri
        .split_once(',')
        .ok_or(CacheError::InvalidPayload("data URI without a payload"))?;
    Ok(STANDARD.decode(data.trim())?)
}

/// JSON values the cache refuses to store: null, false, zero and "".
pub(crate) fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Turn a payload into the bytes written to disk for `kind`.
pub(crate) fn encode_payload(kind: CacheKind, payload: &Payload) -> CacheResult<Vec<u8>> {
    match (kind, payload) {
        (CacheKind::Images, Payload::Bytes(bytes)) => {
            if bytes.is_empty() {
                return Err(CacheError::InvalidPayload("empty image"));
            }
            Ok(bytes.clone())
        }
        (CacheKind::Images, Payload::DataUri(uri)) => {
            let bytes = decode_image_data_uri(uri)?;
            if bytes.is_empty() {
                return Err(CacheError::InvalidPayload("empty image"));
            }
            Ok(bytes)
        }
        (CacheKind::Images, Payload::Json(_)) => {
            Err(CacheError::InvalidPayload("images must be bytes or a data URI"))
        }
        (CacheKind::Lyrics | CacheKind::Metadata, Payload::Json(value)) => {
            if is_falsy(value) {
                return Err(CacheError::InvalidPayload("empty value"));
            }
            Ok(serde_json::to_vec_pretty(value)?)
        }
        (CacheKind::Lyrics | CacheKind::Metadata, _) => {
            Err(CacheError::InvalidPayload("structured entries must be JSON"))
        }
    }
}

/// Turn file contents back into the value handed to callers.
pub(crate) fn decode_payload(kind: CacheKind, bytes: &[u8]) -> CacheResult<Cached> {
    match kind {
        CacheKind::Images => Ok(Cached::Image(image_data_uri(bytes))),
        CacheKind::Lyrics | CacheKind::Metadata => Ok(Cached::Json(serde_json::from_slice(bytes)?)),
    }
}

/// The value a freshly stored payload reads back as.
pub(crate) fn payload_as_cached(payload: Payload) -> CacheResult<Cached> {
    match payload {
        Payload::Bytes(bytes) => Ok(Cached::Image(image_data_uri(&bytes))),
        Payload::DataUri(uri) => Ok(Cached::Image(image_data_uri(&decode_image_data_uri(&uri)?))),
        Payload::Json(value) => Ok(Cached::Json(value)),
    }
}
