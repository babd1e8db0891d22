use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const META_FILE: &str = "_meta.json";
pub const DATA_FILE: &str = "data.dat";
pub const FILTER_FILE: &str = "bloom.dat";

/// Persisted description of a segment, stored as `<segment>/_meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: String,
    pub level: u16,
    pub min_key: String,
    pub max_key: String,
    pub record_count: u64,
    /// Nanoseconds since the UNIX epoch.
    pub created_at: u64,
}

impl SegmentMeta {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Encode("segment meta", e.into()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode("segment meta", io::Error::from(e)))
    }

    /// Whether `key` falls inside `[min_key, max_key]`.
    pub fn covers(&self, key: &str) -> bool {
        self.record_count > 0 && key >= self.min_key.as_str() && key <= self.max_key.as_str()
    }
}

/// Paths of the three files making up a segment.
#[derive(Debug, Clone)]
pub struct SegmentPaths {
    pub dir: PathBuf,
    pub meta: PathBuf,
    pub data: PathBuf,
    pub filter: PathBuf,
}

impl SegmentPaths {
    pub fn new(parent: &Path, id: &str) -> Self {
        let dir = parent.join(id);
        Self {
            meta: dir.join(META_FILE),
            data: dir.join(DATA_FILE),
            filter: dir.join(FILTER_FILE),
            dir,
        }
    }
}

/// Current wall-clock time in nanoseconds since the UNIX epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SegmentMeta {
        SegmentMeta {
            id: "7d1f4c5e-0a4b-4c55-9a38-9c1f1b2d3e4f".to_string(),
            level: 1,
            min_key: "001".to_string(),
            max_key: "999".to_string(),
            record_count: 3,
            created_at: 1_700_000_000_000_000_000,
        }
    }

    #[test]
    fn test_meta_json_roundtrip() {
        let original = meta();
        let bytes = original.encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();

        assert!(text.contains("\"min_key\": \"001\""));
        assert_eq!(SegmentMeta::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn test_covers() {
        let meta = meta();
        assert!(meta.covers("001"));
        assert!(meta.covers("500"));
        assert!(meta.covers("999"));
        assert!(!meta.covers("000"));
        assert!(!meta.covers("9990"));

        let empty = SegmentMeta {
            min_key: String::new(),
            max_key: String::new(),
            record_count: 0,
            ..meta
        };
        assert!(!empty.covers("a"));
    }

    #[test]
    fn test_segment_paths() {
        let paths = SegmentPaths::new(Path::new("/db/levels/level-0001"), "abc");
        assert_eq!(paths.dir, PathBuf::from("/db/levels/level-0001/abc"));
        assert_eq!(paths.meta, PathBuf::from("/db/levels/level-0001/abc/_meta.json"));
        assert_eq!(paths.data, PathBuf::from("/db/levels/level-0001/abc/data.dat"));
        assert_eq!(paths.filter, PathBuf::from("/db/levels/level-0001/abc/bloom.dat"));
    }
}
