//! Construction of new segments.
//!
//! The builder writes a data file from records presented in non-decreasing
//! key order (memtable flush and compaction both guarantee it), collecting the
//! bloom filter and key range as it goes. `finish` persists data, then filter,
//! then metadata; since segments are discovered through their metadata file, a
//! crash part way through never exposes an incomplete segment.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use super::filter::BloomFilter;
use super::meta::{now_nanos, SegmentMeta, SegmentPaths};
use super::table::Segment;
use crate::config::LsmConfig;
use crate::error::{Error, Result};
use crate::store::lsm::codec::{Codec, DataWriter};
use crate::store::lsm::record::{validate_key, Record};

pub struct SegmentBuilder {
    id: String,
    level: u16,
    paths: SegmentPaths,
    codec: Arc<dyn Codec>,
    writer: Option<Box<dyn DataWriter>>,
    filter: BloomFilter,
    min_key: String,
    max_key: String,
    count: u64,
    created_at: u64,
    finished: bool,
}

impl SegmentBuilder {
    /// Allocates a fresh segment directory under `dir` and opens its data file.
    pub fn setup(dir: &Path, level: u16, config: &LsmConfig, codec: Arc<dyn Codec>) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let paths = SegmentPaths::new(dir, &id);
        fs::create_dir_all(&paths.dir)?;

        let writer = match codec.writer(&paths.data) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = fs::remove_dir_all(&paths.dir);
                return Err(e);
            }
        };

        tracing::debug!(segment = %id, level, "Building segment");

        Ok(Self {
            id,
            level,
            paths,
            codec,
            writer: Some(writer),
            filter: BloomFilter::new(config.filter_capacity, config.filter_fp_rate),
            min_key: String::new(),
            max_key: String::new(),
            count: 0,
            created_at: now_nanos(),
            finished: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of records added so far.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Guarantees the segment's creation timestamp is at least `timestamp`.
    pub fn not_before(&mut self, timestamp: u64) {
        self.created_at = self.created_at.max(timestamp);
    }

    /// Appends a record. Records must arrive in non-decreasing key order.
    pub fn add(&mut self, record: &Record) -> Result<()> {
        validate_key(&record.key)?;
        let writer = self.writer.as_mut().ok_or_else(|| {
            Error::InvalidOperation(format!("segment {} is already finished", self.id))
        })?;
        record.encode_into(writer)?;

        self.filter.insert(record.key.as_bytes());
        if self.count == 0 || record.key < self.min_key {
            self.min_key = record.key.clone();
        }
        if self.count == 0 || record.key > self.max_key {
            self.max_key = record.key.clone();
        }
        self.count += 1;
        Ok(())
    }

    /// Persists data, filter and metadata, in that order, and opens the result.
    pub fn finish(mut self) -> Result<Segment> {
        let mut writer = self.writer.take().ok_or_else(|| {
            Error::InvalidOperation(format!("segment {} is already finished", self.id))
        })?;
        writer.sync()?;
        drop(writer);

        self.codec
            .write_all(&self.paths.filter, &self.filter.to_bytes())?;

        let meta = SegmentMeta {
            id: self.id.clone(),
            level: self.level,
            min_key: std::mem::take(&mut self.min_key),
            max_key: std::mem::take(&mut self.max_key),
            record_count: self.count,
            created_at: self.created_at,
        };
        self.codec.write_all(&self.paths.meta, &meta.encode()?)?;
        self.finished = true;

        tracing::debug!(
            segment = %meta.id,
            level = meta.level,
            records = meta.record_count,
            "Finished segment"
        );

        let filter = std::mem::replace(&mut self.filter, BloomFilter::new(1, 0.5));
        Segment::from_parts(meta, filter, self.paths.clone(), self.codec.clone())
    }
}

impl Drop for SegmentBuilder {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abandoned or failed build: nothing references this directory.
        self.writer.take();
        if let Err(e) = fs::remove_dir_all(&self.paths.dir) {
            tracing::warn!(segment = %self.id, error = %e, "Failed to remove unfinished segment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::lsm::codec::FileCodec;
    use serde_json::json;
    use std::ops::ControlFlow;
    use tempfile::TempDir;

    fn config() -> LsmConfig {
        LsmConfig::default().filter_capacity(1_000)
    }

    fn record(key: &str, value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => Record::new(key, map),
            _ => panic!("expected a JSON object"),
        }
    }

    #[test]
    fn test_build_segment() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut builder = SegmentBuilder::setup(dir.path(), 1, &config(), Arc::new(FileCodec))
            .expect("Failed to set up builder");

        let records = vec![
            record("001", json!({"foo": 2.5})),
            Record::tombstone("002"),
            record("999", json!({"baz": true})),
        ];
        for r in &records {
            builder.add(r).expect("Failed to add record");
        }
        let id = builder.id().to_string();
        let segment = builder.finish().expect("Failed to finish builder");

        let meta = segment.meta();
        assert_eq!(meta.id, id);
        assert_eq!(meta.level, 1);
        assert_eq!(meta.min_key, "001");
        assert_eq!(meta.max_key, "999");
        assert_eq!(meta.record_count, 3);

        for r in &records {
            assert!(segment.might_contain(&r.key).unwrap());
        }

        let mut scanned = Vec::new();
        segment
            .scan(|r| {
                scanned.push(r);
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(scanned, records);

        let paths = SegmentPaths::new(dir.path(), &id);
        assert!(paths.meta.exists());
        assert!(paths.data.exists());
        assert!(paths.filter.exists());
    }

    #[test]
    fn test_extremes_match_input() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut builder =
            SegmentBuilder::setup(dir.path(), 2, &config(), Arc::new(FileCodec)).unwrap();

        for i in 0..250 {
            builder.add(&Record::tombstone(format!("key_{:04}", i))).unwrap();
        }
        assert_eq!(builder.len(), 250);
        let segment = builder.finish().unwrap();

        assert_eq!(segment.meta().min_key, "key_0000");
        assert_eq!(segment.meta().max_key, "key_0249");
        assert_eq!(segment.meta().record_count, 250);
    }

    #[test]
    fn test_not_before_raises_timestamp() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut builder =
            SegmentBuilder::setup(dir.path(), 1, &config(), Arc::new(FileCodec)).unwrap();
        builder.not_before(u64::MAX - 1);
        builder.add(&Record::tombstone("k")).unwrap();

        let segment = builder.finish().unwrap();
        assert_eq!(segment.meta().created_at, u64::MAX - 1);
    }

    #[test]
    fn test_empty_key_rejected() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut builder =
            SegmentBuilder::setup(dir.path(), 1, &config(), Arc::new(FileCodec)).unwrap();

        assert!(matches!(
            builder.add(&Record::tombstone("")),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_dropped_builder_leaves_nothing() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut builder =
            SegmentBuilder::setup(dir.path(), 1, &config(), Arc::new(FileCodec)).unwrap();
        builder.add(&Record::tombstone("k")).unwrap();
        let seg_dir = dir.path().join(builder.id());
        assert!(seg_dir.exists());

        drop(builder);
        assert!(!seg_dir.exists());
    }
}
