//! A level: an ordered set of segments plus persisted metadata.
//!
//! Level directories are named `level-NNNN` and hold a `_meta.json` listing
//! the live segment ids in insertion order together with the key range they
//! cover. Segments are searched newest first, so a later segment shadows an
//! earlier one holding the same key.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::codec::Codec;
use super::iterator::MergeIterator;
use super::record::{validate_key, Record};
use super::sstable::builder::SegmentBuilder;
use super::sstable::meta::META_FILE;
use super::sstable::table::Segment;
use crate::config::LsmConfig;
use crate::error::{Error, Result};

/// Persisted description of a level, stored as `<level>/_meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelMeta {
    pub level: u16,
    pub max_size: usize,
    pub min_key: Option<String>,
    pub max_key: Option<String>,
    pub table_ids: Vec<String>,
}

impl LevelMeta {
    fn new(level: u16, max_size: usize) -> Self {
        Self {
            level,
            max_size,
            min_key: None,
            max_key: None,
            table_ids: Vec::new(),
        }
    }

    fn covers(&self, key: &str) -> bool {
        match (&self.min_key, &self.max_key) {
            (Some(min), Some(max)) => key >= min.as_str() && key <= max.as_str(),
            _ => false,
        }
    }

    /// Re-derives ids and key range from `tables`.
    fn rebuild(&mut self, tables: &[Arc<Segment>]) {
        self.table_ids = tables.iter().map(|t| t.id().to_string()).collect();

        let live = tables.iter().map(|t| t.meta()).filter(|m| m.record_count > 0);
        self.min_key = live.clone().map(|m| m.min_key.clone()).min();
        self.max_key = live.map(|m| m.max_key.clone()).max();
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Encode("level meta", e.into()))
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode("level meta", e.into()))
    }
}

/// Directory of level `number` under `root`.
pub fn level_dir(root: &Path, number: u16) -> PathBuf {
    root.join(format!("level-{:04}", number))
}

struct LevelState {
    meta: LevelMeta,
    tables: Vec<Arc<Segment>>,
}

pub struct Level {
    number: u16,
    dir: PathBuf,
    codec: Arc<dyn Codec>,
    state: RwLock<LevelState>,
}

impl std::fmt::Debug for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Level")
            .field("number", &self.number)
            .field("dir", &self.dir)
            .field("meta", &self.state.read().meta)
            .finish()
    }
}

impl Level {
    /// Creates an empty level directory and persists its metadata.
    pub fn create(root: &Path, number: u16, max_size: usize, codec: Arc<dyn Codec>) -> Result<Self> {
        if number == 0 {
            return Err(Error::InvalidOperation("levels are numbered from 1".to_string()));
        }
        if max_size == 0 {
            return Err(Error::InvalidOperation("level capacity must be at least 1".to_string()));
        }

        let dir = level_dir(root, number);
        fs::create_dir_all(&dir)?;

        let meta = LevelMeta::new(number, max_size);
        codec.write_all(&dir.join(META_FILE), &meta.encode()?)?;

        tracing::info!(level = number, max_size, "Created level");

        Ok(Self {
            number,
            dir,
            codec,
            state: RwLock::new(LevelState {
                meta,
                tables: Vec::new(),
            }),
        })
    }

    /// Opens an existing level and every segment its metadata lists.
    ///
    /// Segment directories not listed in the metadata are leftovers of an
    /// interrupted flush or compaction and are removed.
    pub fn load(root: &Path, number: u16, codec: Arc<dyn Codec>) -> Result<Self> {
        let dir = level_dir(root, number);
        let meta = LevelMeta::decode(&codec.read_all(&dir.join(META_FILE))?)?;
        if meta.level != number {
            return Err(Error::InvalidState(format!(
                "directory {} holds level {}",
                dir.display(),
                meta.level
            )));
        }

        let mut tables = Vec::with_capacity(meta.table_ids.len());
        for id in &meta.table_ids {
            tables.push(Arc::new(Segment::open(&dir, id, codec.clone())?));
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if meta.table_ids.contains(&name) {
                continue;
            }
            tracing::warn!(level = number, segment = %name, "Removing orphan segment");
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                tracing::warn!(level = number, segment = %name, error = %e, "Failed to remove orphan segment");
            }
        }

        tracing::info!(level = number, tables = tables.len(), "Loaded level");

        Ok(Self {
            number,
            dir,
            codec,
            state: RwLock::new(LevelState { meta, tables }),
        })
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.state.read().tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().tables.is_empty()
    }

    pub fn meta(&self) -> LevelMeta {
        self.state.read().meta.clone()
    }

    pub fn table_ids(&self) -> Vec<String> {
        self.state.read().meta.table_ids.clone()
    }

    /// Creation time of the newest segment, if any.
    pub fn newest_created_at(&self) -> Option<u64> {
        self.state.read().tables.iter().map(|t| t.meta().created_at).max()
    }

    /// Whether the level holds `max_size` segments or more.
    pub fn full(&self) -> bool {
        let state = self.state.read();
        state.tables.len() >= state.meta.max_size
    }

    /// Looks `key` up in the segments, newest first.
    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        validate_key(key)?;

        let state = self.state.read();
        if !state.meta.covers(key) {
            return Ok(None);
        }
        for table in state.tables.iter().rev() {
            if let Some(record) = table.get(key)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Appends `segment` as the newest table and persists the metadata.
    pub fn add_table(&self, segment: Arc<Segment>) -> Result<()> {
        let mut state = self.state.write();

        let mut tables = state.tables.clone();
        tables.push(segment);
        let mut meta = state.meta.clone();
        meta.rebuild(&tables);
        self.persist(&meta)?;

        state.meta = meta;
        state.tables = tables;
        Ok(())
    }

    /// Merges every segment of the level into one segment for the next level,
    /// written under `output_dir`.
    ///
    /// Returns the new segment and the ids it supersedes. The sources are left
    /// in place; the caller deletes them once the output is registered.
    pub fn compact(&self, output_dir: &Path, config: &LsmConfig) -> Result<(Segment, Vec<String>)> {
        let snapshot: Vec<Arc<Segment>> = self.state.read().tables.clone();
        if snapshot.is_empty() {
            return Err(Error::EmptyLevel(self.number));
        }

        let ids: Vec<String> = snapshot.iter().map(|t| t.id().to_string()).collect();
        let newest = snapshot
            .iter()
            .map(|t| t.meta().created_at)
            .max()
            .unwrap_or_default();

        tracing::info!(
            level = self.number,
            target_level = self.number + 1,
            tables = ids.len(),
            "Starting level compaction"
        );

        let mut builder = SegmentBuilder::setup(output_dir, self.number + 1, config, self.codec.clone())?;
        builder.not_before(newest.saturating_add(1));

        let merge = MergeIterator::new(snapshot, config.scan_buffer)?;
        for record in merge {
            builder.add(&record?)?;
        }
        let segment = builder.finish()?;

        tracing::info!(
            level = self.number,
            segment = %segment.id(),
            records = segment.meta().record_count,
            "Finished level compaction"
        );

        Ok((segment, ids))
    }

    /// Removes the segments named in `ids` from the level and from disk.
    ///
    /// The metadata is persisted before any file is removed. Every segment is
    /// deleted even if an earlier one fails; the first error is returned.
    pub fn delete_tables(&self, ids: &[String]) -> Result<()> {
        let removed = {
            let mut state = self.state.write();

            let (removed, kept): (Vec<_>, Vec<_>) = state
                .tables
                .iter()
                .cloned()
                .partition(|t| ids.iter().any(|id| id == t.id()));
            let mut meta = state.meta.clone();
            meta.rebuild(&kept);
            self.persist(&meta)?;

            state.meta = meta;
            state.tables = kept;
            removed
        };

        let mut first_err = None;
        for table in removed {
            if let Err(e) = table.delete() {
                tracing::warn!(level = self.number, segment = %table.id(), error = %e, "Failed to delete segment");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes every segment of the level.
    pub fn close(&self) -> Result<()> {
        let state = self.state.read();
        let mut first_err = None;
        for table in &state.tables {
            if let Err(e) = table.close() {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn persist(&self, meta: &LevelMeta) -> Result<()> {
        self.codec.write_all(&self.dir.join(META_FILE), &meta.encode()?)
    }
}
