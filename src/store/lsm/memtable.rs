//! Memtable implementation using a concurrent skip list.
//!
//! The memtable is the in-memory write buffer sitting in front of the on-disk
//! levels. A single `crossbeam-skiplist::SkipMap` serves both point lookups
//! and ordered iteration, so a flush is a straight walk of the map into a
//! segment builder.
//!
//! # Lifecycle
//!
//! 1. **Active**: accepts puts and deletes until it holds `capacity` records
//! 2. **Frozen**: read-only, waiting to be flushed
//! 3. **Flushed**: written to a level 1 segment and dropped
//!
//! # Freeze Semantics
//!
//! Writers hold the shared side of an `RwLock<bool>` for the whole insert and
//! `freeze` takes the exclusive side. Once `freeze` returns, no write is in
//! flight and every later write fails with [`Error::Frozen`], so the flushed
//! segment contains exactly what the memtable held.

use std::path::Path;
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;

use super::codec::Codec;
use super::record::{validate_key, Record};
use super::sstable::builder::SegmentBuilder;
use super::sstable::table::Segment;
use crate::config::LsmConfig;
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Memtable {
    data: SkipMap<String, Record>,
    frozen: RwLock<bool>,
    capacity: usize,
}

impl Memtable {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: SkipMap::new(),
            frozen: RwLock::new(false),
            capacity,
        }
    }

    /// Returns the record stored under `key`, tombstones included.
    pub fn get(&self, key: &str) -> Option<Record> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Inserts or replaces the record under its key.
    pub fn put(&self, record: Record) -> Result<()> {
        validate_key(&record.key)?;

        let frozen = self.frozen.read();
        if *frozen {
            return Err(Error::Frozen);
        }
        self.data.insert(record.key.clone(), record);
        Ok(())
    }

    /// Records a tombstone for `key`.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.put(Record::tombstone(key))
    }

    /// Whether the memtable reached its record capacity.
    pub fn full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Stops accepting writes. Freezing twice is a no-op.
    pub fn freeze(&self) {
        *self.frozen.write() = true;
    }

    pub fn is_frozen(&self) -> bool {
        *self.frozen.read()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Snapshot of every record in key order.
    pub fn records(&self) -> Vec<Record> {
        self.data.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Writes the frozen memtable into a new segment under `dir`, stamped no
    /// earlier than `not_before`.
    pub fn flush(
        &self,
        dir: &Path,
        level: u16,
        config: &LsmConfig,
        codec: Arc<dyn Codec>,
        not_before: u64,
    ) -> Result<Segment> {
        if !self.is_frozen() {
            return Err(Error::InvalidState(
                "memtable must be frozen before flush".to_string(),
            ));
        }

        let mut builder = SegmentBuilder::setup(dir, level, config, codec)?;
        builder.not_before(not_before);
        for entry in self.data.iter() {
            builder.add(entry.value())?;
        }
        builder.finish()
    }
}
