//! Read path of an immutable segment.
//!
//! A `Segment` owns its metadata, its bloom filter and one open handle on its
//! data file. The handle sits behind a mutex: every scan rewinds it to the
//! start of the file, so scans of the same segment serialize while lookups
//! against different segments proceed in parallel.

use std::fs;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::filter::BloomFilter;
use super::meta::{SegmentMeta, SegmentPaths};
use crate::error::{Error, Result};
use crate::store::lsm::codec::{Codec, DataReader};
use crate::store::lsm::record::{validate_key, Record};

pub struct Segment {
    meta: SegmentMeta,
    paths: SegmentPaths,
    filter: BloomFilter,
    codec: Arc<dyn Codec>,
    reader: Mutex<Option<BufReader<Box<dyn DataReader>>>>,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("meta", &self.meta)
            .field("dir", &self.paths.dir)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Segment {
    /// Opens the segment `id` stored under `parent`.
    ///
    /// Loads the metadata and the bloom filter, then opens the data file.
    pub fn open(parent: &Path, id: &str, codec: Arc<dyn Codec>) -> Result<Self> {
        let paths = SegmentPaths::new(parent, id);

        let meta = SegmentMeta::decode(&codec.read_all(&paths.meta)?)?;
        if meta.id != id {
            return Err(Error::Decode(
                "segment meta",
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("segment {} claims id {}", id, meta.id),
                ),
            ));
        }
        let filter = BloomFilter::from_bytes(&codec.read_all(&paths.filter)?)?;

        Self::from_parts(meta, filter, paths, codec)
    }

    pub(super) fn from_parts(
        meta: SegmentMeta,
        filter: BloomFilter,
        paths: SegmentPaths,
        codec: Arc<dyn Codec>,
    ) -> Result<Self> {
        let reader = codec.reader(&paths.data)?;
        Ok(Self {
            meta,
            paths,
            filter,
            codec,
            reader: Mutex::new(Some(BufReader::new(reader))),
        })
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn dir(&self) -> &Path {
        &self.paths.dir
    }

    pub fn is_closed(&self) -> bool {
        self.reader.lock().is_none()
    }

    /// Whether the segment may hold `key`. False positives are possible,
    /// false negatives are not.
    pub fn might_contain(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        if !self.meta.covers(key) {
            return Ok(false);
        }
        Ok(self.filter.may_contain(key.as_bytes()))
    }

    /// Looks up `key`, returning tombstones as found records.
    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        if !self.might_contain(key)? {
            return Ok(None);
        }

        let mut found = None;
        self.scan(|record| {
            if record.key.as_str() > key {
                return ControlFlow::Break(());
            }
            if record.key == key {
                found = Some(record);
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        })?;
        Ok(found)
    }

    /// Feeds every record, in key order, to `visitor` until it breaks or the
    /// data file ends.
    pub fn scan<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(Record) -> ControlFlow<()>,
    {
        let mut guard = self.reader.lock();
        let reader = guard.as_mut().ok_or_else(|| {
            Error::InvalidOperation(format!("segment {} is closed", self.meta.id))
        })?;
        reader.seek(SeekFrom::Start(0))?;

        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            let record = Record::decode(&line)?;
            if visitor(record).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Releases the data file handle. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        self.reader.lock().take();
        Ok(())
    }

    /// Closes the segment and removes its files.
    ///
    /// The metadata file goes first so a partial failure never leaves a
    /// discoverable segment. Every removal is attempted; the first error is
    /// returned.
    pub fn delete(&self) -> Result<()> {
        self.close()?;

        let mut first_err = None;
        for path in [&self.paths.meta, &self.paths.filter, &self.paths.data] {
            if let Err(e) = self.codec.remove(path) {
                tracing::warn!(segment = %self.meta.id, path = %path.display(), error = %e, "Failed to remove segment file");
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = fs::remove_dir(&self.paths.dir) {
            tracing::warn!(segment = %self.meta.id, error = %e, "Failed to remove segment directory");
            first_err.get_or_insert(Error::from(e));
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
