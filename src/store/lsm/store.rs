use super::{
    super::Store,
    codec::{Codec, FileCodec},
    compaction,
    level::Level,
    memtable::Memtable,
    metrics::{self, TreeMetrics},
    record::{validate_key, Document, Record},
    sstable::meta::{now_nanos, META_FILE},
    wal::WriteAheadLog,
};

use crate::{
    config::LsmConfig,
    error::{Error, Result},
    flock::DirLock,
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

const LEVELS_DIR: &str = "levels";

/// Persisted description of the tree, stored as `<root>/_meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMeta {
    /// Number of level directories to load on open.
    pub levels: u16,
    /// Nanoseconds since the UNIX epoch.
    pub created_at: u64,
}

/// The active memtable and the one being flushed, swapped together.
pub(crate) struct Memtables {
    pub(crate) active: Arc<Memtable>,
    pub(crate) frozen: Option<Arc<Memtable>>,
}

/// LSM tree with interior mutability
pub struct LsmTree {
    pub(crate) config: LsmConfig,
    pub(crate) codec: Arc<dyn Codec>,
    wal: Option<Arc<dyn WriteAheadLog>>,
    lock: Mutex<Option<DirLock>>,

    pub(crate) memtables: RwLock<Memtables>,
    pub(crate) levels: RwLock<Vec<Arc<Level>>>,
    pub(crate) meta: Mutex<TreeMeta>,
    /// Serializes compaction cycles and flushes.
    pub(crate) compaction: Mutex<()>,
    closed: AtomicBool,
}

impl LsmTree {
    /// Opens the tree at `config.dir`, creating it if needed.
    pub fn open(config: LsmConfig) -> Result<Self> {
        Self::open_with_codec(config, Arc::new(FileCodec))
    }

    /// Opens the tree, routing every persisted byte through `codec`.
    pub fn open_with_codec(config: LsmConfig, codec: Arc<dyn Codec>) -> Result<Self> {
        if config.memtable_capacity == 0 || config.level_capacity == 0 {
            return Err(Error::InvalidOperation(
                "memtable and level capacities must be at least 1".to_string(),
            ));
        }

        let levels_dir = config.dir.join(LEVELS_DIR);
        fs::create_dir_all(&levels_dir)?;

        let lock = DirLock::acquire(&config.dir)?;

        let meta_path = config.dir.join(META_FILE);
        let (meta, levels) = match codec.read_all(&meta_path) {
            Ok(bytes) => {
                let meta: TreeMeta = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Decode("tree meta", e.into()))?;
                let mut levels = Vec::with_capacity(meta.levels as usize);
                for number in 1..=meta.levels {
                    levels.push(Arc::new(Level::load(&levels_dir, number, codec.clone())?));
                }
                (meta, levels)
            }
            Err(Error::NotFound(_)) => {
                let meta = TreeMeta {
                    levels: 0,
                    created_at: now_nanos(),
                };
                codec.write_all(&meta_path, &encode_meta(&meta)?)?;
                (meta, Vec::new())
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            dir = %config.dir.display(),
            levels = levels.len(),
            "Opened LSM tree"
        );

        Ok(Self {
            memtables: RwLock::new(Memtables {
                active: Arc::new(Memtable::new(config.memtable_capacity)),
                frozen: None,
            }),
            levels: RwLock::new(levels),
            meta: Mutex::new(meta),
            compaction: Mutex::new(()),
            closed: AtomicBool::new(false),
            lock: Mutex::new(Some(lock)),
            wal: None,
            codec,
            config,
        })
    }

    /// Attaches a write-ahead log and replays it into the active memtable.
    pub fn with_wal(mut self, wal: Arc<dyn WriteAheadLog>) -> Result<Self> {
        let records = wal.replay()?;
        let replayed = records.len();
        {
            let memtables = self.memtables.read();
            for record in records {
                memtables.active.put(record)?;
            }
        }
        tracing::info!(records = replayed, "Replayed write-ahead log");

        self.wal = Some(wal);
        Ok(self)
    }

    pub fn config(&self) -> &LsmConfig {
        &self.config
    }

    /// Looks `key` up in the memtables, then in levels 1..N.
    ///
    /// The first record found wins, so a tombstone hides older values and is
    /// returned as is.
    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        validate_key(key)?;
        self.ensure_open()?;

        let (active, frozen) = {
            let memtables = self.memtables.read();
            (memtables.active.clone(), memtables.frozen.clone())
        };
        if let Some(record) = active.get(key) {
            return Ok(Some(record));
        }
        if let Some(record) = frozen.and_then(|m| m.get(key)) {
            return Ok(Some(record));
        }

        // Held for the whole walk: a level appended mid-lookup could receive
        // records moved out of a level already searched.
        let levels = self.levels.read();
        for level in levels.iter() {
            if let Some(record) = level.get(key)? {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    /// Writes `record` to the log (if any), then to the active memtable.
    pub fn put(&self, record: Record) -> Result<()> {
        validate_key(&record.key)?;
        self.ensure_open()?;

        if let Some(wal) = &self.wal {
            wal.append(&record)?;
        }

        loop {
            let active = self.memtables.read().active.clone();
            match active.put(record.clone()) {
                Ok(()) => return Ok(()),
                // Swapped out by a flush, retry against the new memtable.
                Err(Error::Frozen) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Records a tombstone for `key`.
    pub fn del(&self, key: &str) -> Result<()> {
        self.put(Record::tombstone(key))
    }

    /// Stores `value` under a freshly generated key and returns the key.
    pub fn insert(&self, value: Document) -> Result<String> {
        let record = Record::generate(self.config.source_id, value);
        let key = record.key.clone();
        self.put(record)?;
        Ok(key)
    }

    /// Runs one compaction cycle: grow, cascade full levels, flush a full
    /// memtable.
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        compaction::compact(self)
    }

    /// Flushes the active memtable into level 1 regardless of its size.
    pub fn force_flush(&self) -> Result<bool> {
        self.ensure_open()?;
        compaction::force_flush(self)
    }

    pub fn level_count(&self) -> usize {
        self.levels.read().len()
    }

    pub fn metrics(&self) -> TreeMetrics {
        metrics::snapshot(self)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flushes both memtables into level 1, closes every segment and the log,
    /// then releases the directory lock. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Let a running compaction finish first.
        let _guard = self.compaction.lock();

        let mut first_err = None;
        if let Err(e) = compaction::drain_memtables(self) {
            tracing::error!(error = %e, "Failed to flush memtables on close");
            first_err = Some(e);
        }
        for level in self.levels.read().iter() {
            if let Err(e) = level.close() {
                first_err.get_or_insert(e);
            }
        }
        if let Some(wal) = &self.wal {
            if let Err(e) = wal.close() {
                first_err.get_or_insert(e);
            }
        }
        self.lock.lock().take();

        tracing::info!(dir = %self.config.dir.display(), "Closed LSM tree");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn levels_dir(&self) -> PathBuf {
        self.config.dir.join(LEVELS_DIR)
    }

    pub(crate) fn persist_meta(&self, meta: &TreeMeta) -> Result<()> {
        self.codec
            .write_all(&self.config.dir.join(META_FILE), &encode_meta(meta)?)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidOperation("tree is closed".to_string()));
        }
        Ok(())
    }
}

fn encode_meta(meta: &TreeMeta) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(meta).map_err(|e| Error::Encode("tree meta", e.into()))
}

impl Drop for LsmTree {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close LSM tree");
        }
    }
}

impl Store for LsmTree {
    fn get(&self, key: &str) -> Result<Option<Record>> {
        LsmTree::get(self, key)
    }

    fn put(&self, record: Record) -> Result<()> {
        LsmTree::put(self, record)
    }

    fn del(&self, key: &str) -> Result<()> {
        LsmTree::del(self, key)
    }

    fn close(&self) -> Result<()> {
        LsmTree::close(self)
    }
}
