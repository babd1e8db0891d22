//! Leveled compaction and memtable flushing.
//!
//! One call to [`compact`] walks the tree through a fixed sequence:
//!
//! 1. **Grow**: when the tree has no level yet, or its last level is full, a
//!    new empty level is appended so full levels always have somewhere to go.
//! 2. **Cascade**: from the second-to-last level down to level 1, every full
//!    level is merged into a single segment that becomes the newest segment of
//!    the next level; the merged sources are then deleted. Walking bottom-up
//!    makes room in a level before the level above spills into it.
//! 3. **Flush**: a full active memtable is swapped out, frozen and written as
//!    the newest segment of level 1.
//!
//! The whole sequence runs under the tree's compaction mutex. Readers are
//! never blocked for longer than a metadata update: a compaction output is
//! registered in the next level before its sources disappear from the level
//! above, and a flushed memtable stays readable until its segment is live.

use std::sync::Arc;

use super::level::Level;
use super::memtable::Memtable;
use super::store::LsmTree;
use crate::error::{Error, Result};

/// Runs one full compaction cycle.
pub(crate) fn compact(tree: &LsmTree) -> Result<()> {
    let _guard = tree.compaction.lock();

    let grow = {
        let levels = tree.levels.read();
        levels.last().map_or(true, |last| last.full())
    };
    if grow {
        add_level(tree)?;
    }

    let levels: Vec<Arc<Level>> = tree.levels.read().clone();
    for i in (0..levels.len().saturating_sub(1)).rev() {
        if levels[i].full() {
            compact_level(tree, &levels[i], &levels[i + 1])?;
        }
    }

    flush_memtable(tree, false)?;
    Ok(())
}

/// Flushes the active memtable even when it is not full.
///
/// Returns whether a segment was written.
pub(crate) fn force_flush(tree: &LsmTree) -> Result<bool> {
    let _guard = tree.compaction.lock();

    if tree.levels.read().is_empty() {
        add_level(tree)?;
    }
    flush_memtable(tree, true)
}

/// Writes both memtables out, the frozen one first, so nothing buffered is
/// lost when the tree closes. The caller holds the compaction mutex.
pub(crate) fn drain_memtables(tree: &LsmTree) -> Result<()> {
    let pending = {
        let memtables = tree.memtables.read();
        memtables.frozen.is_some() || !memtables.active.is_empty()
    };
    if !pending {
        return Ok(());
    }

    if tree.levels.read().is_empty() {
        add_level(tree)?;
    }
    while flush_memtable(tree, true)? {}
    Ok(())
}

fn add_level(tree: &LsmTree) -> Result<()> {
    let mut levels = tree.levels.write();
    let number = u16::try_from(levels.len() + 1)
        .map_err(|_| Error::InvalidState("level count exceeds u16".to_string()))?;

    let level = Level::create(
        &tree.levels_dir(),
        number,
        tree.config.level_capacity,
        tree.codec.clone(),
    )?;

    let mut meta = tree.meta.lock();
    let mut updated = meta.clone();
    updated.levels = number;
    tree.persist_meta(&updated)?;
    *meta = updated;

    levels.push(Arc::new(level));
    Ok(())
}

fn compact_level(tree: &LsmTree, source: &Level, target: &Level) -> Result<()> {
    let (segment, ids) = source.compact(target.dir(), &tree.config)?;
    let records = segment.meta().record_count;

    target.add_table(Arc::new(segment))?;
    source.delete_tables(&ids)?;

    tracing::info!(
        source_level = source.number(),
        target_level = target.number(),
        merged_tables = ids.len(),
        records,
        "Compacted level"
    );
    Ok(())
}

/// Swaps out and flushes the active memtable into level 1.
///
/// A frozen memtable left behind by an earlier failed flush is retried
/// before a new one is frozen.
fn flush_memtable(tree: &LsmTree, force: bool) -> Result<bool> {
    let frozen = {
        let mut memtables = tree.memtables.write();
        match &memtables.frozen {
            Some(frozen) => frozen.clone(),
            None => {
                let active = &memtables.active;
                if active.is_empty() || !(force || active.full()) {
                    return Ok(false);
                }
                let fresh = Arc::new(Memtable::new(tree.config.memtable_capacity));
                let old = std::mem::replace(&mut memtables.active, fresh);
                old.freeze();
                memtables.frozen = Some(old.clone());
                old
            }
        }
    };

    let level = tree
        .levels
        .read()
        .first()
        .cloned()
        .ok_or_else(|| Error::InvalidState("no level to flush into".to_string()))?;

    // Strictly newer than anything already in level 1, whatever the clock says.
    let not_before = level.newest_created_at().map_or(0, |t| t.saturating_add(1));
    let segment = frozen.flush(
        level.dir(),
        level.number(),
        &tree.config,
        tree.codec.clone(),
        not_before,
    )?;
    let (id, records) = (segment.id().to_string(), segment.meta().record_count);
    level.add_table(Arc::new(segment))?;

    tree.memtables.write().frozen = None;

    tracing::info!(segment = %id, records, "Flushed memtable");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LsmConfig;
    use crate::store::lsm::codec::tests::FailingCodec;
    use crate::store::lsm::level::level_dir;
    use crate::store::lsm::record::Record;
    use crate::store::lsm::sstable::builder::SegmentBuilder;
    use crate::store::lsm::sstable::meta::now_nanos;
    use serde_json::json;
    use tempfile::TempDir;

    fn config(dir: &TempDir, memtable: usize, level: usize) -> LsmConfig {
        LsmConfig::new(dir.path())
            .memtable_capacity(memtable)
            .level_capacity(level)
            .filter_capacity(1_000)
    }

    fn open(dir: &TempDir, memtable: usize, level: usize) -> LsmTree {
        LsmTree::open(config(dir, memtable, level)).expect("Failed to open tree")
    }

    fn fill(tree: &LsmTree, prefix: &str, n: usize) {
        for i in 0..n {
            tree.put(Record::tombstone(format!("{}{:03}", prefix, i))).unwrap();
        }
    }

    fn table_counts(tree: &LsmTree) -> Vec<usize> {
        tree.levels.read().iter().map(|l| l.len()).collect()
    }

    #[test]
    fn test_first_compaction_creates_level() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let tree = open(&dir, 4, 2);
        assert_eq!(tree.level_count(), 0);

        compact(&tree).unwrap();
        assert_eq!(tree.level_count(), 1);
        assert!(dir.path().join("levels").join("level-0001").join("_meta.json").exists());

        // Nothing to flush yet.
        assert_eq!(table_counts(&tree), vec![0]);
    }

    #[test]
    fn test_full_memtable_is_flushed() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let tree = open(&dir, 4, 2);

        fill(&tree, "a", 3);
        compact(&tree).unwrap();
        assert_eq!(table_counts(&tree), vec![0]);

        fill(&tree, "b", 1);
        compact(&tree).unwrap();
        assert_eq!(table_counts(&tree), vec![1]);
        assert!(tree.memtables.read().active.is_empty());
        assert!(tree.memtables.read().frozen.is_none());
    }

    #[test]
    fn test_cascade_through_levels() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let tree = open(&dir, 2, 2);

        // Two flushes fill level 1.
        fill(&tree, "a", 2);
        compact(&tree).unwrap();
        fill(&tree, "b", 2);
        compact(&tree).unwrap();
        assert_eq!(table_counts(&tree), vec![2]);

        // Level 1 is the last level and full: grow, then merge it down.
        compact(&tree).unwrap();
        assert_eq!(table_counts(&tree), vec![0, 1]);

        for key in ["a000", "a001", "b000", "b001"] {
            assert!(tree.get(key).unwrap().unwrap().is_tombstone());
        }
    }

    #[test]
    fn test_force_flush() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let tree = open(&dir, 100, 2);

        assert!(!force_flush(&tree).unwrap());
        assert_eq!(tree.level_count(), 1);

        fill(&tree, "k", 3);
        assert!(force_flush(&tree).unwrap());
        assert_eq!(table_counts(&tree), vec![1]);
        assert!(tree.get("k001").unwrap().is_some());
    }

    #[test]
    fn test_drain_memtables_on_empty_tree_is_noop() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let tree = open(&dir, 4, 2);

        let _guard = tree.compaction.lock();
        drain_memtables(&tree).unwrap();
        assert_eq!(tree.level_count(), 0);
    }

    #[test]
    fn test_failed_compaction_and_flush_lose_nothing() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let codec = FailingCodec::default();
        let tree = LsmTree::open_with_codec(config(&dir, 2, 2), Arc::new(codec.clone())).unwrap();

        fill(&tree, "a", 2);
        compact(&tree).unwrap();
        fill(&tree, "b", 2);
        compact(&tree).unwrap();
        assert_eq!(table_counts(&tree), vec![2]);

        // Merging level 1 into the new level 2 dies while writing the filter.
        codec.fail_on("bloom.dat");
        fill(&tree, "c", 2);
        assert!(matches!(compact(&tree), Err(Error::IoError(_))));
        assert_eq!(table_counts(&tree), vec![2, 0]);
        for key in ["a000", "a001", "b000", "b001", "c000", "c001"] {
            assert!(tree.get(key).unwrap().is_some(), "{} lost", key);
        }
        let leftovers: Vec<_> = std::fs::read_dir(level_dir(&tree.levels_dir(), 2))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec!["_meta.json"]);

        codec.clear();
        compact(&tree).unwrap();
        assert_eq!(table_counts(&tree), vec![1, 1]);

        // A failed flush leaves the frozen memtable in place and readable.
        fill(&tree, "d", 1);
        codec.fail_on("bloom.dat");
        assert!(force_flush(&tree).is_err());
        assert_eq!(tree.metrics().frozen_records, Some(1));
        assert!(tree.get("d000").unwrap().is_some());
        fill(&tree, "e", 1);

        // The next cycle retries it.
        codec.clear();
        compact(&tree).unwrap();
        assert_eq!(table_counts(&tree), vec![2, 1]);
        assert_eq!(tree.metrics().frozen_records, None);
        assert!(tree.get("d000").unwrap().is_some());
        assert!(tree.get("e000").unwrap().is_some());
    }

    #[test]
    fn test_flush_is_newer_than_level_one() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let tree = open(&dir, 100, 2);
        assert!(!force_flush(&tree).unwrap());

        // A segment stamped an hour ahead, as after a clock step backwards.
        let level = tree.levels.read()[0].clone();
        let ahead = now_nanos() + 3_600_000_000_000;
        let mut builder = SegmentBuilder::setup(level.dir(), 1, &tree.config, tree.codec.clone()).unwrap();
        builder.not_before(ahead);
        builder
            .add(&Record::new("k", json!({ "v": "old" }).as_object().cloned().unwrap()))
            .unwrap();
        level.add_table(Arc::new(builder.finish().unwrap())).unwrap();

        tree.put(Record::new("k", json!({ "v": "new" }).as_object().cloned().unwrap()))
            .unwrap();
        assert!(force_flush(&tree).unwrap());
        assert!(level.newest_created_at().unwrap() > ahead);

        // Level 1 is full: the merge into level 2 ranks segments by timestamp.
        compact(&tree).unwrap();
        assert_eq!(table_counts(&tree), vec![0, 1]);
        let record = tree.get("k").unwrap().unwrap();
        assert_eq!(record.value.get("v"), Some(&json!("new")));
    }
}
