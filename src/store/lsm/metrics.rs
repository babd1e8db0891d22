use super::LsmTree;
use crate::error::Result;

/// Point-in-time view of the tree's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMetrics {
    pub active_records: usize,
    /// Records in the memtable being flushed, if any.
    pub frozen_records: Option<usize>,
    /// Segment count per level, level 1 first.
    pub level_tables: Vec<usize>,
    pub closed: bool,
}

pub fn snapshot(tree: &LsmTree) -> TreeMetrics {
    let (active_records, frozen_records) = {
        let memtables = tree.memtables.read();
        (
            memtables.active.len(),
            memtables.frozen.as_ref().map(|m| m.len()),
        )
    };
    let level_tables = tree.levels.read().iter().map(|l| l.len()).collect();

    TreeMetrics {
        active_records,
        frozen_records,
        level_tables,
        closed: tree.is_closed(),
    }
}

/// Collect metrics from the tree and log them
pub fn collect_metrics(tree: &LsmTree) -> Result<()> {
    let metrics = snapshot(tree);

    tracing::info!(
        active_records = metrics.active_records,
        frozen_records = ?metrics.frozen_records,
        levels = metrics.level_tables.len(),
        level_tables = ?metrics.level_tables,
        closed = metrics.closed,
        "LSM metrics"
    );

    Ok(())
}
