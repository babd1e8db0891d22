use std::{sync::Arc, time::Duration};

use crate::{
    error::{Error, Result},
    scheduler::{BackgroundTask, Context},
    store::lsm::{metrics, LsmTree},
};

pub struct CompactionTask {
    tree: Arc<LsmTree>,
}

impl CompactionTask {
    pub fn new(tree: Arc<LsmTree>) -> Self {
        Self { tree }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for CompactionTask {
    fn name(&self) -> &'static str {
        "compaction"
    }

    fn interval(&self) -> Duration {
        self.tree.config().compaction_interval
    }

    async fn execute(&self, ctx: Context) -> Result<()> {
        if self.tree.is_closed() || ctx.is_stopping() {
            return Ok(());
        }

        // Compaction does blocking file I/O.
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || tree.compact())
            .await
            .map_err(|e| Error::InvalidState(format!("compaction run {} failed to join: {}", ctx.run_id, e)))?
    }
}

pub struct MetricsTask {
    tree: Arc<LsmTree>,
}

impl MetricsTask {
    pub fn new(tree: Arc<LsmTree>) -> Self {
        Self { tree }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for MetricsTask {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn interval(&self) -> Duration {
        self.tree.config().metrics_interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        metrics::collect_metrics(&self.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LsmConfig;
    use crate::scheduler::Scheduler;
    use crate::store::lsm::record::Record;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_compaction_flushes() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = LsmConfig::new(dir.path())
            .memtable_capacity(4)
            .filter_capacity(100)
            .compaction_interval(Duration::from_millis(10))
            .metrics_interval(Duration::from_millis(10));
        let tree = Arc::new(LsmTree::open(config)?);

        let scheduler = Scheduler::new();
        scheduler
            .register(Arc::new(CompactionTask::new(tree.clone())))
            .register(Arc::new(MetricsTask::new(tree.clone())));

        for i in 0..4 {
            tree.put(Record::tombstone(format!("k{}", i)))?;
        }

        let mut flushed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if tree.metrics().level_tables.first() == Some(&1) {
                flushed = true;
                break;
            }
        }
        scheduler.shutdown().await?;

        assert!(flushed, "background compaction never flushed the memtable");
        assert!(tree.get("k0")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_compaction_skips_closed_tree() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let tree = Arc::new(LsmTree::open(LsmConfig::new(dir.path()).filter_capacity(100))?);
        tree.close()?;

        let (_tx, rx) = tokio::sync::watch::channel(false);
        let ctx = Context {
            task_name: "compaction",
            run_id: 1,
            shutdown: rx,
        };
        CompactionTask::new(tree).execute(ctx).await
    }
}
