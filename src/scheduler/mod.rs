//! Periodic background work for an open tree.
//!
//! Each registered [`BackgroundTask`] gets its own tokio task ticking at the
//! task's interval. A failed run is logged and the next tick runs again, so a
//! transient I/O error during compaction does not stop later cycles. Stopping
//! is signalled through a `watch` channel: the loop exits at the next select,
//! and a run in progress can poll [`Context::is_stopping`] to skip its work.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Passed to every run of a task.
pub struct Context {
    pub task_name: &'static str,
    /// 1 for the first run, incremented on every tick.
    pub run_id: u64,
    pub shutdown: watch::Receiver<bool>,
}

impl Context {
    /// Whether the scheduler has been asked to stop.
    pub fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Delay between two runs. The first run happens right away.
    fn interval(&self) -> Duration;

    async fn execute(&self, ctx: Context) -> Result<()>;
}

/// Owns the loops driving the registered tasks.
pub struct Scheduler {
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Starts ticking `task`. Must be called inside a tokio runtime.
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> &Self {
        let name = task.name();
        let handle = tokio::spawn(run_periodic(task, self.shutdown_tx.subscribe()));
        self.tasks.lock().push((name, handle));
        self
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Stops every loop and waits for it. A run in progress completes first.
    ///
    /// Every loop is awaited; the first one that panicked is reported.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send_replace(true);

        let mut first_err = None;
        for (name, handle) in self.tasks.into_inner() {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Background task panicked");
                first_err.get_or_insert_with(|| {
                    Error::InvalidState(format!("task {} failed to join: {}", name, e))
                });
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_periodic<T: BackgroundTask>(task: Arc<T>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(task.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut run_id = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            // Fires on the stop signal, or when the scheduler is dropped.
            _ = shutdown.changed() => break,
        }
        let stopping = *shutdown.borrow();
        if stopping {
            break;
        }

        run_id += 1;
        let ctx = Context {
            task_name: task.name(),
            run_id,
            shutdown: shutdown.clone(),
        };
        if let Err(e) = task.execute(ctx).await {
            tracing::error!(task = task.name(), run_id, error = %e, "Background task failed");
        }
    }

    tracing::debug!(task = task.name(), runs = run_id, "Background task stopped");
}
