//! Write-ahead log hook.
//!
//! The tree does not ship a log implementation. Callers that need crash
//! durability plug one in with [`LsmTree::with_wal`](super::LsmTree::with_wal):
//! every put and delete is appended before it is applied to the memtable, and
//! the log is replayed into the active memtable when the tree is opened.

use super::record::Record;
use crate::error::Result;

pub trait WriteAheadLog: Send + Sync {
    /// Durably records a write. Called before the write is acknowledged.
    fn append(&self, record: &Record) -> Result<()>;

    /// Returns every logged write in append order.
    fn replay(&self) -> Result<Vec<Record>>;

    /// Releases the log's resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
