pub mod lsm;

use crate::error::Result;
use lsm::Record;

/// Single-key record storage.
pub trait Store: Send + Sync {
    /// Retrieves the newest record for `key`. Tombstones are returned as
    /// records so callers can tell a deletion from a miss.
    fn get(&self, key: &str) -> Result<Option<Record>>;

    /// Inserts or replaces the record under its key.
    fn put(&self, record: Record) -> Result<()>;

    /// Marks `key` as deleted.
    fn del(&self, key: &str) -> Result<()>;

    /// Releases files and locks held by the store.
    fn close(&self) -> Result<()>;

    /// Like `get`, but treats a tombstone as a miss.
    fn get_live(&self, key: &str) -> Result<Option<Record>> {
        Ok(self.get(key)?.filter(|record| !record.is_tombstone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LsmConfig;
    use lsm::LsmTree;
    use tempfile::TempDir;

    #[test]
    fn test_store_trait_object() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let tree = LsmTree::open(LsmConfig::new(dir.path()).filter_capacity(100)).unwrap();
        let store: &dyn Store = &tree;

        store.put(Record::tombstone("gone")).unwrap();
        assert!(store.get("gone").unwrap().unwrap().is_tombstone());
        assert!(store.get_live("gone").unwrap().is_none());
        assert!(store.get_live("never").unwrap().is_none());

        store.close().unwrap();
    }
}
