//! LSM-Tree storage engine implementation.
//!
//! This module implements a Log-Structured Merge-tree (LSM-tree) that keeps
//! JSON document records keyed by string.
//!
//! # LSM-Tree Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Active Memtable │───►│ Frozen Memtable │
//! │   (SkipList)    │    │   (SkipList)    │
//! └─────────────────┘    └─────────────────┘
//!                                 │ flush
//!                                 ▼
//!                          ┌─────────────┐
//!                          │  Level 1    │
//!                          │ (segments)  │
//!                          └─────────────┘
//!                                 │ compact when full
//!                                 ▼
//!                          ┌─────────────┐
//!                          │  Level 2    │
//!                          └─────────────┘
//!                                 │
//!                                 ▼
//!                                ...
//! ```
//!
//! # Data Flow
//!
//! ## Write Path
//! 1. **WAL hook**: an attached [`WriteAheadLog`] sees every write first
//! 2. **Memtable insert**: the record lands in the active memtable
//! 3. **Flush**: a full memtable is frozen, swapped out and written as the
//!    newest segment of level 1
//! 4. **Compaction**: a full level is merged into one segment of the next level
//!
//! ## Read Path
//! 1. **Active memtable**, then the **frozen memtable**
//! 2. **Levels** 1..N, each searched newest segment first
//!
//! The first record found wins. Deletes are tombstone records, so a tombstone
//! in a newer place hides any value further down.
//!
//! # Concurrency and Durability
//!
//! - **File locking**: `LOCK` keeps a second tree out of the directory
//! - **Atomic metadata**: tree, level and segment metadata are written to a
//!   temporary file and renamed into place
//! - **Commit point**: a segment exists once its metadata is listed by its level;
//!   unlisted segment directories are removed on open
//! - **Lock-free memtable reads**: crossbeam-skiplist

pub mod codec;
pub mod compaction;
pub mod iterator;
pub mod level;
pub mod memtable;
pub mod metrics;
pub mod record;
pub mod sstable;
pub mod store;
pub mod tasks;
pub mod wal;

pub use codec::{Codec, FileCodec};
pub use iterator::MergeIterator;
pub use level::{Level, LevelMeta};
pub use memtable::Memtable;
pub use metrics::TreeMetrics;
pub use record::{Document, Record};
pub use sstable::table::Segment;
pub use store::{LsmTree, TreeMeta};
pub use tasks::{CompactionTask, MetricsTask};
pub use wal::WriteAheadLog;
