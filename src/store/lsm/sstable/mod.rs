// src/store/lsm/sstable/mod.rs

//! Immutable on-disk segments (SSTables).
//!
//! Segments are the durable storage layer of the LSM-tree. Each one holds a
//! sorted run of records produced either by a memtable flush or by compacting
//! a full level.
//!
//! # Layout
//!
//! Every segment lives in its own directory named after a random UUID:
//!
//! ```text
//! <level dir>/<uuid>/
//!   _meta.json   ← id, level, key range, record count, creation time
//!   data.dat     ← one JSON record per line, ascending by key
//!   bloom.dat    ← bloom filter over every key, checksummed
//! ```
//!
//! # Component Details
//!
//! ## Builder (`builder.rs`)
//!
//! Streams records into `data.dat`, collecting the filter and key range, then
//! writes the filter and finally the metadata. The metadata file is the commit
//! point: a directory without one is garbage.
//!
//! ## Segment (`table.rs`)
//!
//! Serves point lookups and full scans:
//! - **Range check**: keys outside `[min_key, max_key]` are rejected from metadata
//! - **Filter check**: the bloom filter rejects most absent keys without I/O
//! - **Scan**: sequential decode from the start of the data file
//!
//! ## Filter (`filter.rs`)
//!
//! Double-hashed bloom filter sized from the configured capacity and false
//! positive rate (about 9.6 bits per key and 7 probes at 1%).
//!
//! # Performance Characteristics
//!
//! - **Negative lookups**: O(k) filter probes, no data file access
//! - **Positive lookups**: O(n) scan, stopping at the first key past the target
//! - **Full scans**: one buffered sequential read

pub mod builder;
pub mod filter;
pub mod meta;
pub mod table;
