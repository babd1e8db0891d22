//! K-way merge over segments.
//!
//! Each input segment is scanned by its own producer thread into a bounded
//! channel. The consumer keeps the head record of every channel in a binary
//! heap and always yields the smallest key; when several segments hold the
//! same key, the newest segment's record wins and the rest are skipped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};

use super::record::Record;
use super::sstable::table::Segment;
use crate::error::Result;

/// Recency of a source: later creation time first, then later input position.
type Rank = (u64, usize);

pub struct HeapEntry {
    pub record: Record,
    pub source: usize,
    rank: Rank,
}

impl std::fmt::Debug for HeapEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapEntry")
            .field("key", &self.record.key)
            .field("source", &self.source)
            .finish()
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap: smaller keys must compare greater, and for
    // equal keys the newer source must compare greater.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.record.key_cmp(&other.record) {
            Ordering::Equal => self.rank.cmp(&other.rank),
            ord => ord.reverse(),
        }
    }
}

pub struct MergeIterator {
    heap: BinaryHeap<HeapEntry>,
    receivers: Vec<Receiver<Result<Record>>>,
    ranks: Vec<Rank>,
    producers: Vec<JoinHandle<()>>,
    latest_key: Option<String>,
    failed: bool,
}

impl std::fmt::Debug for MergeIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeIterator")
            .field("heap", &self.heap)
            .field("sources", &self.receivers.len())
            .field("latest_key", &self.latest_key)
            .finish()
    }
}

impl MergeIterator {
    /// Starts one producer per segment, each buffering at most `buffer`
    /// records ahead of the consumer.
    pub fn new(segments: Vec<Arc<Segment>>, buffer: usize) -> Result<Self> {
        let mut iter = Self {
            heap: BinaryHeap::with_capacity(segments.len()),
            receivers: Vec::with_capacity(segments.len()),
            ranks: Vec::with_capacity(segments.len()),
            producers: Vec::with_capacity(segments.len()),
            latest_key: None,
            failed: false,
        };

        for (source, segment) in segments.into_iter().enumerate() {
            let (tx, rx) = bounded(buffer.max(1));
            iter.receivers.push(rx);
            iter.ranks.push((segment.meta().created_at, source));

            let handle = thread::Builder::new()
                .name(format!("merge-{}", source))
                .spawn(move || {
                    let result = segment.scan(|record| match tx.send(Ok(record)) {
                        Ok(()) => ControlFlow::Continue(()),
                        // Consumer is gone.
                        Err(_) => ControlFlow::Break(()),
                    });
                    if let Err(e) = result {
                        let _ = tx.send(Err(e));
                    }
                })?;
            iter.producers.push(handle);
        }

        for source in 0..iter.receivers.len() {
            iter.advance(source)?;
        }
        Ok(iter)
    }

    /// Pulls the next record of `source` into the heap.
    fn advance(&mut self, source: usize) -> Result<()> {
        match self.receivers[source].recv() {
            Ok(Ok(record)) => {
                self.heap.push(HeapEntry {
                    record,
                    source,
                    rank: self.ranks[source],
                });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            // Producer finished its segment.
            Err(_) => Ok(()),
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        while let Some(entry) = self.heap.pop() {
            if let Err(e) = self.advance(entry.source) {
                self.failed = true;
                return Some(Err(e));
            }

            if self.latest_key.as_deref() == Some(entry.record.key.as_str()) {
                continue;
            }
            self.latest_key = Some(entry.record.key.clone());
            return Some(Ok(entry.record));
        }

        None
    }
}

impl Drop for MergeIterator {
    fn drop(&mut self) {
        self.heap.clear();
        // Disconnecting the channels makes every blocked producer stop.
        self.receivers.clear();
        for handle in self.producers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Merge producer panicked");
            }
        }
    }
}
