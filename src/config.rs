use std::path::PathBuf;
use std::time::Duration;

/// Default number of records a memtable holds before it is flushed.
pub const DEFAULT_MEMTABLE_CAPACITY: usize = 1 << 10;

/// Default number of segments a level holds before it is compacted.
pub const DEFAULT_LEVEL_CAPACITY: usize = 10;

/// Default expected key cardinality used to size segment bloom filters.
pub const DEFAULT_FILTER_CAPACITY: usize = 10_000_000;

/// Default bloom filter false-positive rate.
pub const DEFAULT_FILTER_FP_RATE: f64 = 0.01;

/// Configuration for the LSM tree
#[derive(Debug, Clone)]
pub struct LsmConfig {
    /// Directory path for the tree
    pub dir: PathBuf,

    /// Record count at which the active memtable is considered full (default: 1024)
    pub memtable_capacity: usize,

    /// Segment count at which a level is considered full (default: 10)
    pub level_capacity: usize,

    /// Expected number of keys per segment bloom filter (default: 10M)
    pub filter_capacity: usize,

    /// Bloom filter false-positive rate (default: 1%)
    pub filter_fp_rate: f64,

    /// Bound of each per-segment queue feeding the merge iterator (default: 64)
    pub scan_buffer: usize,

    /// How often the background scheduler runs compaction (default: 10s)
    pub compaction_interval: Duration,

    /// How often the background scheduler logs tree metrics (default: 60s)
    pub metrics_interval: Duration,

    /// Source identifier embedded in generated record keys (default: 0)
    pub source_id: u16,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./bluedb"),
            memtable_capacity: DEFAULT_MEMTABLE_CAPACITY,
            level_capacity: DEFAULT_LEVEL_CAPACITY,
            filter_capacity: DEFAULT_FILTER_CAPACITY,
            filter_fp_rate: DEFAULT_FILTER_FP_RATE,
            scan_buffer: 64,
            compaction_interval: Duration::from_secs(10),
            metrics_interval: Duration::from_secs(60),
            source_id: 0,
        }
    }
}

impl LsmConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the memtable record capacity
    pub fn memtable_capacity(mut self, capacity: usize) -> Self {
        self.memtable_capacity = capacity.max(1);
        self
    }

    /// Set the per-level segment capacity
    pub fn level_capacity(mut self, capacity: usize) -> Self {
        self.level_capacity = capacity.max(1);
        self
    }

    /// Set the expected key count used to size bloom filters
    pub fn filter_capacity(mut self, capacity: usize) -> Self {
        self.filter_capacity = capacity;
        self
    }

    /// Set the bloom filter false-positive rate
    pub fn filter_fp_rate(mut self, rate: f64) -> Self {
        self.filter_fp_rate = rate;
        self
    }

    /// Set the merge iterator queue bound
    pub fn scan_buffer(mut self, size: usize) -> Self {
        self.scan_buffer = size.max(1);
        self
    }

    /// Set the background compaction interval
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Set the background metrics interval
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Set the source identifier used by the record key generator
    pub fn source_id(mut self, id: u16) -> Self {
        self.source_id = id;
        self
    }
}
