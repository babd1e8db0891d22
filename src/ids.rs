//! Record key generation.
//!
//! Generated keys have the form `<hex-unix-seconds>-<source>-<random>`, where
//! `source` is a 4 hex digit identifier of the writer and `random` is 8 hex
//! digits. Keys sort roughly by creation time and stay unique across writers.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Generates a new record key for the given source.
pub fn new_id(source_id: u16) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let random: u32 = rand::thread_rng().gen();

    format!("{:x}-{:04x}-{:08x}", now, source_id, random)
}
