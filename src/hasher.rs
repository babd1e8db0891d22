//! CRC-64 checksums guarding the binary files written next to segment data.

use std::fmt;

use crc::{Crc, Digest, CRC_64_ECMA_182};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Incremental CRC-64 (ECMA-182) hasher.
#[derive(Clone)]
pub struct Hasher {
    digest: Digest<'static, u64>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher")
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Checksum of everything written so far. The hasher stays usable.
    pub fn checksum(&self) -> u64 {
        self.digest.clone().finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum(data: &[u8]) -> u64 {
        CRC64.checksum(data)
    }

    #[test]
    fn test_incremental_checksum() {
        let mut hasher = Hasher::new();
        hasher.write(b"bloom ");
        hasher.write(b"filter");

        assert_eq!(hasher.checksum(), checksum(b"bloom filter"));
    }

    #[test]
    fn test_checksum_is_repeatable() {
        let mut hasher = Hasher::new();
        hasher.write(b"segment");
        let first = hasher.checksum();
        assert_eq!(first, hasher.checksum());

        let mut fresh = Hasher::default();
        fresh.write(b"segment");
        assert_eq!(first, fresh.checksum());
    }

    #[test]
    fn test_different_data_different_checksums() {
        assert_ne!(checksum(b"level-0001"), checksum(b"level-0002"));
    }
}
