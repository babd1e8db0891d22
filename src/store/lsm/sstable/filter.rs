//! Bloom filter for segment negative-lookup elimination.
//!
//! Every segment carries a filter over all of its keys. A point lookup checks
//! the filter first and skips the data file scan when the key is definitely
//! absent.
//!
//! ## File Format
//!
//! ```text
//! +----------------+-----------------+------------+------------------+-----------+
//! |num_bits:u64    |num_hashes:u32   |words:u32   |words × u64       |crc64:u64  |
//! +----------------+-----------------+------------+------------------+-----------+
//! ```
//!
//! All integers are big-endian. The checksum covers every preceding byte.

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::error::{Error, Result};
use crate::hasher::Hasher;

const HEADER_SIZE: usize = 16;
const SEED_PRIMARY: u64 = 0;
const SEED_SECONDARY: u64 = 0x517c_c1b7_2722_0a95;

/// Bloom filter using double hashing (Kirsch-Mitzenmacker) over xxh3.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_keys` at false-positive rate `fp_rate`.
    pub fn new(expected_keys: usize, fp_rate: f64) -> Self {
        let expected_keys = expected_keys.max(1) as f64;
        let fp_rate = fp_rate.clamp(1e-10, 0.5);
        let ln2 = std::f64::consts::LN_2;

        // m = -n * ln(p) / (ln2)^2
        let num_bits = (-expected_keys * fp_rate.ln() / (ln2 * ln2)).ceil() as u64;
        let num_bits = num_bits.max(64);
        // k = (m/n) * ln2
        let num_hashes = ((num_bits as f64 / expected_keys) * ln2).round() as u32;

        Self {
            bits: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes: num_hashes.clamp(1, 30),
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let idx = self.bit_index(h1, h2, i);
            self.bits[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    /// Returns `false` only if `key` was never inserted.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| {
            let idx = self.bit_index(h1, h2, i);
            self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.bits.len() * 8 + 8);
        // Writes into a Vec cannot fail.
        let _ = buf.write_u64::<BigEndian>(self.num_bits);
        let _ = buf.write_u32::<BigEndian>(self.num_hashes);
        let _ = buf.write_u32::<BigEndian>(self.bits.len() as u32);
        for word in &self.bits {
            let _ = buf.write_u64::<BigEndian>(*word);
        }

        let mut hasher = Hasher::new();
        hasher.write(&buf);
        let _ = buf.write_u64::<BigEndian>(hasher.checksum());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + 8 {
            return Err(Error::Decode(
                "bloom filter",
                io::Error::new(io::ErrorKind::UnexpectedEof, "filter file too short"),
            ));
        }

        let (body, trailer) = data.split_at(data.len() - 8);
        let expected = Cursor::new(trailer)
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("bloom filter checksum", e))?;
        let mut hasher = Hasher::new();
        hasher.write(body);
        if hasher.checksum() != expected {
            return Err(Error::ChecksumMismatch);
        }

        let mut cursor = Cursor::new(body);
        let decode = |e| Error::Decode("bloom filter", e);
        let num_bits = cursor.read_u64::<BigEndian>().map_err(decode)?;
        let num_hashes = cursor.read_u32::<BigEndian>().map_err(decode)?;
        let words = cursor.read_u32::<BigEndian>().map_err(decode)? as usize;

        if num_bits == 0 || (words as u64) < num_bits.div_ceil(64) || num_hashes == 0 {
            return Err(Error::Decode(
                "bloom filter",
                io::Error::new(io::ErrorKind::InvalidData, "inconsistent filter header"),
            ));
        }

        let mut bits = Vec::with_capacity(words);
        for _ in 0..words {
            bits.push(cursor.read_u64::<BigEndian>().map_err(decode)?);
        }
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).map_err(decode)?;
        if !rest.is_empty() {
            return Err(Error::Decode(
                "bloom filter",
                io::Error::new(io::ErrorKind::InvalidData, "trailing bytes after filter"),
            ));
        }

        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> usize {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits) as usize
    }
}

fn hash_pair(key: &[u8]) -> (u64, u64) {
    (
        xxh3_64_with_seed(key, SEED_PRIMARY),
        xxh3_64_with_seed(key, SEED_SECONDARY) | 1,
    )
}
