//! Interest filter: a fixed-size bloom filter over topic fingerprints
//!
//! The coordinator folds the interest fingerprint of every recent write
//! into a filter of `2^log2m` bits and ships it deflate-compressed.
//! Clients import the raw bits and test the fingerprint of each handle's
//! next expected sequence to decide polling priority. Both sides hash
//! with fixed SipHash keys so their bit positions agree.
//!
//! The bit set underneath is fixed-size: it never grows, and `set` /
//! `clear` report whether the position was addressable.

use serde::{Deserialize, Serialize};

use crate::drbg::siphash24;
use crate::{Error, Result};

const WORD_SIZE: u64 = 64;
const LOG2_WORD_SIZE: u64 = 6;

// Fixed double-hashing keys shared by producers and consumers.
const HASH1_KEY: (u64, u64) = (0x7665_696c_2d62_6631, 0x696e_7465_7265_7374);
const HASH2_KEY: (u64, u64) = (0x7665_696c_2d62_6632, 0x6669_6c74_6572_6b65);

/// A fixed-size set of bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitSet {
    num_bits: u64,
    data: Vec<u64>,
}

impl BitSet {
    pub fn new(num_bits: u64) -> BitSet {
        BitSet {
            num_bits,
            data: vec![0u64; num_bits.div_ceil(WORD_SIZE) as usize],
        }
    }

    /// Number of bits in the set.
    pub fn length(&self) -> u64 {
        self.num_bits
    }

    /// Test whether bit `i` is set. Out-of-range positions read as unset.
    pub fn test(&self, i: u64) -> bool {
        if i >= self.num_bits {
            return false;
        }
        self.data[(i >> LOG2_WORD_SIZE) as usize] & (1 << (i & (WORD_SIZE - 1))) != 0
    }

    /// Set bit `i`. Returns false if the position is out of range.
    pub fn set(&mut self, i: u64) -> bool {
        if i >= self.num_bits {
            return false;
        }
        self.data[(i >> LOG2_WORD_SIZE) as usize] |= 1 << (i & (WORD_SIZE - 1));
        true
    }

    /// Clear bit `i`. Returns false if the position is out of range.
    pub fn clear(&mut self, i: u64) -> bool {
        if i >= self.num_bits {
            return false;
        }
        self.data[(i >> LOG2_WORD_SIZE) as usize] &= !(1 << (i & (WORD_SIZE - 1)));
        true
    }

    /// Raw bits, little-endian, truncated to `ceil(num_bits / 8)` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() * 8);
        for word in &self.data {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.truncate(self.num_bits.div_ceil(8) as usize);
        bytes
    }

    /// Replace the bits from a `to_bytes` image of the same geometry.
    pub fn from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let expected = self.num_bits.div_ceil(8) as usize;
        if bytes.len() != expected {
            return Err(Error::FilterSize {
                expected,
                actual: bytes.len(),
            });
        }
        for word in self.data.iter_mut() {
            *word = 0;
        }
        for (i, b) in bytes.iter().enumerate() {
            self.data[i / 8] |= (*b as u64) << ((i % 8) * 8);
        }
        Ok(())
    }
}

/// Test two bit sets for equality; false when geometries differ.
pub fn bitset_equal(a: &BitSet, b: &BitSet) -> bool {
    a.num_bits == b.num_bits && a.data == b.data
}

/// Bloom filter of `2^log2m` bits with double hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    log2m: u32,
    num_hashes: u32,
    bits: BitSet,
}

impl Filter {
    /// Create an empty filter. `false_positive` picks the number of hash
    /// functions (`k = round(-log2(p))`, at least one).
    pub fn new(log2m: u32, false_positive: f64) -> Result<Filter> {
        if log2m >= 32 {
            return Err(Error::FilterTooLarge(log2m));
        }
        let k = (-false_positive.log2()).round().max(1.0) as u32;
        Ok(Filter {
            log2m,
            num_hashes: k,
            bits: BitSet::new(1 << log2m),
        })
    }

    /// Fold a fingerprint into the filter.
    pub fn add(&mut self, data: &[u8]) {
        let m = self.bits.length();
        let (h1, h2) = Filter::hashes(data);
        for i in 0..self.num_hashes as u64 {
            self.bits.set(h1.wrapping_add(i.wrapping_mul(h2)) % m);
        }
    }

    /// Test whether a fingerprint may have been added.
    pub fn test(&self, data: &[u8]) -> bool {
        let m = self.bits.length();
        let (h1, h2) = Filter::hashes(data);
        (0..self.num_hashes as u64)
            .all(|i| self.bits.test(h1.wrapping_add(i.wrapping_mul(h2)) % m))
    }

    /// Replace the filter contents with a peer's exported bits.
    pub fn import(&mut self, bytes: &[u8]) -> Result<()> {
        self.bits.from_bytes(bytes)
    }

    /// Raw bit image, suitable for `import` on the other side.
    pub fn export(&self) -> Vec<u8> {
        self.bits.to_bytes()
    }

    fn hashes(data: &[u8]) -> (u64, u64) {
        let h1 = siphash24(HASH1_KEY.0, HASH1_KEY.1, data);
        let h2 = siphash24(HASH2_KEY.0, HASH2_KEY.1, data) | 1;
        (h1, h2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_set_test_clear() {
        let mut bits = BitSet::new(100);
        assert!(!bits.test(63));
        assert!(bits.set(63));
        assert!(bits.test(63));
        assert!(bits.clear(63));
        assert!(!bits.test(63));
    }

    #[test]
    fn test_bitset_out_of_range() {
        let mut bits = BitSet::new(10);
        assert!(!bits.set(10));
        assert!(!bits.clear(10));
        assert!(!bits.test(10));
    }

    #[test]
    fn test_bitset_bytes_roundtrip() {
        let mut bits = BitSet::new(100);
        bits.set(0);
        bits.set(9);
        bits.set(64);
        bits.set(99);

        let bytes = bits.to_bytes();
        assert_eq!(bytes.len(), 13);

        let mut restored = BitSet::new(100);
        restored.from_bytes(&bytes).unwrap();
        assert!(bitset_equal(&bits, &restored));
    }

    #[test]
    fn test_bitset_import_wrong_length() {
        let mut bits = BitSet::new(100);
        assert!(bits.from_bytes(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_filter_membership() {
        let mut filter = Filter::new(10, 0.05).unwrap();
        filter.add(b"topic-42-seq-7");

        assert!(filter.test(b"topic-42-seq-7"));
        assert!(!filter.test(b"topic-42-seq-8"));
    }

    #[test]
    fn test_filter_import_matches_export() {
        let mut producer = Filter::new(10, 0.05).unwrap();
        producer.add(b"one");
        producer.add(b"two");

        let mut consumer = Filter::new(10, 0.05).unwrap();
        consumer.import(&producer.export()).unwrap();

        assert!(consumer.test(b"one"));
        assert!(consumer.test(b"two"));
        assert!(!consumer.test(b"three"));
    }

    #[test]
    fn test_filter_false_positive_rate() {
        let mut filter = Filter::new(14, 0.05).unwrap();
        for i in 0u64..200 {
            filter.add(&i.to_le_bytes());
        }

        let mut hits = 0;
        for i in 10_000u64..20_000 {
            if filter.test(&i.to_le_bytes()) {
                hits += 1;
            }
        }
        // 200 entries in 16K bits sits well under the configured rate.
        assert!(hits < 1_000, "false positive count {hits} too high");
    }
}
