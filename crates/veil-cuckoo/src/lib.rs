//! Two-choice cuckoo placement over a contiguous byte buffer
//!
//! The table has fixed geometry: `num_buckets` buckets of `bucket_depth`
//! slots, each slot `item_size` bytes at offset `slot * item_size` in
//! one flat buffer. Every item names its own two candidate buckets;
//! insertion may displace an incumbent, which then moves to *its* other
//! bucket, up to [`MAX_EVICTIONS`] hops.
//!
//! Two tables reach byte-identical state iff they are built with the
//! same seed and the same operations are applied in the same order;
//! all randomness comes from a seeded keystream.

use thiserror::Error;

use veil_core::HashDrbg;

/// Upper bound on displacement hops before an insert gives up.
pub const MAX_EVICTIONS: usize = 500;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("buffer length {actual} does not match geometry ({expected} bytes)")]
    BufferSize { expected: usize, actual: usize },
}

/// An entry addressed by its two candidate buckets.
///
/// Identity is the `id` together with the bucket pair; the data bytes
/// ride along. `bucket1 == bucket2` is legal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: u64,
    pub data: Vec<u8>,
    pub bucket1: u64,
    pub bucket2: u64,
}

impl Item {
    pub fn new(id: u64, data: Vec<u8>, bucket1: u64, bucket2: u64) -> Item {
        Item {
            id,
            data,
            bucket1,
            bucket2,
        }
    }
}

/// Occupancy record for one slot. The slot's bytes live in the table
/// buffer; a slot with `filled == false` is garbage and never served.
#[derive(Debug, Clone, Copy, Default)]
struct ItemLocation {
    filled: bool,
    id: u64,
    bucket1: u64,
    bucket2: u64,
}

/// Fixed-geometry cuckoo table.
pub struct Table {
    name: String,
    num_buckets: u64,
    bucket_depth: u64,
    item_size: usize,
    rng: HashDrbg,
    index: Vec<ItemLocation>,
    data: Vec<u8>,
}

impl Table {
    /// Create a table, optionally over a pre-allocated buffer, which
    /// must be exactly `num_buckets * bucket_depth * item_size` bytes.
    pub fn new(
        name: &str,
        num_buckets: u64,
        bucket_depth: u64,
        item_size: usize,
        buffer: Option<Vec<u8>>,
        seed: u64,
    ) -> Result<Table, TableError> {
        let expected = (num_buckets * bucket_depth) as usize * item_size;
        let data = match buffer {
            Some(buf) if buf.len() != expected => {
                return Err(TableError::BufferSize {
                    expected,
                    actual: buf.len(),
                })
            }
            Some(buf) => buf,
            None => vec![0u8; expected],
        };

        Ok(Table {
            name: name.to_string(),
            num_buckets,
            bucket_depth,
            item_size,
            rng: HashDrbg::seeded(seed),
            index: vec![ItemLocation::default(); (num_buckets * bucket_depth) as usize],
            data,
        })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> u64 {
        self.num_buckets * self.bucket_depth
    }

    /// Number of filled slots. Load factor = `len() / capacity()`.
    pub fn len(&self) -> u64 {
        self.index.iter().filter(|loc| loc.filled).count() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.index.iter().all(|loc| !loc.filled)
    }

    /// The underlying buffer, laid out bucket-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the item is resident in either of its candidate buckets.
    ///
    /// Matches on `id` and the bucket pair only, so a subscriber can probe
    /// membership without holding the payload bytes.
    pub fn contains(&self, item: &Item) -> bool {
        if item.bucket1 >= self.num_buckets || item.bucket2 >= self.num_buckets {
            return false;
        }
        self.find_in_bucket(item.bucket1, item).is_some()
            || self.find_in_bucket(item.bucket2, item).is_some()
    }

    /// Which candidate bucket currently holds the item, if either.
    pub fn bucket(&self, item: &Item) -> Option<u64> {
        if item.bucket1 >= self.num_buckets || item.bucket2 >= self.num_buckets {
            return None;
        }
        if self.find_in_bucket(item.bucket1, item).is_some() {
            return Some(item.bucket1);
        }
        if self.find_in_bucket(item.bucket2, item).is_some() {
            return Some(item.bucket2);
        }
        None
    }

    /// Insert an item, displacing incumbents as needed.
    ///
    /// Returns `(true, None)` on success. Returns `(false, None)` when
    /// the item is rejected outright (bucket out of range, wrong data
    /// length). Returns `(false, Some(orphan))` when the displacement
    /// chain hits [`MAX_EVICTIONS`]: the orphan has been removed from
    /// the table and the caller must reinsert or drop it.
    pub fn insert(&mut self, item: &Item) -> (bool, Option<Item>) {
        if item.bucket1 >= self.num_buckets || item.bucket2 >= self.num_buckets {
            return (false, None);
        }
        if item.data.len() != self.item_size {
            return (false, None);
        }

        // Probe one candidate at random, then start displacing from the
        // other.
        let coin = self.rng.next_u64() % 2;
        let mut next_bucket;
        if coin == 0 {
            if self.try_insert_to_bucket(item.bucket1, item) {
                return (true, None);
            }
            next_bucket = item.bucket2;
        } else {
            if self.try_insert_to_bucket(item.bucket2, item) {
                return (true, None);
            }
            next_bucket = item.bucket1;
        }

        let mut current = item.clone();
        for _ in 0..MAX_EVICTIONS {
            match self.insert_and_evict(next_bucket, &current) {
                None => return (true, None),
                Some(evicted) => {
                    next_bucket = if evicted.bucket1 == next_bucket {
                        evicted.bucket2
                    } else {
                        evicted.bucket1
                    };
                    current = evicted;
                }
            }
        }

        tracing::debug!(
            table = %self.name,
            id = current.id,
            "insert gave up after {MAX_EVICTIONS} evictions"
        );
        (false, Some(current))
    }

    /// Remove one copy of the item, probing only its two buckets.
    ///
    /// Matches by identity (`id` and the bucket pair), like
    /// [`Table::contains`]: an id-only record is enough to remove the
    /// payload it names.
    pub fn remove(&mut self, item: &Item) -> bool {
        if item.bucket1 >= self.num_buckets || item.bucket2 >= self.num_buckets {
            return false;
        }

        let coin = self.rng.next_u64() % 2;
        let (first, second) = if coin == 0 {
            (item.bucket1, item.bucket2)
        } else {
            (item.bucket2, item.bucket1)
        };
        self.remove_from_bucket(first, item) || self.remove_from_bucket(second, item)
    }

    /// Slot indices spanned by a bucket.
    fn bucket_slots(&self, bucket: u64) -> std::ops::Range<usize> {
        let start = (bucket * self.bucket_depth) as usize;
        start..start + self.bucket_depth as usize
    }

    fn slot_bytes(&self, slot: usize) -> &[u8] {
        &self.data[slot * self.item_size..(slot + 1) * self.item_size]
    }

    /// Locate the item in a bucket by identity (id + bucket pair).
    fn find_in_bucket(&self, bucket: u64, item: &Item) -> Option<usize> {
        self.bucket_slots(bucket).find(|&slot| {
            let loc = &self.index[slot];
            loc.filled && loc.id == item.id && loc.bucket1 == item.bucket1 && loc.bucket2 == item.bucket2
        })
    }

    /// Write the item into the first free slot of a bucket, if any.
    fn try_insert_to_bucket(&mut self, bucket: u64, item: &Item) -> bool {
        for slot in self.bucket_slots(bucket) {
            if !self.index[slot].filled {
                let offset = slot * self.item_size;
                self.data[offset..offset + self.item_size].copy_from_slice(&item.data);
                self.index[slot] = ItemLocation {
                    filled: true,
                    id: item.id,
                    bucket1: item.bucket1,
                    bucket2: item.bucket2,
                };
                return true;
            }
        }
        false
    }

    /// Insert into a bucket, displacing a random incumbent when full.
    /// Returns the displaced item, or `None` if a free slot was found.
    fn insert_and_evict(&mut self, bucket: u64, item: &Item) -> Option<Item> {
        if self.try_insert_to_bucket(bucket, item) {
            return None;
        }

        let slot = (bucket * self.bucket_depth + self.rng.next_u64() % self.bucket_depth) as usize;
        let loc = self.index[slot];
        let evicted = Item {
            id: loc.id,
            data: self.slot_bytes(slot).to_vec(),
            bucket1: loc.bucket1,
            bucket2: loc.bucket2,
        };
        self.index[slot].filled = false;

        if !self.try_insert_to_bucket(bucket, item) {
            // The slot was just vacated; not finding it means the index
            // and buffer disagree.
            unreachable!("no space in bucket after eviction");
        }
        Some(evicted)
    }

    /// Remove one identity match from a bucket.
    fn remove_from_bucket(&mut self, bucket: u64, item: &Item) -> bool {
        if let Some(slot) = self.find_in_bucket(bucket, item) {
            self.index[slot].filled = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const TEST_ITEM_SIZE: usize = 64;

    fn get_bytes(val: &str) -> Vec<u8> {
        let mut buf = vec![0u8; TEST_ITEM_SIZE];
        buf[..val.len()].copy_from_slice(val.as_bytes());
        buf
    }

    #[test]
    fn test_capacity() {
        let table = Table::new("t", 10, 2, TEST_ITEM_SIZE, None, 0).unwrap();
        assert_eq!(table.capacity(), 20);

        let table = Table::new("t", 1, 1, TEST_ITEM_SIZE, None, 0).unwrap();
        assert_eq!(table.capacity(), 1);

        let table = Table::new("t", 0, 0, TEST_ITEM_SIZE, None, 0).unwrap();
        assert_eq!(table.capacity(), 0);
    }

    #[test]
    fn test_invalid_construction() {
        let result = Table::new("t", 2, 3, 4, Some(vec![0u8; 7]), 0);
        assert!(matches!(
            result,
            Err(TableError::BufferSize {
                expected: 24,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_basic() {
        let mut table = Table::new("t", 10, 2, TEST_ITEM_SIZE, None, 0).unwrap();
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());

        assert!(!table.contains(&Item::new(0, get_bytes(""), 0, 1)));
        assert!(!table.remove(&Item::new(1, get_bytes("value1"), 0, 1)));

        // Wrong data length is rejected without mutating.
        let (ok, evicted) = table.insert(&Item::new(1, vec![0, 0], 0, 1));
        assert!(!ok);
        assert!(evicted.is_none());

        let (ok, evicted) = table.insert(&Item::new(1, get_bytes("value1"), 0, 1));
        assert!(ok);
        assert!(evicted.is_none());

        assert!(table.contains(&Item::new(1, get_bytes("value1"), 0, 1)));
        // Membership is by id, not payload.
        assert!(table.contains(&Item::new(1, get_bytes(""), 0, 1)));
        assert!(!table.contains(&Item::new(2, get_bytes("value2"), 0, 1)));
        assert_eq!(table.len(), 1);

        assert!(table.remove(&Item::new(1, get_bytes("value1"), 0, 1)));
        assert_eq!(table.len(), 0);
        assert!(!table.remove(&Item::new(1, get_bytes("value1"), 0, 1)));
    }

    #[test]
    fn test_bucket_locates_items() {
        let mut table = Table::new("t", 10, 2, TEST_ITEM_SIZE, None, 0).unwrap();
        let items = [
            Item::new(1, get_bytes("value1"), 5, 5),
            Item::new(2, get_bytes("value2"), 5, 5),
            Item::new(3, get_bytes("value3"), 5, 6),
        ];
        for item in &items {
            let (ok, _) = table.insert(item);
            assert!(ok, "failed to insert {item:?}");
        }

        assert_eq!(table.bucket(&items[0]), Some(5));
        assert_eq!(table.bucket(&items[1]), Some(5));
        // Bucket 5 is full, so value3 went to its other choice.
        assert_eq!(table.bucket(&items[2]), Some(6));

        assert_eq!(table.bucket(&Item::new(4, get_bytes("value4"), 1, 1)), None);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut table = Table::new("t", 10, 2, TEST_ITEM_SIZE, None, 0).unwrap();
        let item = Item::new(1, get_bytes("value1"), 100, 100);

        let (ok, evicted) = table.insert(&item);
        assert!(!ok);
        assert!(evicted.is_none());
        assert!(!table.contains(&item));
        assert!(!table.remove(&item));
    }

    #[test]
    fn test_placement_invariant() {
        let mut table = Table::new("t", 100, 4, TEST_ITEM_SIZE, None, 7).unwrap();
        let mut rng = rand::thread_rng();

        for id in 0..300u64 {
            let item = Item::new(
                id,
                get_bytes(&format!("v{id}")),
                rng.gen_range(0..100),
                rng.gen_range(0..100),
            );
            let (ok, _) = table.insert(&item);
            if ok {
                let home = table.bucket(&item).expect("inserted item must be locatable");
                assert!(home == item.bucket1 || home == item.bucket2);
            }
        }
    }

    #[test]
    fn test_shared_bucket_pair_fills_and_overflows() {
        // Capacity scenario: every item contends for buckets {0, 1} of
        // depth 2, so exactly 4 fit.
        let mut table = Table::new("t", 10, 2, TEST_ITEM_SIZE, None, 0).unwrap();

        let mut inserted = 0u64;
        let mut overflowed = None;
        for id in 1..=20u64 {
            let item = Item::new(id, get_bytes(&format!("v{id}")), 0, 1);
            let (ok, evicted) = table.insert(&item);
            if ok {
                inserted += 1;
            } else {
                overflowed = Some((id, evicted));
                break;
            }
        }

        assert_eq!(inserted, 4);
        let (failed_at, orphan) = overflowed.expect("5th insert must overflow");
        assert_eq!(failed_at, 5);
        let orphan = orphan.expect("overflow must hand back an orphan");
        assert_eq!((orphan.bucket1, orphan.bucket2), (0, 1));
        assert_eq!(table.len(), 4);

        // Remove the four residents (identity unknown per slot, so
        // remove by the ids that are not the orphan).
        for id in 1..=5u64 {
            if id != orphan.id {
                assert!(table.remove(&Item::new(id, get_bytes(&format!("v{id}")), 0, 1)));
            }
        }
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_remove_by_identity_record() {
        let mut table = Table::new("t", 10, 2, TEST_ITEM_SIZE, None, 0).unwrap();

        let (ok, _) = table.insert(&Item::new(7, get_bytes("payload"), 2, 3));
        assert!(ok);

        // An id-only record, as the shard's window log keeps, removes
        // the stored payload.
        assert!(table.remove(&Item::new(7, Vec::new(), 2, 3)));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_duplicate_data_distinct_ids() {
        let mut table = Table::new("t", 10, 2, TEST_ITEM_SIZE, None, 0).unwrap();

        for (id, b1, b2) in [(1, 0, 1), (2, 0, 1), (3, 1, 2)] {
            let (ok, evicted) = table.insert(&Item::new(id, get_bytes("v"), b1, b2));
            assert!(ok);
            assert!(evicted.is_none());
        }

        assert!(table.remove(&Item::new(1, get_bytes("v"), 0, 1)));
        assert!(table.remove(&Item::new(2, get_bytes("v"), 0, 1)));
        assert!(table.remove(&Item::new(3, get_bytes("v"), 1, 2)));
    }

    #[test]
    fn test_count_tracks_operations() {
        let mut table = Table::new("t", 100, 4, TEST_ITEM_SIZE, None, 3).unwrap();
        let mut rng = rand::thread_rng();
        let mut entries = Vec::new();
        let mut orphan: Option<Item> = None;

        loop {
            let item = Item::new(
                rng.gen::<u64>(),
                get_bytes(&format!("{}", rng.gen::<u32>())),
                rng.gen_range(0..100),
                rng.gen_range(0..100),
            );
            let (ok, evicted) = table.insert(&item);
            if !ok {
                orphan = evicted;
                break;
            }
            entries.push(item);
            assert_eq!(table.len(), entries.len() as u64);
        }

        // The orphan was displaced out of the table; whichever entry it
        // was is no longer removable.
        let mut expected = entries.len() as u64;
        for entry in &entries {
            if orphan.as_ref() == Some(entry) {
                continue;
            }
            assert!(table.remove(entry), "lost a resident entry");
            expected -= 1;
            assert_eq!(table.len(), expected);
        }
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_deterministic_under_seed() {
        let ops: Vec<Item> = (0..200u64)
            .map(|id| Item::new(id, get_bytes(&format!("v{id}")), id % 50, (id * 7 + 3) % 50))
            .collect();

        let mut a = Table::new("a", 50, 2, TEST_ITEM_SIZE, None, 42).unwrap();
        let mut b = Table::new("b", 50, 2, TEST_ITEM_SIZE, None, 42).unwrap();

        for op in &ops {
            let ra = a.insert(op);
            let rb = b.insert(op);
            assert_eq!(ra, rb);
        }
        for op in ops.iter().step_by(3) {
            assert_eq!(a.remove(op), b.remove(op));
        }

        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_preallocated_buffer() {
        let buffer = vec![0u8; 10 * 2 * TEST_ITEM_SIZE];
        let mut table = Table::new("t", 10, 2, TEST_ITEM_SIZE, Some(buffer), 0).unwrap();

        let (ok, _) = table.insert(&Item::new(9, get_bytes("payload"), 3, 4));
        assert!(ok);

        let home = table.bucket(&Item::new(9, Vec::new(), 3, 4)).unwrap();
        let offset = (home * 2) as usize * TEST_ITEM_SIZE;
        let window = &table.data()[offset..offset + 2 * TEST_ITEM_SIZE];
        assert!(window
            .chunks(TEST_ITEM_SIZE)
            .any(|slot| slot == get_bytes("payload").as_slice()));
    }
}
