use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

use crate::error::Error;
use crate::resize::{NoResize, ResizeAttempt, ResizeOutcome, Resizer};
use crate::segment::{InsertOutcome, Segment};

/// A concurrent hash map built on segmented hopscotch hashing.
///
/// The table never stores the key itself, only `H = hash(key)` — a 64-bit
/// value produced by `S`'s `BuildHasher`. `get`/`remove` therefore hash
/// whatever borrowed form of the key they're given and never need `K: Eq` or
/// to keep the original key type around past the call that inserted it.
///
/// `S` selects the segment and home bucket for a key; `R` is consulted when a
/// segment runs out of room for an insert (see [`Resizer`]).
pub struct Table<V, S = RandomState, R = NoResize> {
    segments: Box<[Segment<V>]>,
    segment_mask: usize,
    add_range: usize,
    hop_range: usize,
    max_tries: usize,
    hasher: S,
    resizer: R,
}

impl<V: Copy> Table<V, RandomState, NoResize> {
    /// Builds a table with the given segment/bucket counts and the default
    /// hasher and resize collaborator.
    pub fn new(
        n_segments: usize,
        buckets_per_segment: usize,
        add_range: usize,
        hop_range: usize,
        max_tries: usize,
    ) -> Result<Self, Error> {
        Self::with_hasher_and_resizer(
            n_segments,
            buckets_per_segment,
            add_range,
            hop_range,
            max_tries,
            RandomState::new(),
            NoResize,
        )
    }
}

impl<V: Copy, S: BuildHasher, R: Resizer<V>> Table<V, S, R> {
    /// Builds a table with an explicit hasher and resize collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `n_segments` or
    /// `buckets_per_segment` is not a power of two, if `add_range` exceeds
    /// `buckets_per_segment`, or if `hop_range` exceeds `add_range`.
    pub fn with_hasher_and_resizer(
        n_segments: usize,
        buckets_per_segment: usize,
        add_range: usize,
        hop_range: usize,
        max_tries: usize,
        hasher: S,
        resizer: R,
    ) -> Result<Self, Error> {
        if !n_segments.is_power_of_two() {
            return Err(Error::InvalidConfiguration("n_segments must be a power of two"));
        }
        if !buckets_per_segment.is_power_of_two() {
            return Err(Error::InvalidConfiguration(
                "buckets_per_segment must be a power of two",
            ));
        }
        if add_range == 0 || add_range > buckets_per_segment {
            return Err(Error::InvalidConfiguration(
                "add_range must be nonzero and at most buckets_per_segment",
            ));
        }
        if hop_range == 0 || hop_range > add_range {
            return Err(Error::InvalidConfiguration(
                "hop_range must be nonzero and at most add_range",
            ));
        }

        let segments = (0..n_segments).map(|_| Segment::new(buckets_per_segment)).collect();
        log::info!(
            "creating table: {n_segments} segments x {buckets_per_segment} buckets, \
             add_range={add_range}, hop_range={hop_range}, max_tries={max_tries}"
        );

        Ok(Self {
            segments,
            segment_mask: n_segments - 1,
            add_range,
            hop_range,
            max_tries,
            hasher,
            resizer,
        })
    }

    #[inline]
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Total number of live entries across every segment.
    pub fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits a 64-bit hash into `(segment_index, home_bucket)`: the segment
    /// is `hkey & segment_mask`, the home is `hkey mod buckets_per_segment`
    /// (source-preserved design choice — both are low bits of the same hash,
    /// which is harmless only insofar as the hasher mixes its output well).
    fn locate(&self, hkey: u64) -> (usize, usize) {
        let home = (hkey as usize) & self.segments[0].bucket_mask();
        let segment_index = (hkey as usize) & self.segment_mask;
        (segment_index, home)
    }

    /// Hashes `key` with `self.hasher`, perturbing a zero result so that
    /// `EMPTY` stays reserved for genuinely empty buckets (spec §3/§9): a real
    /// key's hash that happens to be zero has its low bit forced to one.
    fn hash_key<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        match hasher.finish() {
            0 => 1,
            h => h,
        }
    }

    /// Inserts `value` under `key` if no value is already present.
    ///
    /// A key already present is left untouched (first-writer-wins, spec
    /// §4.1) — this is not an upsert.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExhausted`] if the segment has no room and
    /// the configured [`Resizer`] declines to grow it.
    pub fn put<K: Hash + ?Sized>(&self, key: &K, value: V) -> Result<(), Error> {
        let hkey = self.hash_key(key);
        let (segment_index, home) = self.locate(hkey);
        let segment = &self.segments[segment_index];

        segment.with_lock(|| loop {
            match segment.insert_locked(home, hkey, value, self.add_range, self.hop_range) {
                InsertOutcome::Inserted | InsertOutcome::AlreadyPresent => return Ok(()),
                InsertOutcome::NeedsResize(reason) => {
                    let attempt = ResizeAttempt { segment_index, reason };
                    match self.resizer.on_full(attempt) {
                        ResizeOutcome::Resized => continue,
                        ResizeOutcome::NotSupported => return Err(Error::CapacityExhausted),
                    }
                }
            }
        })
    }

    /// Looks up `key`, hashing it the same way `put` would.
    pub fn get<K: Hash + ?Sized>(&self, key: &K) -> Option<V> {
        let hkey = self.hash_key(key);
        let (segment_index, home) = self.locate(hkey);
        self.segments[segment_index].get(home, hkey, self.max_tries)
    }

    /// Removes and returns the value under `key`, if present.
    pub fn remove<K: Hash + ?Sized>(&self, key: &K) -> Option<V> {
        let hkey = self.hash_key(key);
        let (segment_index, home) = self.locate(hkey);
        let segment = &self.segments[segment_index];
        segment.with_lock(|| segment.remove_locked(home, hkey))
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    fn small_table() -> Table<u64> {
        Table::new(4, 16, 8, 4, 3).unwrap()
    }

    #[test]
    fn rejects_non_power_of_two_segments() {
        let err = Table::<u64>::new(3, 16, 8, 4, 3).unwrap_err();
        assert_eq!(err, Error::InvalidConfiguration("n_segments must be a power of two"));
    }

    #[test]
    fn rejects_non_power_of_two_buckets() {
        let err = Table::<u64>::new(4, 10, 8, 4, 3).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfiguration("buckets_per_segment must be a power of two")
        );
    }

    #[test]
    fn rejects_hop_range_above_add_range() {
        let err = Table::<u64>::new(4, 16, 4, 8, 3).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfiguration("hop_range must be nonzero and at most add_range")
        );
    }

    #[test]
    fn put_get_remove_roundtrip() {
        let t = small_table();
        t.put("alpha", 1u64).unwrap();
        t.put("beta", 2u64).unwrap();
        assert_eq!(t.get("alpha"), Some(1));
        assert_eq!(t.get("beta"), Some(2));
        assert_eq!(t.get("gamma"), None);
        assert_eq!(t.len(), 2);

        assert_eq!(t.remove("alpha"), Some(1));
        assert_eq!(t.get("alpha"), None);
        assert_eq!(t.len(), 1);
        assert!(!t.is_empty());

        assert_eq!(t.remove("beta"), Some(2));
        assert!(t.is_empty());
    }

    #[test]
    fn put_is_idempotent_for_existing_key() {
        let t = small_table();
        t.put("k", 1u64).unwrap();
        t.put("k", 2u64).unwrap();
        assert_eq!(t.get("k"), Some(1));
    }

    #[test]
    fn many_keys_same_segment_survive() {
        let t = Table::<u64>::new(1, 32, 16, 8, 4).unwrap();
        for i in 0..20u64 {
            t.put(&i, i).unwrap();
        }
        for i in 0..20u64 {
            assert_eq!(t.get(&i), Some(i), "missing key {i}");
        }
        assert_eq!(t.len(), 20);
    }
}
