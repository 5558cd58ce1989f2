use crate::sync::{AtomicU32, AtomicU64, Ordering};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

/// The sentinel `hkey` value marking an empty bucket (spec: "by convention this
/// is 0"). Callers whose hash may produce it have it perturbed automatically
/// by `Table` before it ever reaches a bucket.
pub(crate) const EMPTY: u64 = 0;

/// One slot of a segment's bucket ring.
///
/// A bucket plays two roles simultaneously: it is the storage for whatever key
/// currently lives in it, *and*, if it is somebody's home bucket, it owns that
/// key's neighborhood bitmap (`hop_info`). Bit *i* of `hop_info` is set iff the
/// key whose home is this bucket currently resides `i` buckets away (wrapping
/// within the segment).
///
/// `hkey`, `hop_info` are read without the segment lock by `get` (spec §5);
/// `value` is read without the lock too, which is why `V` is required to be
/// `Copy` — a whole-value load/store is the only way to avoid tearing without
/// per-value atomics.
#[repr(align(64))]
pub(crate) struct Bucket<V> {
    pub(crate) hkey: AtomicU64,
    pub(crate) hop_info: AtomicU32,
    value: UnsafeCell<MaybeUninit<V>>,
}

impl<V> Bucket<V> {
    pub(crate) fn empty() -> Self {
        Self {
            hkey: AtomicU64::new(EMPTY),
            hop_info: AtomicU32::new(0),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

impl<V: Copy> Bucket<V> {
    /// Reads the value slot. Caller must know the bucket held a live value at
    /// some point covered by this read (i.e. observed a matching `hkey` first).
    #[inline]
    pub(crate) fn read_value(&self) -> V {
        // SAFETY: callers only call this after observing a non-sentinel `hkey`
        // for this bucket, which only ever becomes non-sentinel after `value`
        // has been written (insert/displacement publish value before hkey/bit,
        // see `Segment::insert` and `Segment::find_closer_free_bucket`).
        unsafe { (*self.value.get()).assume_init() }
    }

    /// Writes the value slot. Caller must hold the segment lock.
    #[inline]
    pub(crate) fn write_value(&self, value: V) {
        // SAFETY: writer holds the segment lock; no concurrent writer exists,
        // and concurrent readers only trust this value after `hkey` is published.
        unsafe { (*self.value.get()).write(value) };
    }
}

// SAFETY: `UnsafeCell<MaybeUninit<V>>` is read through `read_value`/`write_value`
// only under the discipline documented above (write under lock, publish via
// `hkey`/`hop_info` with release ordering, read only after observing the
// publication with acquire ordering).
unsafe impl<V: Send> Sync for Bucket<V> {}
