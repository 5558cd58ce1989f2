//! A concurrent hash map built on segmented hopscotch hashing.
//!
//! The table is split into independently-locked segments. Within a segment,
//! every key lives within a fixed neighborhood (`hop_range` buckets) of its
//! home bucket, so a lookup only ever has to consult that neighborhood's
//! bitmap rather than probe the whole segment. Writers take the segment's
//! mutex; readers never do — `get` runs lock-free against a monotonic
//! per-segment timestamp that bumps on every displacement, retrying a bounded
//! number of times if it observes churn mid-scan.
//!
//! The table never retains the key itself, only its 64-bit hash, so lookups
//! only require `Hash` on whatever borrowed form of the key is passed in.
//!
//! Growing the table (rehashing every segment into a larger one) is not
//! implemented by the core map; see [`Resizer`] for the extension point.

mod bitmask;
mod bucket;
mod error;
mod resize;
mod segment;
mod sync;
mod table;

pub use crate::error::Error;
pub use crate::resize::{NoResize, ResizeAttempt, ResizeOutcome, ResizeReason, Resizer};
pub use crate::table::Table;
