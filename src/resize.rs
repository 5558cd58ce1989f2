/// Why a segment asked for more room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeReason {
    /// The add-range probe found no free bucket within `A` slots of home.
    ProbeExhausted,
    /// A free bucket existed but displacement could not walk it within `R`
    /// buckets of home.
    DisplacementFailed,
}

/// A single segment's request to grow, handed to a [`Resizer`].
#[derive(Debug, Clone, Copy)]
pub struct ResizeAttempt {
    /// Index of the segment that ran out of room.
    pub segment_index: usize,
    pub reason: ResizeReason,
}

/// What a [`Resizer`] did with a [`ResizeAttempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The table grew (or otherwise made room); the caller should retry the
    /// insert that triggered this attempt.
    Resized,
    /// Growth is not implemented; the caller should surface
    /// [`crate::Error::CapacityExhausted`].
    NotSupported,
}

/// Collaborator consulted when a segment cannot place a new key.
///
/// Whole-table growth (rehashing every live key into a larger segment array)
/// is out of scope for the core map — see [`NoResize`], the default. This
/// trait exists so that scope can be lifted later (or supplied by a caller
/// who wants a stop-the-world rehash) without changing `Table`'s insert path.
pub trait Resizer<V> {
    fn on_full(&self, attempt: ResizeAttempt) -> ResizeOutcome;
}

/// The default [`Resizer`]: growth is simply not offered. An insert that
/// cannot find room fails with [`crate::Error::CapacityExhausted`] instead of
/// silently growing underneath the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResize;

impl<V> Resizer<V> for NoResize {
    fn on_full(&self, attempt: ResizeAttempt) -> ResizeOutcome {
        log::debug!(
            "segment {} out of room ({:?}); no resize collaborator configured",
            attempt.segment_index,
            attempt.reason
        );
        ResizeOutcome::NotSupported
    }
}
