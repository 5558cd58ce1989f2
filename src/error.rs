use thiserror::Error;

/// The three failure kinds a `Table` can raise.
///
/// `Absent` is not one of them — a missing key from `get`/`remove` is a normal
/// `None`, never an `Error` (spec: "`Absent` from `get` or `remove` is not an
/// error — it is a normal result").
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The allocator could not provide memory for a new table or segment.
    #[error("allocator failed to provide memory for the table")]
    OutOfMemory,

    /// A precondition on `Table::new`'s sizes/ranges was violated.
    #[error("invalid table configuration: {0}")]
    InvalidConfiguration(&'static str),

    /// Insert could not find or create room for the key, and the configured
    /// `Resizer` could not grow the table either.
    #[error("capacity exhausted and no resize collaborator could grow the table")]
    CapacityExhausted,
}
