//! Error kinds shared by every container in this crate.

/// Failure modes a container operation can report. No operation leaves
/// partial mutation visible when it returns `Err`.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// A null/zero-sized argument was supplied (zero capacity, zero element
    /// size in the byte-oriented sense the source algorithms assume).
    #[error("invalid argument")]
    InvalidArgument,

    /// The container's bounded backing storage (freelist or memory pool) is
    /// exhausted. Unbounded containers (the FIFO queue) only return this on
    /// system allocation failure.
    #[error("container out of memory")]
    OutOfMemory,

    /// A pop/dequeue was attempted on a container holding no user elements.
    #[error("container is empty")]
    Empty,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
