//! Error types for time-series chunks and indexes.

/// Errors that can occur while building or combining time-series data.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    /// A chunk must cover at least one point.
    #[error("empty chunk at offset {offset}")]
    EmptyChunk { offset: usize },

    /// Step values and step lengths of a compressed chunk disagree.
    #[error("invalid compressed chunk at offset {offset}: {reason}")]
    InvalidCompressedChunk { offset: usize, reason: String },

    /// `offset + length` does not fit in `usize`.
    #[error("chunk at offset {offset} with length {length} overflows the point range")]
    SpanOverflow { offset: usize, length: usize },

    /// Two chunks of the same series version cover a common point.
    #[error("chunk at offset {second} overlaps chunk at offset {first}")]
    Overlap { first: usize, second: usize },

    /// A chunk extends past the last point of the index.
    #[error("chunk span {offset}..{end} exceeds index point count {point_count}")]
    OutOfIndex {
        offset: usize,
        end: usize,
        point_count: usize,
    },

    /// The index definition itself is invalid.
    #[error("invalid index: {0}")]
    InvalidIndex(String),
}

/// Convenience alias for chunk results.
pub type ChunkResult<T> = Result<T, ChunkError>;
