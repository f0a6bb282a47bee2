//! Time-series model for the application file system.
//!
//! A series is described by [`TimeSeriesMetadata`] (name, value type, tags,
//! and a [`TimeSeriesIndex`] defining the time axis). Its values are stored
//! as an ordered set of immutable [`DataChunk`]s, each covering a contiguous
//! span of index points starting at an offset. Chunks may leave gaps between
//! them but must never overlap within one series version.
//!
//! A chunk is either uncompressed (a literal value array) or compressed with
//! run-length encoding (step values plus step lengths).

pub mod chunk;
pub mod error;
pub mod metadata;

pub use chunk::{
    check_no_overlap, ChunkValue, DataChunk, DoubleDataChunk, StringDataChunk,
};
pub use error::{ChunkError, ChunkResult};
pub use metadata::{TimeSeriesDataType, TimeSeriesIndex, TimeSeriesMetadata};
