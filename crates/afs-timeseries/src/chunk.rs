//! Immutable, offset-addressed spans of series values.
//!
//! [`DataChunk`] is generic over the value type; [`DoubleDataChunk`] and
//! [`StringDataChunk`] are the two concrete forms stored by AFS.

use std::ops::Range;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ChunkError, ChunkResult};

/// A value that can be stored in a chunk.
pub trait ChunkValue: Clone + PartialEq + Serialize + DeserializeOwned {
    /// Approximate in-memory size of one value, in bytes.
    fn estimated_size(&self) -> usize;
}

impl ChunkValue for f64 {
    fn estimated_size(&self) -> usize {
        8
    }
}

impl ChunkValue for String {
    fn estimated_size(&self) -> usize {
        // length prefix + UTF-8 bytes
        8 + self.len()
    }
}

/// An immutable span of series values starting at `offset` on the index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged, bound = "T: ChunkValue")]
pub enum DataChunk<T> {
    /// Literal values, one per point.
    Uncompressed { offset: usize, values: Vec<T> },
    /// Run-length encoded values: `step_values[i]` repeats `step_lengths[i]` times.
    #[serde(rename_all = "camelCase")]
    Compressed {
        offset: usize,
        uncompressed_length: usize,
        step_values: Vec<T>,
        step_lengths: Vec<u32>,
    },
}

pub type DoubleDataChunk = DataChunk<f64>;
pub type StringDataChunk = DataChunk<String>;

impl<T: ChunkValue> DataChunk<T> {
    /// Create an uncompressed chunk.
    pub fn uncompressed(offset: usize, values: Vec<T>) -> Self {
        Self::Uncompressed { offset, values }
    }

    /// Create a compressed chunk from explicit steps, validating its shape.
    pub fn compressed(
        offset: usize,
        uncompressed_length: usize,
        step_values: Vec<T>,
        step_lengths: Vec<u32>,
    ) -> ChunkResult<Self> {
        let chunk = Self::Compressed {
            offset,
            uncompressed_length,
            step_values,
            step_lengths,
        };
        chunk.validate()?;
        Ok(chunk)
    }

    /// Index of the first point covered by this chunk.
    pub fn offset(&self) -> usize {
        match self {
            Self::Uncompressed { offset, .. } | Self::Compressed { offset, .. } => *offset,
        }
    }

    /// Number of points covered by this chunk.
    pub fn length(&self) -> usize {
        match self {
            Self::Uncompressed { values, .. } => values.len(),
            Self::Compressed {
                uncompressed_length,
                ..
            } => *uncompressed_length,
        }
    }

    /// One past the last covered point, or an error if it does not fit.
    pub fn end(&self) -> ChunkResult<usize> {
        let (offset, length) = (self.offset(), self.length());
        offset
            .checked_add(length)
            .ok_or(ChunkError::SpanOverflow { offset, length })
    }

    /// The covered point range `offset..offset + length`, clamped at
    /// `usize::MAX` for chunks that fail [`Self::validate`].
    pub fn span(&self) -> Range<usize> {
        self.offset()..self.offset().saturating_add(self.length())
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed { .. })
    }

    /// Returns `true` if both chunks cover at least one common point.
    pub fn overlaps(&self, other: &Self) -> bool {
        let (a, b) = (self.span(), other.span());
        a.start < b.end && b.start < a.end
    }

    /// Approximate in-memory size of this chunk, in bytes.
    pub fn estimated_size(&self) -> usize {
        match self {
            Self::Uncompressed { values, .. } => values.iter().map(ChunkValue::estimated_size).sum(),
            Self::Compressed {
                step_values,
                step_lengths,
                ..
            } => {
                step_values
                    .iter()
                    .map(ChunkValue::estimated_size)
                    .sum::<usize>()
                    + step_lengths.len() * 4
            }
        }
    }

    /// Check structural consistency.
    pub fn validate(&self) -> ChunkResult<()> {
        let offset = self.offset();
        if self.length() == 0 {
            return Err(ChunkError::EmptyChunk { offset });
        }
        self.end()?;
        if let Self::Compressed {
            uncompressed_length,
            step_values,
            step_lengths,
            ..
        } = self
        {
            if step_values.len() != step_lengths.len() {
                return Err(ChunkError::InvalidCompressedChunk {
                    offset,
                    reason: format!(
                        "{} step values but {} step lengths",
                        step_values.len(),
                        step_lengths.len()
                    ),
                });
            }
            if step_lengths.contains(&0) {
                return Err(ChunkError::InvalidCompressedChunk {
                    offset,
                    reason: "zero step length".into(),
                });
            }
            let total: usize = step_lengths.iter().map(|l| *l as usize).sum();
            if total != *uncompressed_length {
                return Err(ChunkError::InvalidCompressedChunk {
                    offset,
                    reason: format!(
                        "step lengths sum to {total}, expected {uncompressed_length}"
                    ),
                });
            }
        }
        Ok(())
    }

    /// All values covered by this chunk, expanded.
    pub fn values(&self) -> Vec<T> {
        match self {
            Self::Uncompressed { values, .. } => values.clone(),
            Self::Compressed {
                uncompressed_length,
                step_values,
                step_lengths,
                ..
            } => {
                let mut values = Vec::with_capacity(*uncompressed_length);
                for (value, len) in step_values.iter().zip(step_lengths) {
                    values.extend(std::iter::repeat(value.clone()).take(*len as usize));
                }
                values
            }
        }
    }

    /// Run-length encode this chunk.
    ///
    /// Returns the compressed form only when it is estimated to be smaller;
    /// otherwise returns an unchanged copy.
    pub fn compress(&self) -> Self {
        let Self::Uncompressed { offset, values } = self else {
            return self.clone();
        };

        let mut step_values: Vec<T> = Vec::new();
        let mut step_lengths: Vec<u32> = Vec::new();
        for value in values {
            if let (Some(last), Some(len)) = (step_values.last(), step_lengths.last_mut()) {
                if last == value {
                    *len += 1;
                    continue;
                }
            }
            step_values.push(value.clone());
            step_lengths.push(1);
        }

        let compressed = Self::Compressed {
            offset: *offset,
            uncompressed_length: values.len(),
            step_values,
            step_lengths,
        };
        if compressed.estimated_size() < self.estimated_size() {
            compressed
        } else {
            self.clone()
        }
    }

    /// Expand to the uncompressed form.
    pub fn uncompress(&self) -> Self {
        match self {
            Self::Uncompressed { .. } => self.clone(),
            Self::Compressed { offset, .. } => Self::Uncompressed {
                offset: *offset,
                values: self.values(),
            },
        }
    }
}

/// Check that no two chunks cover a common point.
pub fn check_no_overlap<T: ChunkValue>(chunks: &[DataChunk<T>]) -> ChunkResult<()> {
    let mut spans: Vec<Range<usize>> = chunks.iter().map(DataChunk::span).collect();
    spans.sort_by_key(|s| s.start);
    for w in spans.windows(2) {
        if w[1].start < w[0].end {
            return Err(ChunkError::Overlap {
                first: w[0].start,
                second: w[1].start,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Compression
    // -----------------------------------------------------------------------

    #[test]
    fn compress_repeated_values() {
        let chunk = DoubleDataChunk::uncompressed(2, vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 3.0]);
        let compressed = chunk.compress();
        assert!(compressed.is_compressed());
        assert_eq!(compressed.offset(), 2);
        assert_eq!(compressed.length(), 7);
        assert_eq!(
            compressed,
            DoubleDataChunk::Compressed {
                offset: 2,
                uncompressed_length: 7,
                step_values: vec![1.0, 2.0, 3.0],
                step_lengths: vec![4, 2, 1],
            }
        );
        assert_eq!(compressed.uncompress(), chunk);
    }

    #[test]
    fn compress_keeps_uncompressed_when_not_smaller() {
        let chunk = DoubleDataChunk::uncompressed(0, vec![1.0, 2.0, 3.0]);
        let result = chunk.compress();
        assert!(!result.is_compressed());
        assert_eq!(result, chunk);
    }

    #[test]
    fn compress_strings() {
        let chunk = StringDataChunk::uncompressed(
            0,
            vec!["a".into(), "a".into(), "a".into(), "b".into()],
        );
        let compressed = chunk.compress();
        assert!(compressed.is_compressed());
        assert_eq!(compressed.values(), chunk.values());
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn compressed_constructor_validates() {
        assert!(DoubleDataChunk::compressed(0, 3, vec![1.0, 2.0], vec![1, 2]).is_ok());
        assert!(matches!(
            DoubleDataChunk::compressed(0, 4, vec![1.0, 2.0], vec![1, 2]),
            Err(ChunkError::InvalidCompressedChunk { .. })
        ));
        assert!(matches!(
            DoubleDataChunk::compressed(0, 1, vec![1.0], vec![1, 0]),
            Err(ChunkError::InvalidCompressedChunk { .. })
        ));
    }

    #[test]
    fn empty_chunk_is_invalid() {
        let chunk = DoubleDataChunk::uncompressed(5, vec![]);
        assert_eq!(chunk.validate(), Err(ChunkError::EmptyChunk { offset: 5 }));
    }

    // -----------------------------------------------------------------------
    // Overlap and layout
    // -----------------------------------------------------------------------

    #[test]
    fn overlap_detection() {
        let a = DoubleDataChunk::uncompressed(0, vec![1.0, 2.0]);
        let b = DoubleDataChunk::uncompressed(2, vec![3.0]);
        let c = DoubleDataChunk::uncompressed(1, vec![4.0]);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(check_no_overlap(&[b.clone(), a.clone()]).is_ok());
        assert_eq!(
            check_no_overlap(&[a, b, c]),
            Err(ChunkError::Overlap { first: 0, second: 1 })
        );
    }

    #[test]
    fn span_past_usize_max_is_invalid() {
        let chunk = DoubleDataChunk::uncompressed(usize::MAX, vec![1.0]);
        assert_eq!(
            chunk.validate(),
            Err(ChunkError::SpanOverflow {
                offset: usize::MAX,
                length: 1
            })
        );
        assert!(chunk.end().is_err());
        assert_eq!(chunk.span(), usize::MAX..usize::MAX);

        let rle = DoubleDataChunk::Compressed {
            offset: usize::MAX - 1,
            uncompressed_length: 3,
            step_values: vec![1.0],
            step_lengths: vec![3],
        };
        assert!(matches!(rle.validate(), Err(ChunkError::SpanOverflow { .. })));
    }

    #[test]
    fn overlap_check_tolerates_extreme_offsets() {
        let last = DoubleDataChunk::uncompressed(usize::MAX - 1, vec![1.0]);
        let first = DoubleDataChunk::uncompressed(0, vec![1.0]);
        assert!(check_no_overlap(&[last, first]).is_ok());
    }

    // -----------------------------------------------------------------------
    // JSON shape
    // -----------------------------------------------------------------------

    #[test]
    fn json_shapes_are_distinguishable() {
        let plain = DoubleDataChunk::uncompressed(0, vec![1.0, 2.0]);
        let json = serde_json::to_string(&plain).unwrap();
        assert_eq!(json, r#"{"offset":0,"values":[1.0,2.0]}"#);

        let rle = DoubleDataChunk::compressed(4, 3, vec![7.0], vec![3]).unwrap();
        let json = serde_json::to_value(&rle).unwrap();
        assert_eq!(json["uncompressedLength"], 3);
        assert_eq!(json["stepLengths"][0], 3);

        let back: DoubleDataChunk = serde_json::from_value(json).unwrap();
        assert_eq!(back, rle);
    }
}
