use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ChunkError, ChunkResult};

/// Value type carried by a series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeSeriesDataType {
    Double,
    String,
}

impl fmt::Display for TimeSeriesDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Double => write!(f, "DOUBLE"),
            Self::String => write!(f, "STRING"),
        }
    }
}

/// The time axis of a series. Times are milliseconds since UNIX epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TimeSeriesIndex {
    /// Evenly spaced points from `start_time` to `end_time` inclusive.
    #[serde(rename_all = "camelCase")]
    Regular {
        start_time: i64,
        end_time: i64,
        spacing: i64,
    },
    /// Arbitrary, strictly increasing points.
    Irregular { times: Vec<i64> },
    /// Unbounded point sequence; point `i` is simply time `i`.
    Infinite,
}

impl TimeSeriesIndex {
    /// Build a regular index, checking `spacing > 0` and `end_time >= start_time`.
    pub fn regular(start_time: i64, end_time: i64, spacing: i64) -> ChunkResult<Self> {
        let index = Self::Regular {
            start_time,
            end_time,
            spacing,
        };
        index.validate()?;
        Ok(index)
    }

    /// Build an irregular index, checking that times strictly increase.
    pub fn irregular(times: Vec<i64>) -> ChunkResult<Self> {
        let index = Self::Irregular { times };
        index.validate()?;
        Ok(index)
    }

    /// Check the index definition.
    ///
    /// The variant fields are public and indexes also arrive deserialized, so
    /// an index is not guaranteed to have gone through [`Self::regular`] or
    /// [`Self::irregular`].
    pub fn validate(&self) -> ChunkResult<()> {
        match self {
            Self::Regular {
                start_time,
                end_time,
                spacing,
            } => {
                if *spacing <= 0 {
                    return Err(ChunkError::InvalidIndex(format!(
                        "spacing must be positive, got {spacing}"
                    )));
                }
                if end_time < start_time {
                    return Err(ChunkError::InvalidIndex(format!(
                        "end time {end_time} is before start time {start_time}"
                    )));
                }
                self.point_count().map(|_| ())
            }
            Self::Irregular { times } => {
                if times.is_empty() {
                    return Err(ChunkError::InvalidIndex("irregular index is empty".into()));
                }
                if let Some(w) = times.windows(2).find(|w| w[0] >= w[1]) {
                    return Err(ChunkError::InvalidIndex(format!(
                        "times are not strictly increasing: {} then {}",
                        w[0], w[1]
                    )));
                }
                Ok(())
            }
            Self::Infinite => Ok(()),
        }
    }

    /// Number of points on the axis, `None` for an infinite index.
    pub fn point_count(&self) -> ChunkResult<Option<usize>> {
        match self {
            Self::Regular {
                start_time,
                end_time,
                spacing,
            } => {
                let invalid = || {
                    ChunkError::InvalidIndex(format!(
                        "regular index {start_time}..={end_time} by {spacing} has no valid point count"
                    ))
                };
                if *spacing <= 0 {
                    return Err(invalid());
                }
                let steps = end_time
                    .checked_sub(*start_time)
                    .filter(|span| *span >= 0)
                    .and_then(|span| span.checked_div(*spacing))
                    .ok_or_else(invalid)?;
                let count = usize::try_from(steps)
                    .ok()
                    .and_then(|steps| steps.checked_add(1))
                    .ok_or_else(invalid)?;
                Ok(Some(count))
            }
            Self::Irregular { times } => Ok(Some(times.len())),
            Self::Infinite => Ok(None),
        }
    }

    /// Time of the given point, `None` if the point is past the end.
    pub fn time_at(&self, point: usize) -> Option<i64> {
        match self {
            Self::Regular {
                start_time,
                end_time,
                spacing,
            } => {
                let time = i64::try_from(point)
                    .ok()
                    .and_then(|point| spacing.checked_mul(point))
                    .and_then(|delta| start_time.checked_add(delta))?;
                (time <= *end_time).then_some(time)
            }
            Self::Irregular { times } => times.get(point).copied(),
            Self::Infinite => i64::try_from(point).ok(),
        }
    }
}

/// Descriptive metadata of a series.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesMetadata {
    pub name: String,
    pub data_type: TimeSeriesDataType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub index: TimeSeriesIndex,
}

impl TimeSeriesMetadata {
    pub fn new(name: impl Into<String>, data_type: TimeSeriesDataType, index: TimeSeriesIndex) -> Self {
        Self {
            name: name.into(),
            data_type,
            tags: BTreeMap::new(),
            index,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_point_count() {
        let index = TimeSeriesIndex::regular(0, 3_600_000, 900_000).unwrap();
        assert_eq!(index.point_count(), Ok(Some(5)));
        assert_eq!(index.time_at(1), Some(900_000));
        assert_eq!(index.time_at(5), None);
    }

    #[test]
    fn regular_rejects_bad_spacing() {
        assert!(TimeSeriesIndex::regular(0, 10, 0).is_err());
        assert!(TimeSeriesIndex::regular(10, 0, 1).is_err());
    }

    #[test]
    fn hand_built_regular_index_is_checked() {
        let zero_spacing = TimeSeriesIndex::Regular {
            start_time: 0,
            end_time: 10,
            spacing: 0,
        };
        assert!(matches!(zero_spacing.validate(), Err(ChunkError::InvalidIndex(_))));
        assert!(matches!(zero_spacing.point_count(), Err(ChunkError::InvalidIndex(_))));

        let overflowing = TimeSeriesIndex::Regular {
            start_time: i64::MIN,
            end_time: i64::MAX,
            spacing: 1,
        };
        assert!(overflowing.validate().is_err());
        assert!(overflowing.point_count().is_err());

        let reversed = TimeSeriesIndex::Regular {
            start_time: 10,
            end_time: 0,
            spacing: 1,
        };
        assert!(reversed.point_count().is_err());
    }

    #[test]
    fn time_at_does_not_overflow() {
        let index = TimeSeriesIndex::regular(0, i64::MAX, i64::MAX / 2).unwrap();
        assert_eq!(index.time_at(2), Some(i64::MAX - 1));
        assert_eq!(index.time_at(3), None);
        assert_eq!(index.time_at(usize::MAX), None);
    }

    #[test]
    fn deserialized_index_can_be_invalid() {
        let index: TimeSeriesIndex =
            serde_json::from_str(r#"{"type":"regular","startTime":0,"endTime":10,"spacing":0}"#).unwrap();
        assert!(index.validate().is_err());
    }

    #[test]
    fn irregular_requires_increasing_times() {
        assert!(TimeSeriesIndex::irregular(vec![1, 5, 9]).is_ok());
        assert!(TimeSeriesIndex::irregular(vec![1, 5, 5]).is_err());
        assert!(TimeSeriesIndex::irregular(vec![]).is_err());
    }

    #[test]
    fn infinite_has_no_point_count() {
        assert_eq!(TimeSeriesIndex::Infinite.point_count(), Ok(None));
        assert_eq!(TimeSeriesIndex::Infinite.time_at(42), Some(42));
    }

    #[test]
    fn metadata_json_shape() {
        let metadata = TimeSeriesMetadata::new(
            "ts1",
            TimeSeriesDataType::Double,
            TimeSeriesIndex::Infinite,
        )
        .with_tag("unit", "MW");
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["dataType"], "DOUBLE");
        assert_eq!(json["index"]["type"], "infinite");
        assert_eq!(json["tags"]["unit"], "MW");
        let back: TimeSeriesMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, metadata);
    }
}
