//! Typed key/value metadata attached to every node.
//!
//! Values live in four independent buckets (string, double, int, boolean).
//! The same key may exist in several buckets at once; lookups always name
//! the bucket they expect.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The value bucket a metadata key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataKind {
    String,
    Double,
    Int,
    Boolean,
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "String",
            Self::Double => "Double",
            Self::Int => "Int",
            Self::Boolean => "Boolean",
        };
        write!(f, "{s}")
    }
}

/// Typed key/value bag attached to a node.
///
/// Equality is structural: two maps holding the same entries compare equal
/// regardless of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    strings: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    doubles: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    ints: BTreeMap<String, i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    booleans: BTreeMap<String, bool>,
}

impl NodeMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_string(key, value);
        self
    }

    pub fn with_double(mut self, key: impl Into<String>, value: f64) -> Self {
        self.set_double(key, value);
        self
    }

    pub fn with_int(mut self, key: impl Into<String>, value: i32) -> Self {
        self.set_int(key, value);
        self
    }

    pub fn with_boolean(mut self, key: impl Into<String>, value: bool) -> Self {
        self.set_boolean(key, value);
        self
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.strings.insert(key.into(), value.into());
        self
    }

    pub fn set_double(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.doubles.insert(key.into(), value);
        self
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i32) -> &mut Self {
        self.ints.insert(key.into(), value);
        self
    }

    pub fn set_boolean(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.booleans.insert(key.into(), value);
        self
    }

    /// Look up a string value, failing with [`TypeError::MetadataNotFound`]
    /// when the key is absent from the string bucket.
    pub fn get_string(&self, key: &str) -> Result<&str, TypeError> {
        self.strings
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| not_found(MetadataKind::String, key))
    }

    pub fn get_double(&self, key: &str) -> Result<f64, TypeError> {
        self.doubles
            .get(key)
            .copied()
            .ok_or_else(|| not_found(MetadataKind::Double, key))
    }

    pub fn get_int(&self, key: &str) -> Result<i32, TypeError> {
        self.ints
            .get(key)
            .copied()
            .ok_or_else(|| not_found(MetadataKind::Int, key))
    }

    pub fn get_boolean(&self, key: &str) -> Result<bool, TypeError> {
        self.booleans
            .get(key)
            .copied()
            .ok_or_else(|| not_found(MetadataKind::Boolean, key))
    }

    pub fn strings(&self) -> &BTreeMap<String, String> {
        &self.strings
    }

    pub fn doubles(&self) -> &BTreeMap<String, f64> {
        &self.doubles
    }

    pub fn ints(&self) -> &BTreeMap<String, i32> {
        &self.ints
    }

    pub fn booleans(&self) -> &BTreeMap<String, bool> {
        &self.booleans
    }

    /// Returns `true` if no bucket holds any entry.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
            && self.doubles.is_empty()
            && self.ints.is_empty()
            && self.booleans.is_empty()
    }
}

fn not_found(kind: MetadataKind, key: &str) -> TypeError {
    TypeError::MetadataNotFound {
        kind,
        key: key.to_string(),
    }
}
