//! Foundation types for the application file system (AFS).
//!
//! Every artifact stored in AFS is a *node*: a named, typed entity carrying
//! key/value metadata, named binary data streams, time series, and named
//! dependency edges to other nodes. This crate provides the identity and
//! descriptive types shared by every other AFS crate.
//!
//! # Key Types
//!
//! - [`NodeId`] -- Opaque, globally unique node identifier (UUID v7)
//! - [`NodeInfo`] -- Descriptive attributes of a stored node
//! - [`NodeMetadata`] -- Typed key/value bag (string, double, int, boolean)
//! - [`NodeDependency`] -- A named dependency edge as reported by storage

pub mod error;
pub mod id;
pub mod metadata;
pub mod node;

pub use error::TypeError;
pub use id::NodeId;
pub use metadata::{MetadataKind, NodeMetadata};
pub use node::{now_millis, NodeDependency, NodeInfo};
