//! # kiln-asset
//!
//! Foundation types for the kiln build engine: asset identity, package
//! structure, content digests, and glob matching.
//!
//! Everything here is deliberately free of engine policy. Higher layers
//! (`kiln-graph`, `kiln-core`) decide what ids mean for scheduling and
//! invalidation; this crate only gives them stable, cheap value types.

mod digest;
mod glob;
mod id;
mod package_graph;

pub use digest::Digest;
pub use glob::{Glob, GlobError};
pub use id::{AssetId, ParseIdError, HIDDEN_PREFIX};
pub use package_graph::{Package, PackageGraph, PackageGraphError};
