//! # kiln-graph
//!
//! The asset dependency graph for the kiln build engine.
//!
//! The graph records every asset a build has seen — sources, generated
//! outputs, tombstones for missing reads, engine-internal inputs, resolved
//! globs, whole-package placeholders, and post-process anchors — together
//! with the forward edges between them. It is persisted between builds as a
//! versioned JSON document and drives incremental invalidation.
//!
//! The model keeps forward edges only; the reverse index `input ->
//! consumers` is recomputed on demand via
//! [`AssetGraph::compute_outputs`], never stored.

mod error;
mod graph;
mod node;
mod serialize;

pub use error::GraphError;
pub use graph::{AssetGraph, SourceReconcile};
pub use node::{
    AssetNode, GeneratedNode, GlobNode, InternalNode, MissingSourceNode, PlaceholderKind,
    PlaceholderNode, PostProcessAnchorNode, SourceNode,
};
pub use serialize::GRAPH_VERSION;
