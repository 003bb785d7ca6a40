//! Versioned graph persistence.
//!
//! The graph is stored as one self-describing JSON document. The format
//! carries a single integer version; on load, anything other than an exact
//! match discards the stored graph and forces a full rebuild. There is no
//! migration path, by design.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::AssetGraph;
use crate::node::AssetNode;

/// Current serialization format version. Bump on any encoding change.
pub const GRAPH_VERSION: u32 = 3;

#[derive(Serialize)]
struct SerializedGraphRef<'a> {
    version: u32,
    nodes: Vec<&'a AssetNode>,
}

#[derive(Deserialize)]
struct SerializedGraph {
    version: u32,
    #[serde(default)]
    nodes: Vec<AssetNode>,
}

/// Only the version field, decoded first so a mismatched document never has
/// its nodes parsed (their shape may have changed between versions).
#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

impl AssetGraph {
    /// Encode to the versioned JSON format, nodes sorted by id.
    pub fn serialize(&self) -> Result<Vec<u8>, GraphError> {
        let doc = SerializedGraphRef {
            version: GRAPH_VERSION,
            nodes: self.sorted_nodes(),
        };
        serde_json::to_vec(&doc).map_err(GraphError::Serialize)
    }

    /// Decode a previously serialized graph.
    ///
    /// # Errors
    ///
    /// [`GraphError::VersionMismatch`] when the stored version is not
    /// exactly [`GRAPH_VERSION`]; [`GraphError::Deserialize`] for corrupt
    /// documents. Callers treat both as "start from an empty graph".
    pub fn deserialize(bytes: &[u8]) -> Result<AssetGraph, GraphError> {
        let probe: VersionProbe =
            serde_json::from_slice(bytes).map_err(GraphError::Deserialize)?;
        match probe.version {
            Some(found) if found == GRAPH_VERSION => {}
            found => {
                return Err(GraphError::VersionMismatch {
                    expected: GRAPH_VERSION,
                    found,
                })
            }
        }
        let doc: SerializedGraph =
            serde_json::from_slice(bytes).map_err(GraphError::Deserialize)?;
        let mut graph = AssetGraph::new();
        for node in doc.nodes {
            graph.add(node);
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{GeneratedNode, SourceNode};
    use kiln_asset::AssetId;
    use pretty_assertions::assert_eq;

    fn sample_graph() -> AssetGraph {
        let mut graph = AssetGraph::new();
        let mut source = SourceNode::new(AssetId::new("a", "web/a.txt"));
        source.primary_outputs.insert(AssetId::new("a", "web/a.txt.copy"));
        graph.add(AssetNode::Source(source));

        let mut g = GeneratedNode::expected(
            AssetId::new("a", "web/a.txt.copy"),
            AssetId::new("a", "web/a.txt"),
            0,
            true,
        );
        g.result = Some(true);
        g.was_output = true;
        g.dirty = false;
        g.inputs.insert(AssetId::new("a", "web/a.txt"));
        graph.add(AssetNode::Generated(g));
        graph
    }

    #[test]
    fn test_round_trip_is_structural_identity() {
        let graph = sample_graph();
        let bytes = graph.serialize().unwrap();
        let back = AssetGraph::deserialize(&bytes).unwrap();
        assert_eq!(back, graph);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let graph = sample_graph();
        let mut doc: serde_json::Value =
            serde_json::from_slice(&graph.serialize().unwrap()).unwrap();
        doc["version"] = serde_json::json!(GRAPH_VERSION + 1);
        let err = AssetGraph::deserialize(&serde_json::to_vec(&doc).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            GraphError::VersionMismatch {
                expected: GRAPH_VERSION,
                found: Some(v)
            } if v == GRAPH_VERSION + 1
        ));
    }

    #[test]
    fn test_missing_version_rejected() {
        let err = AssetGraph::deserialize(b"{\"nodes\": []}").unwrap_err();
        assert!(matches!(
            err,
            GraphError::VersionMismatch { found: None, .. }
        ));
    }

    #[test]
    fn test_corrupt_document_rejected() {
        assert!(matches!(
            AssetGraph::deserialize(b"not json"),
            Err(GraphError::Deserialize(_))
        ));
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let a = sample_graph().serialize().unwrap();
        let b = sample_graph().serialize().unwrap();
        assert_eq!(a, b);
    }
}
