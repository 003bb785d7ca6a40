//! The in-memory asset graph.
//!
//! Stores every [`AssetNode`] by id and provides the invalidation
//! primitives the engine builds on: the on-demand reverse index, recursive
//! dirty marking, and source reconciliation.

use std::collections::BTreeSet;

use kiln_asset::{AssetId, Digest, PackageGraph};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::node::{
    AssetNode, InternalNode, PlaceholderKind, PlaceholderNode, SourceNode,
};

/// Result of reconciling one source asset against the filesystem.
#[derive(Debug, PartialEq)]
pub enum SourceReconcile {
    /// Digest unchanged; nothing to do.
    Unchanged,
    /// Digest changed; outputs have been marked dirty.
    Modified,
    /// Source no longer exists; the node is now a tombstone. Carries the
    /// generated ids that had it as their primary input so the caller can
    /// remove them and their files.
    Deleted { primary_outputs: BTreeSet<AssetId> },
}

/// In-memory graph of all assets participating in a build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetGraph {
    nodes: FxHashMap<AssetId, AssetNode>,
}

impl AssetGraph {
    pub fn new() -> AssetGraph {
        AssetGraph::default()
    }

    /// Construct the initial graph for a clean build: source nodes, internal
    /// nodes, and the two placeholders every package carries. Expected
    /// generated nodes are added by the phase planner afterwards.
    pub fn build(
        sources: impl IntoIterator<Item = SourceNode>,
        internal: impl IntoIterator<Item = InternalNode>,
        packages: &PackageGraph,
    ) -> AssetGraph {
        let mut graph = AssetGraph::new();
        for node in sources {
            graph.add(AssetNode::Source(node));
        }
        for node in internal {
            graph.add(AssetNode::Internal(node));
        }
        for package in packages.packages() {
            for kind in [PlaceholderKind::Package, PlaceholderKind::Lib] {
                let id = PlaceholderNode::id_for(package.name(), kind);
                graph.add(AssetNode::Placeholder(PlaceholderNode { id, kind }));
            }
        }
        graph
    }

    /// Insert a node, replacing any node with the same id.
    pub fn add(&mut self, node: AssetNode) {
        self.nodes.insert(node.id().clone(), node);
    }

    pub fn get(&self, id: &AssetId) -> Option<&AssetNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &AssetId) -> Option<&mut AssetNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn remove(&mut self, id: &AssetId) -> Option<AssetNode> {
        self.nodes.remove(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, in arbitrary order.
    pub fn nodes(&self) -> impl Iterator<Item = &AssetNode> {
        self.nodes.values()
    }

    /// All nodes sorted by id, for deterministic serialization and tests.
    pub fn sorted_nodes(&self) -> Vec<&AssetNode> {
        let mut nodes: Vec<&AssetNode> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    /// The reverse index `input -> consumers`. Consumers are generated
    /// nodes that recorded the input (or have it as their primary input)
    /// and post-process anchors keyed on it.
    ///
    /// Recomputed on every call; never stored.
    pub fn compute_outputs(&self) -> FxHashMap<AssetId, BTreeSet<AssetId>> {
        let mut index: FxHashMap<AssetId, BTreeSet<AssetId>> = FxHashMap::default();
        for node in self.nodes.values() {
            match node {
                AssetNode::Generated(g) => {
                    for input in g.inputs.iter().chain(std::iter::once(&g.primary_input)) {
                        index.entry(input.clone()).or_default().insert(g.id.clone());
                    }
                }
                AssetNode::PostProcessAnchor(a) => {
                    index
                        .entry(a.primary_input.clone())
                        .or_default()
                        .insert(a.id.clone());
                }
                _ => {}
            }
        }
        index
    }

    /// Mark a node dirty along with its transitive consumers.
    pub fn mark_dirty(&mut self, id: &AssetId) {
        let index = self.compute_outputs();
        self.mark_dirty_with(id, &index);
    }

    /// [`mark_dirty`](Self::mark_dirty) with a precomputed reverse index,
    /// for callers invalidating many roots at once.
    pub fn mark_dirty_with(
        &mut self,
        id: &AssetId,
        index: &FxHashMap<AssetId, BTreeSet<AssetId>>,
    ) {
        let mut queue = vec![id.clone()];
        let mut seen: BTreeSet<AssetId> = BTreeSet::new();
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            match self.nodes.get_mut(&current) {
                Some(AssetNode::Generated(g)) => {
                    if !g.dirty {
                        trace!(id = %g.id, "marking generated node dirty");
                    }
                    g.dirty = true;
                }
                Some(AssetNode::PostProcessAnchor(a)) => a.dirty = true,
                _ => {}
            }
            if let Some(consumers) = index.get(&current) {
                queue.extend(consumers.iter().cloned());
            }
        }
    }

    /// Reconcile one source node against its current on-disk state.
    ///
    /// `current` is `Some((digest, mtime))` when the file still exists and
    /// `None` when it was deleted. Deletion converts the node to a
    /// [`MissingSourceNode`](crate::node::MissingSourceNode) tombstone.
    pub fn reconcile_source(
        &mut self,
        id: &AssetId,
        current: Option<(Digest, Option<u64>)>,
    ) -> SourceReconcile {
        let Some(AssetNode::Source(source)) = self.nodes.get(id) else {
            return SourceReconcile::Unchanged;
        };
        match current {
            Some((digest, mtime)) => {
                if source.digest == Some(digest) {
                    // Content identical; just refresh the mtime fast path.
                    if let Some(AssetNode::Source(s)) = self.nodes.get_mut(id) {
                        s.last_modified_millis = mtime;
                    }
                    return SourceReconcile::Unchanged;
                }
                if let Some(AssetNode::Source(s)) = self.nodes.get_mut(id) {
                    s.digest = Some(digest);
                    s.last_modified_millis = mtime;
                }
                self.mark_dirty(id);
                SourceReconcile::Modified
            }
            None => {
                let primary_outputs = source.primary_outputs.clone();
                self.mark_dirty(id);
                self.add(AssetNode::MissingSource(crate::node::MissingSourceNode {
                    id: id.clone(),
                }));
                SourceReconcile::Deleted { primary_outputs }
            }
        }
    }

    /// Remove a generated node and, transitively, every generated node that
    /// had it as a primary input. Consumers via non-primary inputs are
    /// marked dirty instead. Returns the removed generated nodes so the
    /// caller can unlink their files.
    pub fn remove_generated_subtree(&mut self, id: &AssetId) -> Vec<crate::node::GeneratedNode> {
        let mut removed = Vec::new();
        let mut queue = vec![id.clone()];
        while let Some(current) = queue.pop() {
            self.mark_dirty(&current);
            match self.nodes.remove(&current) {
                Some(AssetNode::Generated(g)) => {
                    queue.extend(g.primary_outputs.iter().cloned());
                    removed.push(g);
                }
                Some(other) => {
                    // Not generated after all; put it back untouched.
                    self.add(other);
                }
                None => {}
            }
        }
        removed
    }

    /// Replace the outputs owned by a post-process anchor.
    pub fn update_post_process_outputs(&mut self, id: &AssetId, outputs: BTreeSet<AssetId>) {
        if let Some(AssetNode::PostProcessAnchor(anchor)) = self.nodes.get_mut(id) {
            anchor.outputs = outputs;
        }
    }
}
