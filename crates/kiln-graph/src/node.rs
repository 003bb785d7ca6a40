//! The asset node union.
//!
//! Every participant in a build is one [`AssetNode`] variant. The model uses
//! forward edges only (`inputs`, `primary_input`, `primary_outputs`); the
//! reverse index `input -> consumers` is recomputed on demand and never
//! stored, so there is no second bookkeeping structure to drift.

use std::collections::BTreeSet;

use kiln_asset::{AssetId, Digest};
use serde::{Deserialize, Serialize};

/// A node in the asset graph, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssetNode {
    Source(SourceNode),
    Generated(GeneratedNode),
    MissingSource(MissingSourceNode),
    Internal(InternalNode),
    Glob(GlobNode),
    Placeholder(PlaceholderNode),
    PostProcessAnchor(PostProcessAnchorNode),
}

/// An on-disk input discovered by the source scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceNode {
    pub id: AssetId,
    /// Digest of identity plus content. Computed lazily; `None` until the
    /// asset is first read or used as a step input.
    pub digest: Option<Digest>,
    /// Filesystem mtime in milliseconds since the epoch, used as a fast
    /// path to skip re-hashing unchanged files. Not part of the digest.
    pub last_modified_millis: Option<u64>,
    /// Generated nodes whose primary input this source is.
    pub primary_outputs: BTreeSet<AssetId>,
}

impl SourceNode {
    pub fn new(id: AssetId) -> Self {
        Self {
            id,
            digest: None,
            last_modified_millis: None,
            primary_outputs: BTreeSet::new(),
        }
    }
}

/// An output produced (or expected to be produced) by a builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedNode {
    pub id: AssetId,
    pub phase_number: usize,
    pub primary_input: AssetId,
    /// Hidden outputs live under the engine cache and are only visible to
    /// later phases that read them explicitly.
    pub is_hidden: bool,
    /// Whether the builder actually wrote bytes for this output. A declared
    /// but unwritten output is "overdeclared" and must never become an
    /// input of a later step.
    pub was_output: bool,
    /// `Some(true)` on success, `Some(false)` on failure, `None` while the
    /// producing action has never completed.
    pub result: Option<bool>,
    /// Needs (re)building. Always true for never-built nodes.
    pub dirty: bool,
    /// Digest of the written bytes; `None` on failure or when nothing was
    /// written.
    pub digest: Option<Digest>,
    /// Every asset the producing step read, including negative reads.
    pub inputs: BTreeSet<AssetId>,
    /// Combined digest of `inputs` at commit time, used for early cutoff.
    pub inputs_digest: Option<Digest>,
    /// Generated nodes of later phases whose primary input this node is.
    pub primary_outputs: BTreeSet<AssetId>,
}

impl GeneratedNode {
    /// An expected output that has never been built.
    pub fn expected(
        id: AssetId,
        primary_input: AssetId,
        phase_number: usize,
        is_hidden: bool,
    ) -> Self {
        Self {
            id,
            phase_number,
            primary_input,
            is_hidden,
            was_output: false,
            result: None,
            dirty: true,
            digest: None,
            inputs: BTreeSet::new(),
            inputs_digest: None,
            primary_outputs: BTreeSet::new(),
        }
    }

    /// Built, succeeded, and produced bytes that are still current.
    pub fn is_readable(&self) -> bool {
        self.result == Some(true) && self.was_output
    }
}

/// Tombstone for an asset id that was read but does not exist. Retained so
/// that the asset's later creation invalidates its readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingSourceNode {
    pub id: AssetId,
}

/// An engine-owned input that affects the whole build: the package
/// configuration, build configuration files, and the builder identity.
/// Any change forces a full rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalNode {
    pub id: AssetId,
    pub digest: Option<Digest>,
}

/// A resolved glob: the pattern, the phase that evaluated it, and the ids it
/// matched. Invalidated when the matching set changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobNode {
    pub id: AssetId,
    pub phase_number: usize,
    pub package: String,
    pub pattern: String,
    pub results: BTreeSet<AssetId>,
}

impl GlobNode {
    /// Deterministic id for a `(package, phase, pattern)` triple. The path
    /// lives in a reserved namespace no real asset can occupy.
    pub fn id_for(package: &str, phase_number: usize, pattern: &str) -> AssetId {
        let hash = blake3::hash(pattern.as_bytes());
        let hex: String = hash.as_bytes()[..8].iter().map(|b| format!("{b:02x}")).collect();
        AssetId::new(package, format!("$glob${phase_number}${hex}"))
    }

    /// Digest of the result set, for use in consumers' input digests.
    pub fn results_digest(&self) -> Digest {
        let joined = self
            .results
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        Digest::compute(&self.id, joined.as_bytes())
    }
}

/// Which synthetic whole-package input a placeholder stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaceholderKind {
    /// `$package$`: the whole package.
    Package,
    /// `$lib$`: the package's public `lib/` space.
    Lib,
}

impl PlaceholderKind {
    pub fn path(&self) -> &'static str {
        match self {
            PlaceholderKind::Package => "$package$",
            PlaceholderKind::Lib => "$lib$",
        }
    }
}

/// Synthetic input used as the primary input of whole-package builders.
/// Placeholders exist, but can never be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderNode {
    pub id: AssetId,
    pub kind: PlaceholderKind,
}

impl PlaceholderNode {
    pub fn id_for(package: &str, kind: PlaceholderKind) -> AssetId {
        AssetId::new(package, kind.path())
    }
}

/// One per `(source, post-process action)` pair; owns the outputs the
/// action produced for that source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessAnchorNode {
    pub id: AssetId,
    pub primary_input: AssetId,
    pub action_key: String,
    pub dirty: bool,
    pub outputs: BTreeSet<AssetId>,
}

impl PostProcessAnchorNode {
    pub fn id_for(primary_input: &AssetId, action_key: &str) -> AssetId {
        AssetId::new(
            primary_input.package(),
            format!("$post${action_key}${}", primary_input.path()),
        )
    }

    pub fn new(primary_input: AssetId, action_key: impl Into<String>) -> Self {
        let action_key = action_key.into();
        Self {
            id: Self::id_for(&primary_input, &action_key),
            primary_input,
            action_key,
            dirty: true,
            outputs: BTreeSet::new(),
        }
    }
}

impl AssetNode {
    /// The node's identity, regardless of kind.
    pub fn id(&self) -> &AssetId {
        match self {
            AssetNode::Source(n) => &n.id,
            AssetNode::Generated(n) => &n.id,
            AssetNode::MissingSource(n) => &n.id,
            AssetNode::Internal(n) => &n.id,
            AssetNode::Glob(n) => &n.id,
            AssetNode::Placeholder(n) => &n.id,
            AssetNode::PostProcessAnchor(n) => &n.id,
        }
    }

    pub fn as_source(&self) -> Option<&SourceNode> {
        match self {
            AssetNode::Source(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_source_mut(&mut self) -> Option<&mut SourceNode> {
        match self {
            AssetNode::Source(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_generated(&self) -> Option<&GeneratedNode> {
        match self {
            AssetNode::Generated(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_generated_mut(&mut self) -> Option<&mut GeneratedNode> {
        match self {
            AssetNode::Generated(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_glob(&self) -> Option<&GlobNode> {
        match self {
            AssetNode::Glob(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_missing_source(&self) -> bool {
        matches!(self, AssetNode::MissingSource(_))
    }
}
