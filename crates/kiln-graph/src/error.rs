//! Graph error types.

use thiserror::Error;

/// Errors from graph serialization and persistence.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Failed to encode the graph.
    #[error("failed to serialize asset graph: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The stored document is not valid JSON or has an unexpected shape.
    #[error("failed to deserialize asset graph: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// The stored version is not the current version. Never migrated; the
    /// caller discards the graph and performs a full rebuild.
    #[error("asset graph version mismatch: expected {expected}, found {found:?}")]
    VersionMismatch { expected: u32, found: Option<u32> },
}
