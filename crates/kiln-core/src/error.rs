//! Error types for the build engine.
//!
//! The hierarchy separates three audiences:
//! - [`BuildError`] — fatal, engine-level failures that abort the build
//!   (setup problems, cycles, I/O on engine-owned state).
//! - [`StepError`] — call-site results surfaced to builder authors through
//!   [`BuildStep`](crate::BuildStep) operations. A `StepError` fails one
//!   step, never the whole build.
//! - Builder failures are recorded per step; the overall build completes
//!   and reports `Failure` status when any remain.

use std::path::PathBuf;

use kiln_asset::AssetId;
use thiserror::Error;

/// Result alias for engine-level operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Static validation failures of builder extension declarations.
///
/// These are configuration errors: they abort the build before any step
/// runs and map to exit code 2.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtensionError {
    /// A builder's output extension would match one of its own input
    /// extensions, so the builder would feed itself.
    #[error(
        "builder `{builder}` would feed itself: output extension `{output}` \
         overlaps input extension `{input}`"
    )]
    SelfFeeding {
        builder: String,
        input: String,
        output: String,
    },

    /// A builder declared no extensions at all.
    #[error("builder `{0}` declares no build extensions")]
    EmptyExtensions(String),

    /// An input pattern or output template could not be parsed.
    #[error("builder `{builder}` has an invalid extension pattern `{pattern}`: {reason}")]
    InvalidPattern {
        builder: String,
        pattern: String,
        reason: String,
    },

    /// Two phases declare the same concrete output path.
    #[error(
        "output `{output}` is declared by both phase {first} and phase {second}"
    )]
    DuplicateOutput {
        output: AssetId,
        first: usize,
        second: usize,
    },
}

/// Errors loading or interpreting build configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read build config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid build config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid glob `{pattern}` in build config: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: kiln_asset::GlobError,
    },
}

/// Call-site errors surfaced to builder code through a build step.
#[derive(Debug, Error)]
pub enum StepError {
    /// Explicit read of an asset that does not exist. Builders that are
    /// unsure should call `can_read` first.
    #[error("asset not found: {0}")]
    AssetNotFound(AssetId),

    /// The step attempted to read an asset outside its allowed visibility.
    #[error("invalid input {id}: {reason}")]
    InvalidInput { id: AssetId, reason: String },

    /// The step attempted to write an asset it did not declare.
    #[error("invalid output {0}: not among this step's allowed outputs")]
    InvalidOutput(AssetId),

    /// A string read of bytes that are not valid UTF-8.
    #[error("asset {0} is not valid UTF-8")]
    InvalidUtf8(AssetId),

    /// An I/O failure while reading or staging an asset.
    #[error("io error on {id}: {source}")]
    Io {
        id: AssetId,
        #[source]
        source: std::io::Error,
    },

    /// A failure raised by the builder's own logic.
    #[error("{0}")]
    Failure(String),

    /// An engine invariant was violated while serving this step (for
    /// example a dependency cycle discovered during an on-demand read).
    /// The engine aborts the build once the step returns.
    #[error("fatal build error: {0}")]
    Fatal(String),
}

impl StepError {
    /// Convenience constructor for builder-domain failures.
    pub fn failure(message: impl Into<String>) -> StepError {
        StepError::Failure(message.into())
    }
}

/// One failed builder invocation, reported at the end of the build.
#[derive(Debug, Clone)]
pub struct FailureReport {
    /// The primary input of the failed step.
    pub primary_input: AssetId,
    /// The builder application key.
    pub builder_key: String,
    /// The phase the step ran in.
    pub phase_number: usize,
    /// The failure message from the builder.
    pub message: String,
}

impl std::fmt::Display for FailureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, phase {}): {}",
            self.primary_input, self.builder_key, self.phase_number, self.message
        )
    }
}

/// Fatal, engine-level build errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Setup failed before any step could run.
    #[error("cannot build: {0}")]
    CannotBuild(String),

    /// Builder extension validation failed. Configuration error.
    #[error(transparent)]
    Extension(#[from] ExtensionError),

    /// Build configuration could not be loaded. Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Package configuration could not be loaded. Configuration error.
    #[error(transparent)]
    Packages(#[from] kiln_asset::PackageGraphError),

    /// Persisting or encoding the asset graph failed.
    #[error(transparent)]
    Graph(#[from] kiln_graph::GraphError),

    /// An I/O failure on engine-owned state.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A dependency cycle across builders or phases.
    #[error("dependency cycle detected: {chain}")]
    Cycle { chain: String },

    /// A `--build-filter` pattern could not be parsed. Configuration error.
    #[error(transparent)]
    Filter(#[from] crate::filters::FilterParseError),
}

impl BuildError {
    /// Whether this error is a configuration error (CLI exit code 2)
    /// rather than a build failure (exit code 1).
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BuildError::Extension(_)
                | BuildError::Config(_)
                | BuildError::Packages(_)
                | BuildError::Cycle { .. }
                | BuildError::Filter(_)
        )
    }
}
