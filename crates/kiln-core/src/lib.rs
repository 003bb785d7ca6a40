//! # kiln-core
//!
//! The kiln build engine: an incremental, multi-phase code-generation
//! pipeline over a package-structured source tree.
//!
//! Embedders register [`Builder`]s through [`BuilderApplication`]s, point
//! [`BuildOptions`] at a root package, and run builds. The engine plans one
//! phase per builder application, executes them in order with at most one
//! action running at a time, records every read as a dependency, and
//! persists an asset graph so the next build only reruns what changed.
//!
//! ```no_run
//! use std::rc::Rc;
//! use kiln_core::{BuildOptions, BuilderApplication};
//! # use kiln_core::{Builder, BuildExtensions, BuildStep, StepError};
//! # use async_trait::async_trait;
//! # struct CopyBuilder { extensions: BuildExtensions }
//! # #[async_trait(?Send)]
//! # impl Builder for CopyBuilder {
//! #     fn build_extensions(&self) -> &BuildExtensions { &self.extensions }
//! #     async fn build(&self, step: &BuildStep) -> Result<(), StepError> {
//! #         let bytes = step.read_as_bytes(step.input_id()).await?;
//! #         let out = step.allowed_outputs().iter().next().unwrap().clone();
//! #         step.write_as_bytes(&out, bytes)
//! #     }
//! # }
//!
//! # async fn example() -> kiln_core::Result<()> {
//! let copy = Rc::new(CopyBuilder {
//!     extensions: BuildExtensions::parse("copy", [(".txt", vec![".txt.copy"])])?,
//! });
//! let summary = BuildOptions::new(".")
//!     .builder(BuilderApplication::new("copy", copy))
//!     .build()
//!     .await?;
//! assert!(summary.succeeded());
//! # Ok(())
//! # }
//! ```

mod build;
mod builder;
mod config;
mod error;
mod extensions;
mod filters;
mod invalidation;
mod phase;
mod planner;
mod rw;
mod scan;
mod scheduler;
mod step;

pub use build::{BuildOptions, BuildStatus, BuildSummary, PACKAGES_FILE};
pub use builder::{
    Builder, BuilderApplication, PostProcessApplication, PostProcessBuilder, Resolver,
};
pub use config::{BuildConfig, BuilderOverride, SourcesConfig, CONFIG_FILE};
pub use error::{
    BuildError, ConfigError, ExtensionError, FailureReport, Result, StepError,
};
pub use extensions::BuildExtensions;
pub use filters::{BuildFilter, FilterParseError};
pub use phase::{BuildPhase, BuildPhases, InBuildPhase, InputSet, TargetPackageFilter};
pub use rw::CACHE_DIR;
pub use step::{BuildStep, PostProcessBuildStep};

// Re-export the foundation types embedders touch directly.
pub use kiln_asset::{AssetId, Digest, Glob, PackageGraph};
pub use kiln_graph::{AssetGraph, AssetNode, GRAPH_VERSION};
