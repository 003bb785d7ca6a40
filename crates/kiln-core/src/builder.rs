//! Builder traits and applications.
//!
//! A [`Builder`] is a transformation from one primary input to the outputs
//! its [`BuildExtensions`] declare. Builders receive a
//! [`BuildStep`](crate::BuildStep) capability object and have no other way
//! to touch the filesystem or the graph; everything a builder reads is
//! recorded as a dependency.

use std::any::Any;
use std::rc::Rc;

use async_trait::async_trait;

use crate::error::StepError;
use crate::extensions::BuildExtensions;
use crate::phase::{InputSet, TargetPackageFilter};
use crate::step::{BuildStep, PostProcessBuildStep};

/// A code generator: consumes a primary input, produces the outputs its
/// extension declaration derives from that input.
///
/// Builders must be deterministic: the same inputs must produce the same
/// bytes. The engine relies on this for early cutoff.
#[async_trait(?Send)]
pub trait Builder {
    /// The static mapping from input extensions to output extensions.
    fn build_extensions(&self) -> &BuildExtensions;

    /// Generate outputs for `step.input_id()`.
    ///
    /// Returning an error marks the step failed; its outputs are treated
    /// as absent by later steps and the overall build reports failure.
    async fn build(&self, step: &BuildStep) -> Result<(), StepError>;
}

/// A post-process action: runs after all in-build phases, once per matching
/// source, producing cache-only outputs owned by an anchor node.
#[async_trait(?Send)]
pub trait PostProcessBuilder {
    /// Input extensions (plain suffixes) this action applies to.
    fn input_extensions(&self) -> &[String];

    /// Process one primary input.
    async fn build(&self, step: &PostProcessBuildStep) -> Result<(), StepError>;
}

/// An opaque capability for source-language semantic queries, forwarded to
/// builders untouched. Embedders downcast to their concrete resolver.
pub trait Resolver: Any {
    fn as_any(&self) -> &dyn Any;
}

/// One application of a builder in the phase list: the builder itself plus
/// the scoping that controls where and how it runs.
#[derive(Clone)]
pub struct BuilderApplication {
    pub(crate) key: String,
    pub(crate) builder: Rc<dyn Builder>,
    pub(crate) target_packages: TargetPackageFilter,
    pub(crate) generate_for: Option<InputSet>,
    pub(crate) is_optional: bool,
    pub(crate) hide_output: bool,
}

impl BuilderApplication {
    /// Apply `builder` to the root package under the given key.
    pub fn new(key: impl Into<String>, builder: Rc<dyn Builder>) -> BuilderApplication {
        BuilderApplication {
            key: key.into(),
            builder,
            target_packages: TargetPackageFilter::RootOnly,
            generate_for: None,
            is_optional: false,
            hide_output: false,
        }
    }

    /// Apply to every package in the build.
    pub fn to_all_packages(mut self) -> Self {
        self.target_packages = TargetPackageFilter::All;
        self
    }

    /// Apply only to the named packages.
    pub fn to_packages(mut self, packages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.target_packages =
            TargetPackageFilter::Only(packages.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict the inputs this application considers.
    pub fn generate_for(mut self, inputs: InputSet) -> Self {
        self.generate_for = Some(inputs);
        self
    }

    /// Optional phases run an action only when a later step demands one of
    /// its outputs.
    pub fn optional(mut self, optional: bool) -> Self {
        self.is_optional = optional;
        self
    }

    /// Hidden outputs go to the engine cache instead of the source tree
    /// and are only visible to steps that read them explicitly.
    pub fn hide_output(mut self, hide: bool) -> Self {
        self.hide_output = hide;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for BuilderApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderApplication")
            .field("key", &self.key)
            .field("target_packages", &self.target_packages)
            .field("is_optional", &self.is_optional)
            .field("hide_output", &self.hide_output)
            .finish_non_exhaustive()
    }
}

/// One application of a post-process action.
#[derive(Clone)]
pub struct PostProcessApplication {
    pub(crate) key: String,
    pub(crate) builder: Rc<dyn PostProcessBuilder>,
    pub(crate) target_packages: TargetPackageFilter,
    pub(crate) generate_for: Option<InputSet>,
}

impl PostProcessApplication {
    pub fn new(
        key: impl Into<String>,
        builder: Rc<dyn PostProcessBuilder>,
    ) -> PostProcessApplication {
        PostProcessApplication {
            key: key.into(),
            builder,
            target_packages: TargetPackageFilter::RootOnly,
            generate_for: None,
        }
    }

    pub fn to_all_packages(mut self) -> Self {
        self.target_packages = TargetPackageFilter::All;
        self
    }

    pub fn generate_for(mut self, inputs: InputSet) -> Self {
        self.generate_for = Some(inputs);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for PostProcessApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessApplication")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
