//! Shared fixtures for the scenario tests: a temp-dir package tree and a
//! small zoo of builders exercising the engine's surface.
#![allow(dead_code)]

use std::path::Path;
use std::rc::Rc;

use async_trait::async_trait;
use kiln_core::{
    AssetId, BuildExtensions, BuildOptions, BuildStep, BuildSummary, Builder,
    BuilderApplication, StepError,
};

/// A root package in a temp directory.
pub struct TestPackage {
    dir: tempfile::TempDir,
}

impl TestPackage {
    pub fn new() -> TestPackage {
        TestPackage {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn delete(&self, rel: &str) {
        std::fs::remove_file(self.dir.path().join(rel)).unwrap();
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.path().join(rel)).ok()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.dir.path().join(rel).exists()
    }

    /// Contents of a hidden output in the engine cache.
    pub fn read_hidden(&self, package: &str, rel: &str) -> Option<String> {
        std::fs::read_to_string(
            self.dir
                .path()
                .join(".kiln/generated")
                .join(package)
                .join(rel),
        )
        .ok()
    }

    pub async fn build(&self, builders: Vec<BuilderApplication>) -> BuildSummary {
        BuildOptions::new(self.root())
            .package_graph(kiln_core::PackageGraph::single("a", self.root()))
            .builders(builders)
            .delete_conflicting_outputs(true)
            .build()
            .await
            .unwrap()
    }
}

/// Copies its primary input to every declared output. Skips silently when
/// the primary input cannot be read, leaving the outputs overdeclared.
pub struct CopyBuilder {
    extensions: BuildExtensions,
}

impl CopyBuilder {
    pub fn new(from: &str, to: &str) -> Rc<CopyBuilder> {
        Rc::new(CopyBuilder {
            extensions: BuildExtensions::parse("copy", [(from, vec![to])]).unwrap(),
        })
    }
}

#[async_trait(?Send)]
impl Builder for CopyBuilder {
    fn build_extensions(&self) -> &BuildExtensions {
        &self.extensions
    }

    async fn build(&self, step: &BuildStep) -> Result<(), StepError> {
        if !step.can_read(step.input_id()).await? {
            return Ok(());
        }
        let bytes = step.read_as_bytes(step.input_id()).await?;
        let outputs: Vec<AssetId> = step.allowed_outputs().iter().cloned().collect();
        for output in outputs {
            step.write_as_bytes(&output, bytes.clone())?;
        }
        Ok(())
    }
}

/// Always writes the same bytes, whatever the input says. Used to exercise
/// early cutoff: the input changes, the output digest does not.
pub struct ConstantBuilder {
    extensions: BuildExtensions,
    contents: String,
}

impl ConstantBuilder {
    pub fn new(from: &str, to: &str, contents: &str) -> Rc<ConstantBuilder> {
        Rc::new(ConstantBuilder {
            extensions: BuildExtensions::parse("constant", [(from, vec![to])]).unwrap(),
            contents: contents.to_string(),
        })
    }
}

#[async_trait(?Send)]
impl Builder for ConstantBuilder {
    fn build_extensions(&self) -> &BuildExtensions {
        &self.extensions
    }

    async fn build(&self, step: &BuildStep) -> Result<(), StepError> {
        // Depend on the primary input without using its content.
        let _ = step.read_as_bytes(step.input_id()).await?;
        let outputs: Vec<AssetId> = step.allowed_outputs().iter().cloned().collect();
        for output in outputs {
            step.write_as_string(&output, &self.contents)?;
        }
        Ok(())
    }
}

/// Declares outputs and writes none of them.
pub struct SilentBuilder {
    extensions: BuildExtensions,
}

impl SilentBuilder {
    pub fn new(from: &str, to: &str) -> Rc<SilentBuilder> {
        Rc::new(SilentBuilder {
            extensions: BuildExtensions::parse("silent", [(from, vec![to])]).unwrap(),
        })
    }
}

#[async_trait(?Send)]
impl Builder for SilentBuilder {
    fn build_extensions(&self) -> &BuildExtensions {
        &self.extensions
    }

    async fn build(&self, _step: &BuildStep) -> Result<(), StepError> {
        Ok(())
    }
}

/// Always fails.
pub struct FailingBuilder {
    extensions: BuildExtensions,
}

impl FailingBuilder {
    pub fn new(from: &str, to: &str) -> Rc<FailingBuilder> {
        Rc::new(FailingBuilder {
            extensions: BuildExtensions::parse("failing", [(from, vec![to])]).unwrap(),
        })
    }
}

#[async_trait(?Send)]
impl Builder for FailingBuilder {
    fn build_extensions(&self) -> &BuildExtensions {
        &self.extensions
    }

    async fn build(&self, _step: &BuildStep) -> Result<(), StepError> {
        Err(StepError::failure("boom"))
    }
}

/// Reads `web/a.txt.used` and `web/a.txt.unused`, reports the latter
/// unused, and writes the used content to its output.
pub struct UnusedReportBuilder {
    extensions: BuildExtensions,
}

impl UnusedReportBuilder {
    pub fn new() -> Rc<UnusedReportBuilder> {
        Rc::new(UnusedReportBuilder {
            extensions: BuildExtensions::parse(
                "unused-report",
                [("^web/a.txt", vec!["web/a.txt.out"])],
            )
            .unwrap(),
        })
    }
}

#[async_trait(?Send)]
impl Builder for UnusedReportBuilder {
    fn build_extensions(&self) -> &BuildExtensions {
        &self.extensions
    }

    async fn build(&self, step: &BuildStep) -> Result<(), StepError> {
        let package = step.input_id().package().to_string();
        let used = AssetId::new(package.clone(), "web/a.txt.used");
        let unused = AssetId::new(package.clone(), "web/a.txt.unused");
        let contents = step.read_as_string(&used).await?;
        let _ = step.read_as_string(&unused).await?;
        step.report_unused_assets([unused]);
        step.write_as_string(&AssetId::new(package, "web/a.txt.out"), contents)
    }
}

/// Reads its own declared output before writing it, asserting the read
/// comes back not-found, then writes normally.
pub struct SelfReadBuilder {
    extensions: BuildExtensions,
}

impl SelfReadBuilder {
    pub fn new(from: &str, to: &str) -> Rc<SelfReadBuilder> {
        Rc::new(SelfReadBuilder {
            extensions: BuildExtensions::parse("self-read", [(from, vec![to])]).unwrap(),
        })
    }
}

#[async_trait(?Send)]
impl Builder for SelfReadBuilder {
    fn build_extensions(&self) -> &BuildExtensions {
        &self.extensions
    }

    async fn build(&self, step: &BuildStep) -> Result<(), StepError> {
        let output = step.allowed_outputs().iter().next().cloned().unwrap();
        match step.read_as_bytes(&output).await {
            Err(StepError::AssetNotFound(_)) => {}
            other => {
                return Err(StepError::failure(format!(
                    "expected not-found reading own output, got {other:?}"
                )))
            }
        }
        let bytes = step.read_as_bytes(step.input_id()).await?;
        step.write_as_bytes(&output, bytes)
    }
}

/// Writes the sorted list of assets matching `web/*.txt`.
pub struct GlobListBuilder {
    extensions: BuildExtensions,
}

impl GlobListBuilder {
    pub fn new() -> Rc<GlobListBuilder> {
        Rc::new(GlobListBuilder {
            extensions: BuildExtensions::parse(
                "glob-list",
                [("^web/index.txt", vec!["web/index.out"])],
            )
            .unwrap(),
        })
    }
}

#[async_trait(?Send)]
impl Builder for GlobListBuilder {
    fn build_extensions(&self) -> &BuildExtensions {
        &self.extensions
    }

    async fn build(&self, step: &BuildStep) -> Result<(), StepError> {
        let matches = step.find_assets("web/*.txt", None).await?;
        let listed = matches
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let out = AssetId::new(step.input_id().package(), "web/index.out");
        step.write_as_string(&out, listed)
    }
}

/// Probes `web/extra.txt` and writes whether it exists.
pub struct MissingProbeBuilder {
    extensions: BuildExtensions,
}

impl MissingProbeBuilder {
    pub fn new() -> Rc<MissingProbeBuilder> {
        Rc::new(MissingProbeBuilder {
            extensions: BuildExtensions::parse(
                "probe-missing",
                [("^web/a.txt", vec!["web/a.txt.probe"])],
            )
            .unwrap(),
        })
    }
}

#[async_trait(?Send)]
impl Builder for MissingProbeBuilder {
    fn build_extensions(&self) -> &BuildExtensions {
        &self.extensions
    }

    async fn build(&self, step: &BuildStep) -> Result<(), StepError> {
        let package = step.input_id().package().to_string();
        let _ = step.read_as_bytes(step.input_id()).await?;
        let exists = step
            .can_read(&AssetId::new(package.clone(), "web/extra.txt"))
            .await?;
        step.write_as_string(
            &AssetId::new(package, "web/a.txt.probe"),
            exists.to_string(),
        )
    }
}

trait BuilderListExt {
    fn builders(self, builders: Vec<BuilderApplication>) -> Self;
}

impl BuilderListExt for BuildOptions {
    fn builders(mut self, builders: Vec<BuilderApplication>) -> Self {
        for application in builders {
            self = self.builder(application);
        }
        self
    }
}
