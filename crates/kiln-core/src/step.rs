//! The per-invocation build step.
//!
//! A [`BuildStep`] is the only capability a builder receives. Every read —
//! successful or not — is recorded as a dependency of the step's outputs;
//! every write is staged in an overlay and only reaches disk when the step
//! commits. Reads of the step's own staged writes see the staged bytes
//! (read-your-writes); reads of outputs the step has not produced yet
//! return not-found.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use kiln_asset::AssetId;
use rustc_hash::FxHashMap;

use crate::builder::Resolver;
use crate::error::StepError;
use crate::scheduler::RunnerInner;

/// Mutable per-step state, buffered until commit.
#[derive(Debug, Default)]
pub(crate) struct StepState {
    /// Every asset id this step observed, including negative reads.
    pub inputs: BTreeSet<AssetId>,
    /// Staged writes; flushed to disk only on successful commit.
    pub overlay: FxHashMap<AssetId, Vec<u8>>,
    /// Memoized `can_read` answers, so mid-step filesystem changes cannot
    /// flip an answer the builder already acted on.
    pub can_read_cache: FxHashMap<AssetId, bool>,
    /// Ids reported unused; subtracted from `inputs` at commit.
    pub unused: BTreeSet<AssetId>,
}

/// Capability object handed to a [`Builder`](crate::Builder) for one
/// invocation.
pub struct BuildStep {
    pub(crate) runner: Rc<RunnerInner>,
    pub(crate) phase_number: usize,
    pub(crate) builder_key: String,
    pub(crate) primary_input: AssetId,
    /// The package this step runs on behalf of; visibility is judged from
    /// here.
    pub(crate) package: String,
    pub(crate) allowed_outputs: BTreeSet<AssetId>,
    pub(crate) options: serde_json::Value,
    pub(crate) state: RefCell<StepState>,
}

impl BuildStep {
    /// The primary input that caused this builder to run.
    pub fn input_id(&self) -> &AssetId {
        &self.primary_input
    }

    /// The outputs this step may write, derived from the builder's
    /// extension declaration.
    pub fn allowed_outputs(&self) -> &BTreeSet<AssetId> {
        &self.allowed_outputs
    }

    /// Opaque per-builder options from the package's build configuration.
    pub fn options(&self) -> &serde_json::Value {
        &self.options
    }

    /// The opaque semantic-query capability, when the embedder installed
    /// one.
    pub fn resolver(&self) -> Option<&dyn Resolver> {
        self.runner.resolver.as_ref().map(|r| r.as_ref())
    }

    /// Read an asset's bytes, recording it as an input of this step.
    ///
    /// # Errors
    ///
    /// [`StepError::AssetNotFound`] when the asset does not exist (the
    /// negative read is still recorded, so the asset's later creation
    /// reruns this step); [`StepError::InvalidInput`] when the asset is
    /// outside this step's visibility.
    pub async fn read_as_bytes(&self, id: &AssetId) -> Result<Vec<u8>, StepError> {
        let staged = self.state.borrow().overlay.get(id).cloned();
        if let Some(bytes) = staged {
            self.state.borrow_mut().inputs.insert(id.clone());
            return Ok(bytes);
        }
        self.runner.clone().read_for_step(self, id).await
    }

    /// Read an asset as UTF-8 text.
    pub async fn read_as_string(&self, id: &AssetId) -> Result<String, StepError> {
        let bytes = self.read_as_bytes(id).await?;
        String::from_utf8(bytes).map_err(|_| StepError::InvalidUtf8(id.clone()))
    }

    /// Whether an asset exists and is visible to this step. The answer is
    /// memoized for the rest of the step, and the probe is recorded as an
    /// input either way.
    pub async fn can_read(&self, id: &AssetId) -> Result<bool, StepError> {
        if self.state.borrow().overlay.contains_key(id) {
            return Ok(true);
        }
        self.runner.clone().can_read_for_step(self, id).await
    }

    /// Stage bytes for one of this step's declared outputs.
    ///
    /// # Errors
    ///
    /// [`StepError::InvalidOutput`] when `id` is not among
    /// [`allowed_outputs`](Self::allowed_outputs).
    pub fn write_as_bytes(&self, id: &AssetId, bytes: impl Into<Vec<u8>>) -> Result<(), StepError> {
        if !self.allowed_outputs.contains(id) {
            return Err(StepError::InvalidOutput(id.clone()));
        }
        self.state
            .borrow_mut()
            .overlay
            .insert(id.clone(), bytes.into());
        Ok(())
    }

    /// Stage a UTF-8 string for one of this step's declared outputs.
    pub fn write_as_string(&self, id: &AssetId, text: impl AsRef<str>) -> Result<(), StepError> {
        self.write_as_bytes(id, text.as_ref().as_bytes().to_vec())
    }

    /// All assets matching `glob` that are visible to this step, in stable
    /// order. Records a glob node as an input, so the step reruns when the
    /// matching set changes.
    ///
    /// Generated assets appear only when their producing phase precedes
    /// this one and their outputs are not hidden.
    pub async fn find_assets(
        &self,
        glob: &str,
        package: Option<&str>,
    ) -> Result<Vec<AssetId>, StepError> {
        self.runner
            .clone()
            .find_assets_for_step(self, glob, package)
            .await
    }

    /// Declare that previously read assets did not influence this step's
    /// outputs. They are dropped from the recorded inputs at commit, except
    /// that the primary input's existence remains tracked.
    pub fn report_unused_assets(&self, ids: impl IntoIterator<Item = AssetId>) {
        self.state.borrow_mut().unused.extend(ids);
    }
}

/// Capability object for post-process actions. Narrower than [`BuildStep`]:
/// only the primary input can be read and all outputs are hidden.
pub struct PostProcessBuildStep {
    pub(crate) runner: Rc<RunnerInner>,
    pub(crate) primary_input: AssetId,
    pub(crate) package: String,
    pub(crate) overlay: RefCell<FxHashMap<AssetId, Vec<u8>>>,
}

impl PostProcessBuildStep {
    pub fn input_id(&self) -> &AssetId {
        &self.primary_input
    }

    /// Read the primary input's bytes.
    pub async fn read_input_as_bytes(&self) -> Result<Vec<u8>, StepError> {
        self.runner.read_source_bytes(&self.primary_input)
    }

    /// Read the primary input as UTF-8 text.
    pub async fn read_input_as_string(&self) -> Result<String, StepError> {
        let bytes = self.read_input_as_bytes().await?;
        String::from_utf8(bytes).map_err(|_| StepError::InvalidUtf8(self.primary_input.clone()))
    }

    /// Stage a hidden output. Outputs must stay within the primary input's
    /// package; collisions with existing assets are rejected at commit.
    pub fn write_as_bytes(&self, id: &AssetId, bytes: impl Into<Vec<u8>>) -> Result<(), StepError> {
        if id.package() != self.package {
            return Err(StepError::InvalidOutput(id.clone()));
        }
        if crate::rw::ReaderWriter::is_engine_path(id.path()) {
            return Err(StepError::InvalidOutput(id.clone()));
        }
        self.overlay.borrow_mut().insert(id.clone(), bytes.into());
        Ok(())
    }

    /// Stage a hidden UTF-8 output.
    pub fn write_as_string(&self, id: &AssetId, text: impl AsRef<str>) -> Result<(), StepError> {
        self.write_as_bytes(id, text.as_ref().as_bytes().to_vec())
    }
}
