//! Phase execution.
//!
//! The scheduler drives the compiled phase list in order with at most one
//! builder action running at a time. Cross-phase work happens only through
//! explicit demand: when a step reads an asset produced by an earlier phase
//! that has not run yet, the producing action is run on the spot,
//! recursively. Optional phases never run except through demand.
//!
//! All engine state lives behind a single `Rc<RunnerInner>`; steps hold a
//! clone and call back into it for reads, globs, and demand. Mutations of
//! the graph happen in short borrows between suspension points and every
//! step's writes are buffered until that step commits.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use kiln_asset::{AssetId, Digest, Glob, PackageGraph};
use kiln_graph::{AssetGraph, AssetNode, GlobNode, PostProcessAnchorNode};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::builder::Resolver;
use crate::error::{BuildError, FailureReport, StepError};
use crate::filters::{any_filter_matches, under_build_dirs, BuildFilter};
use crate::phase::{BuildPhase, BuildPhases, InBuildPhase, PostBuildAction};
use crate::rw::ReaderWriter;
use crate::step::{BuildStep, PostProcessBuildStep, StepState};

/// Identity of one builder action: a phase plus the primary input it runs
/// on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ActionKey {
    pub phase_number: usize,
    pub primary_input: AssetId,
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (phase {})", self.primary_input, self.phase_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionState {
    Running,
    Done,
}

/// Options influencing scheduling decisions for one run.
#[derive(Debug, Default)]
pub(crate) struct RunOptions {
    pub build_filters: Vec<BuildFilter>,
    pub build_dirs: Vec<String>,
    /// Serializes everything strictly; no speculative work of any kind.
    /// Outputs are identical either way.
    pub low_resources_mode: bool,
}

/// Aggregate results of one scheduler run.
#[derive(Debug)]
pub(crate) struct RunOutcome {
    pub graph: AssetGraph,
    pub failures: Vec<FailureReport>,
    pub actions_run: usize,
    pub outputs_written: usize,
    pub concurrent_modifications: Vec<AssetId>,
}

/// Shared state of one build run.
pub(crate) struct RunnerInner {
    pub graph: RefCell<AssetGraph>,
    pub phases: BuildPhases,
    pub packages: PackageGraph,
    pub rw: ReaderWriter,
    pub options: RunOptions,
    /// `(package, builder key) -> options` from the build configurations.
    pub builder_options: FxHashMap<(String, String), serde_json::Value>,
    pub resolver: Option<Rc<dyn Resolver>>,

    /// Outputs per action, fixed once planning completes.
    action_outputs: FxHashMap<ActionKey, Vec<AssetId>>,
    actions: RefCell<FxHashMap<ActionKey, ActionState>>,
    demand_stack: RefCell<Vec<ActionKey>>,
    failures: RefCell<Vec<FailureReport>>,
    /// Set when an engine invariant broke mid-step; aborts after the step.
    fatal: RefCell<Option<String>>,
    actions_run: Cell<usize>,
    outputs_written: Cell<usize>,
    concurrent_modifications: RefCell<Vec<AssetId>>,
}

impl RunnerInner {
    pub fn new(
        graph: AssetGraph,
        phases: BuildPhases,
        packages: PackageGraph,
        rw: ReaderWriter,
        options: RunOptions,
        builder_options: FxHashMap<(String, String), serde_json::Value>,
        resolver: Option<Rc<dyn Resolver>>,
    ) -> RunnerInner {
        let mut action_outputs: FxHashMap<ActionKey, Vec<AssetId>> = FxHashMap::default();
        for node in graph.nodes() {
            if let AssetNode::Generated(g) = node {
                action_outputs
                    .entry(ActionKey {
                        phase_number: g.phase_number,
                        primary_input: g.primary_input.clone(),
                    })
                    .or_default()
                    .push(g.id.clone());
            }
        }
        for outputs in action_outputs.values_mut() {
            outputs.sort();
        }
        RunnerInner {
            graph: RefCell::new(graph),
            phases,
            packages,
            rw,
            options,
            builder_options,
            resolver,
            action_outputs,
            actions: RefCell::new(FxHashMap::default()),
            demand_stack: RefCell::new(Vec::new()),
            failures: RefCell::new(Vec::new()),
            fatal: RefCell::new(None),
            actions_run: Cell::new(0),
            outputs_written: Cell::new(0),
            concurrent_modifications: RefCell::new(Vec::new()),
        }
    }

    /// Execute every phase in order. Optional phases are skipped here and
    /// only run through demand. A phase is complete when its queue drains;
    /// later phases can no longer demand it once the build moves past them,
    /// because demand always targets earlier phases.
    pub async fn run(self: &Rc<Self>) -> Result<(), BuildError> {
        if self.options.low_resources_mode {
            debug!("low-resources mode: strictly serial scheduling, no prefetch");
        }
        for (phase_number, phase) in self.phases.phases().iter().enumerate() {
            match phase {
                BuildPhase::InBuild(ph) => {
                    if ph.is_optional {
                        continue;
                    }
                    for key in self.phase_queue(phase_number) {
                        if !self.action_required(&key) {
                            trace!(action = %key, "skipped by build filters");
                            continue;
                        }
                        self.clone().run_action(key).await?;
                        self.check_fatal()?;
                    }
                }
                BuildPhase::PostBuild(actions) => {
                    self.run_post_build(phase_number, actions).await?;
                }
            }
        }
        Ok(())
    }

    /// Consume the runner and surface the run's results.
    pub fn finish(self: Rc<Self>) -> RunOutcome {
        match Rc::try_unwrap(self) {
            Ok(inner) => RunOutcome {
                graph: inner.graph.into_inner(),
                failures: inner.failures.into_inner(),
                actions_run: inner.actions_run.get(),
                outputs_written: inner.outputs_written.get(),
                concurrent_modifications: inner.concurrent_modifications.into_inner(),
            },
            Err(shared) => RunOutcome {
                graph: shared.graph.borrow().clone(),
                failures: shared.failures.borrow().clone(),
                actions_run: shared.actions_run.get(),
                outputs_written: shared.outputs_written.get(),
                concurrent_modifications: shared.concurrent_modifications.borrow().clone(),
            },
        }
    }

    /// The actions of one phase, in stable primary-input order.
    fn phase_queue(&self, phase_number: usize) -> Vec<ActionKey> {
        let mut keys: Vec<ActionKey> = self
            .action_outputs
            .keys()
            .filter(|k| k.phase_number == phase_number)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.primary_input.cmp(&b.primary_input));
        keys
    }

    /// Whether filters require this non-optional action.
    ///
    /// With no filters or build dirs, everything is required. Build dirs
    /// scope to-source outputs to the named directories; filters are the
    /// only way to eagerly demand hidden outputs. Anything skipped here
    /// can still run through demand.
    fn action_required(&self, key: &ActionKey) -> bool {
        let filters = &self.options.build_filters;
        let dirs = &self.options.build_dirs;
        if filters.is_empty() && dirs.is_empty() {
            return true;
        }
        let graph = self.graph.borrow();
        let Some(outputs) = self.action_outputs.get(key) else {
            return false;
        };
        outputs.iter().any(|id| {
            let hidden = graph
                .get(id)
                .and_then(|n| n.as_generated())
                .map(|g| g.is_hidden)
                .unwrap_or(true);
            if hidden {
                any_filter_matches(filters, id, true)
            } else if dirs.is_empty() {
                true
            } else {
                under_build_dirs(dirs, id) || any_filter_matches(filters, id, false)
            }
        })
    }

    fn check_fatal(&self) -> Result<(), BuildError> {
        match self.fatal.borrow().clone() {
            Some(chain) => Err(BuildError::Cycle { chain }),
            None => Ok(()),
        }
    }

    fn action_done(&self, key: &ActionKey) -> bool {
        self.actions.borrow().get(key).copied() == Some(ActionState::Done)
    }

    /// Run one action to completion, including through recursive demand.
    /// Re-entering an action that is already running is a dependency cycle
    /// and aborts the build.
    pub(crate) fn run_action(
        self: Rc<Self>,
        key: ActionKey,
    ) -> LocalBoxFuture<'static, Result<(), BuildError>> {
        async move {
            match self.actions.borrow().get(&key).copied() {
                Some(ActionState::Done) => return Ok(()),
                Some(ActionState::Running) => return Err(self.cycle_error(&key)),
                None => {}
            }
            self.actions
                .borrow_mut()
                .insert(key.clone(), ActionState::Running);
            self.demand_stack.borrow_mut().push(key.clone());
            let result = self.execute_action(&key).await;
            self.demand_stack.borrow_mut().pop();
            self.actions
                .borrow_mut()
                .insert(key.clone(), ActionState::Done);
            result
        }
        .boxed_local()
    }

    fn cycle_error(&self, key: &ActionKey) -> BuildError {
        let mut chain: Vec<String> = self
            .demand_stack
            .borrow()
            .iter()
            .map(|k| k.to_string())
            .collect();
        chain.push(key.to_string());
        let chain = chain.join(" -> ");
        *self.fatal.borrow_mut() = Some(chain.clone());
        BuildError::Cycle { chain }
    }

    async fn execute_action(self: &Rc<Self>, key: &ActionKey) -> Result<(), BuildError> {
        let Some(phase) = self.phases.in_build(key.phase_number).cloned() else {
            return Ok(());
        };
        let Some(output_ids) = self.action_outputs.get(key).cloned() else {
            return Ok(());
        };

        let (needs_run, previously_built) = {
            let graph = self.graph.borrow();
            let mut needs_run = false;
            let mut previously_built = true;
            for id in &output_ids {
                match graph.get(id).and_then(|n| n.as_generated()) {
                    Some(g) => {
                        if g.dirty || g.result.is_none() {
                            needs_run = true;
                        }
                        if g.result.is_none() {
                            previously_built = false;
                        }
                    }
                    None => previously_built = false,
                }
            }
            (needs_run, previously_built)
        };
        if !needs_run {
            return Ok(());
        }
        if previously_built && self.try_early_cutoff(key, &output_ids).await? {
            trace!(action = %key, "early cutoff, inputs digest unchanged");
            return Ok(());
        }
        self.run_builder_step(&phase, key, &output_ids).await
    }

    /// Skip a dirty-but-built action when its recomputed inputs digest
    /// matches the stored one and all output files are still in place.
    async fn try_early_cutoff(
        self: &Rc<Self>,
        key: &ActionKey,
        output_ids: &[AssetId],
    ) -> Result<bool, BuildError> {
        let (stored_inputs, stored_digest) = {
            let graph = self.graph.borrow();
            let Some(first) = graph.get(&output_ids[0]).and_then(|n| n.as_generated()) else {
                return Ok(false);
            };
            let Some(stored_digest) = first.inputs_digest else {
                return Ok(false);
            };
            let all_intact = output_ids.iter().all(|id| {
                match graph.get(id).and_then(|n| n.as_generated()) {
                    Some(g) if g.result == Some(true) => {
                        !g.was_output || self.rw.exists(id, g.is_hidden)
                    }
                    _ => false,
                }
            });
            if !all_intact {
                return Ok(false);
            }
            (first.inputs.clone(), stored_digest)
        };

        // Generated inputs must settle before their digests mean anything.
        for input in &stored_inputs {
            let demand = {
                let graph = self.graph.borrow();
                match graph.get(input) {
                    Some(AssetNode::Generated(g)) => Some(ActionKey {
                        phase_number: g.phase_number,
                        primary_input: g.primary_input.clone(),
                    }),
                    _ => None,
                }
            };
            if let Some(demand_key) = demand {
                self.clone().run_action(demand_key).await?;
            }
            self.refresh_glob_if_needed(input);
        }

        let current = self.compute_inputs_digest(&stored_inputs);
        if current != stored_digest {
            return Ok(false);
        }
        let mut graph = self.graph.borrow_mut();
        for id in output_ids {
            if let Some(g) = graph.get_mut(id).and_then(|n| n.as_generated_mut()) {
                g.dirty = false;
            }
        }
        Ok(true)
    }

    /// Re-evaluate a glob node's results against the current graph state.
    fn refresh_glob_if_needed(&self, id: &AssetId) {
        let params = {
            let graph = self.graph.borrow();
            graph.get(id).and_then(|n| n.as_glob()).map(|g| {
                (
                    g.package.clone(),
                    g.phase_number,
                    g.pattern.clone(),
                )
            })
        };
        let Some((package, phase_number, pattern)) = params else {
            return;
        };
        let Ok(glob) = Glob::new(&pattern) else {
            return;
        };
        let results = self.evaluate_glob(&glob, &package, &package, phase_number);
        let mut graph = self.graph.borrow_mut();
        graph.add(AssetNode::Glob(GlobNode {
            id: id.clone(),
            phase_number,
            package,
            pattern,
            results,
        }));
    }

    /// Matching, visible assets for a glob: sources plus readable non-hidden
    /// generated outputs of earlier phases. Uses node states as they stand;
    /// callers that need earlier phases settled settle them first.
    fn evaluate_glob(
        &self,
        glob: &Glob,
        target_package: &str,
        from_package: &str,
        phase_number: usize,
    ) -> BTreeSet<AssetId> {
        let graph = self.graph.borrow();
        let mut results = BTreeSet::new();
        for node in graph.nodes() {
            let (id, ok) = match node {
                AssetNode::Source(s) => (&s.id, true),
                AssetNode::Generated(g) => (
                    &g.id,
                    g.phase_number < phase_number && !g.is_hidden && g.is_readable(),
                ),
                _ => continue,
            };
            if !ok
                || id.package() != target_package
                || !glob.matches(id.path())
                || ReaderWriter::is_engine_path(id.path())
            {
                continue;
            }
            if id.package() != from_package && !self.packages.is_visible_from(id, from_package) {
                continue;
            }
            results.insert(id.clone());
        }
        results
    }

    /// Combined digest over a step's recorded inputs. Sources are hashed on
    /// first use; every other node kind contributes a stable marker or its
    /// stored digest.
    fn compute_inputs_digest(&self, inputs: &BTreeSet<AssetId>) -> Digest {
        // Hash sources that have never been digested, outside the borrow.
        let undigested: Vec<AssetId> = {
            let graph = self.graph.borrow();
            inputs
                .iter()
                .filter(|id| {
                    matches!(graph.get(id), Some(AssetNode::Source(s)) if s.digest.is_none())
                })
                .cloned()
                .collect()
        };
        for id in undigested {
            let digest = self
                .rw
                .read(&id, false)
                .ok()
                .map(|bytes| Digest::compute(&id, &bytes));
            if let Some(digest) = digest {
                let mut graph = self.graph.borrow_mut();
                if let Some(s) = graph.get_mut(&id).and_then(|n| n.as_source_mut()) {
                    s.digest = Some(digest);
                }
            }
        }

        let graph = self.graph.borrow();
        let entries: Vec<(AssetId, Vec<u8>)> = inputs
            .iter()
            .map(|id| {
                let marker: Vec<u8> = match graph.get(id) {
                    Some(AssetNode::Source(s)) => match s.digest {
                        Some(d) => d.as_bytes().to_vec(),
                        None => b"missing".to_vec(),
                    },
                    Some(AssetNode::Generated(g)) => {
                        if g.is_readable() {
                            match g.digest {
                                Some(d) => d.as_bytes().to_vec(),
                                None => b"absent".to_vec(),
                            }
                        } else if g.result == Some(false) {
                            b"failed".to_vec()
                        } else {
                            b"absent".to_vec()
                        }
                    }
                    Some(AssetNode::MissingSource(_)) => b"missing".to_vec(),
                    Some(AssetNode::Glob(g)) => g.results_digest().as_bytes().to_vec(),
                    Some(AssetNode::Internal(n)) => match n.digest {
                        Some(d) => d.as_bytes().to_vec(),
                        None => b"internal".to_vec(),
                    },
                    Some(AssetNode::Placeholder(_)) => b"placeholder".to_vec(),
                    Some(AssetNode::PostProcessAnchor(_)) => b"anchor".to_vec(),
                    None => b"unknown".to_vec(),
                };
                (id.clone(), marker)
            })
            .collect();
        Digest::combine(entries.iter().map(|(id, bytes)| (id, bytes.as_slice())))
    }

    async fn run_builder_step(
        self: &Rc<Self>,
        phase: &InBuildPhase,
        key: &ActionKey,
        output_ids: &[AssetId],
    ) -> Result<(), BuildError> {
        self.actions_run.set(self.actions_run.get() + 1);
        debug!(
            builder = %phase.key,
            input = %key.primary_input,
            phase = key.phase_number,
            "running builder"
        );

        let package = key.primary_input.package().to_string();
        let options = self
            .builder_options
            .get(&(package.clone(), phase.key.clone()))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let primary_is_source = {
            let graph = self.graph.borrow();
            matches!(graph.get(&key.primary_input), Some(AssetNode::Source(_)))
        };
        let mtime_before = if primary_is_source {
            self.rw.source_mtime_millis(&key.primary_input)
        } else {
            None
        };

        let step = BuildStep {
            runner: self.clone(),
            phase_number: key.phase_number,
            builder_key: phase.key.clone(),
            primary_input: key.primary_input.clone(),
            package,
            allowed_outputs: output_ids.iter().cloned().collect(),
            options,
            state: RefCell::new(StepState::default()),
        };
        let build_result = phase.builder.build(&step).await;
        self.check_fatal()?;
        self.commit_step(phase, key, output_ids, step, build_result)?;

        // A primary input that changed while its step ran is committed from
        // the snapshot; the outputs stay dirty so the next build reruns
        // them against the new content.
        if primary_is_source {
            let mtime_after = self.rw.source_mtime_millis(&key.primary_input);
            if mtime_after != mtime_before {
                warn!(
                    input = %key.primary_input,
                    "source changed during its build step; next build will rerun"
                );
                self.concurrent_modifications
                    .borrow_mut()
                    .push(key.primary_input.clone());
                let mut graph = self.graph.borrow_mut();
                for id in output_ids {
                    if let Some(g) = graph.get_mut(id).and_then(|n| n.as_generated_mut()) {
                        g.dirty = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply a completed step to the graph and the filesystem.
    ///
    /// Inputs are finalized here: the step's own declared outputs are
    /// stripped (a self-read never becomes a self-edge), and unused-report
    /// ids are dropped except the primary input, whose existence stays
    /// tracked.
    fn commit_step(
        &self,
        phase: &InBuildPhase,
        key: &ActionKey,
        output_ids: &[AssetId],
        step: BuildStep,
        result: Result<(), StepError>,
    ) -> Result<(), BuildError> {
        let state = step.state.into_inner();
        let mut inputs = state.inputs;
        let mut overlay = state.overlay;
        for id in output_ids {
            inputs.remove(id);
        }
        for id in &state.unused {
            if id != &key.primary_input {
                inputs.remove(id);
            }
        }
        let inputs_digest = self.compute_inputs_digest(&inputs);

        let succeeded = result.is_ok();
        if let Err(error) = &result {
            warn!(
                builder = %phase.key,
                input = %key.primary_input,
                %error,
                "builder failed"
            );
            self.failures.borrow_mut().push(FailureReport {
                primary_input: key.primary_input.clone(),
                builder_key: phase.key.clone(),
                phase_number: key.phase_number,
                message: error.to_string(),
            });
        }

        for id in output_ids {
            let staged = if succeeded { overlay.remove(id) } else { None };
            let (hidden, previous_digest) = {
                let graph = self.graph.borrow();
                match graph.get(id).and_then(|n| n.as_generated()) {
                    Some(g) => (g.is_hidden, g.digest),
                    None => (phase.hide_output, None),
                }
            };
            let (was_output, digest) = match staged {
                Some(bytes) => {
                    let digest = Digest::compute(id, &bytes);
                    // Identical bytes are not rewritten, preserving the
                    // file's mtime for downstream tooling.
                    if previous_digest != Some(digest) || !self.rw.exists(id, hidden) {
                        self.rw.write(id, hidden, &bytes)?;
                    }
                    self.outputs_written.set(self.outputs_written.get() + 1);
                    (true, Some(digest))
                }
                None => {
                    // Failed or overdeclared: the file must not exist.
                    self.rw.delete(id, hidden)?;
                    (false, None)
                }
            };
            let mut graph = self.graph.borrow_mut();
            if let Some(g) = graph.get_mut(id).and_then(|n| n.as_generated_mut()) {
                g.was_output = was_output;
                g.result = Some(succeeded);
                g.digest = digest;
                // Failures stay dirty so the next build retries them.
                g.dirty = !succeeded;
                g.inputs = inputs.clone();
                g.inputs_digest = Some(inputs_digest);
            }
        }
        Ok(())
    }

    /// Read an asset on behalf of a step, enforcing visibility, recording
    /// the dependency, and completing earlier phases on demand.
    pub(crate) async fn read_for_step(
        self: Rc<Self>,
        step: &BuildStep,
        id: &AssetId,
    ) -> Result<Vec<u8>, StepError> {
        if step.state.borrow().can_read_cache.get(id).copied() == Some(false) {
            return Err(StepError::AssetNotFound(id.clone()));
        }
        if ReaderWriter::is_engine_path(id.path()) {
            return Err(StepError::InvalidInput {
                id: id.clone(),
                reason: "engine-owned paths are never readable".to_string(),
            });
        }
        if step.allowed_outputs.contains(id) {
            // The step's own declared output before it was written: not
            // found, and never recorded, so no self-edge can form.
            return Err(StepError::AssetNotFound(id.clone()));
        }
        if id.package() != step.package && !self.packages.is_visible_from(id, &step.package) {
            return Err(StepError::InvalidInput {
                id: id.clone(),
                reason: format!("not public to package `{}`", step.package),
            });
        }

        enum Kind {
            Source,
            Generated { key: ActionKey },
            Missing,
            Absent,
            Unreadable,
        }
        let kind = {
            let graph = self.graph.borrow();
            match graph.get(id) {
                Some(AssetNode::Source(_)) => Kind::Source,
                Some(AssetNode::Generated(g)) => {
                    if g.phase_number >= step.phase_number {
                        Kind::Unreadable
                    } else {
                        Kind::Generated {
                            key: ActionKey {
                                phase_number: g.phase_number,
                                primary_input: g.primary_input.clone(),
                            },
                        }
                    }
                }
                Some(AssetNode::MissingSource(_)) => Kind::Missing,
                Some(_) => Kind::Unreadable,
                None => Kind::Absent,
            }
        };

        match kind {
            Kind::Unreadable => Err(StepError::InvalidInput {
                id: id.clone(),
                reason: "not visible to this phase".to_string(),
            }),
            Kind::Missing => {
                self.record_input(step, id, false);
                Err(StepError::AssetNotFound(id.clone()))
            }
            Kind::Absent => {
                // First sighting of a nonexistent id: leave a tombstone so
                // the asset's later creation invalidates this step.
                self.graph
                    .borrow_mut()
                    .add(AssetNode::MissingSource(kiln_graph::MissingSourceNode {
                        id: id.clone(),
                    }));
                self.record_input(step, id, false);
                Err(StepError::AssetNotFound(id.clone()))
            }
            Kind::Source => {
                self.record_input(step, id, true);
                match self.rw.read(id, false) {
                    Ok(bytes) => {
                        let mut graph = self.graph.borrow_mut();
                        if let Some(s) = graph.get_mut(id).and_then(|n| n.as_source_mut()) {
                            if s.digest.is_none() {
                                s.digest = Some(Digest::compute(id, &bytes));
                            }
                        }
                        Ok(bytes)
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        step.state.borrow_mut().can_read_cache.insert(id.clone(), false);
                        Err(StepError::AssetNotFound(id.clone()))
                    }
                    Err(source) => Err(StepError::Io {
                        id: id.clone(),
                        source,
                    }),
                }
            }
            Kind::Generated { key } => {
                if !self.action_done(&key) {
                    if let Err(e) = self.clone().run_action(key).await {
                        let message = e.to_string();
                        *self.fatal.borrow_mut() = Some(message.clone());
                        return Err(StepError::Fatal(message));
                    }
                }
                let (readable, failed, hidden) = {
                    let graph = self.graph.borrow();
                    match graph.get(id).and_then(|n| n.as_generated()) {
                        Some(g) => (g.is_readable(), g.result == Some(false), g.is_hidden),
                        None => (false, false, false),
                    }
                };
                if readable {
                    self.record_input(step, id, true);
                    self.rw.read(id, hidden).map_err(|source| StepError::Io {
                        id: id.clone(),
                        source,
                    })
                } else if failed {
                    // Reading a failed output fails this step too, but the
                    // dependency is kept so fixing the input reruns us.
                    self.record_input(step, id, false);
                    Err(StepError::AssetNotFound(id.clone()))
                } else {
                    // Overdeclared: the builder ran but wrote nothing. The
                    // id must not become an input of this step.
                    step.state
                        .borrow_mut()
                        .can_read_cache
                        .insert(id.clone(), false);
                    Err(StepError::AssetNotFound(id.clone()))
                }
            }
        }
    }

    fn record_input(&self, step: &BuildStep, id: &AssetId, readable: bool) {
        let mut state = step.state.borrow_mut();
        state.inputs.insert(id.clone());
        state.can_read_cache.insert(id.clone(), readable);
    }

    /// `can_read` for a step: the read path with the bytes thrown away and
    /// visibility violations mapped to `false`.
    pub(crate) async fn can_read_for_step(
        self: Rc<Self>,
        step: &BuildStep,
        id: &AssetId,
    ) -> Result<bool, StepError> {
        if let Some(answer) = step.state.borrow().can_read_cache.get(id).copied() {
            return Ok(answer);
        }
        match self.read_for_step(step, id).await {
            Ok(_) => Ok(true),
            Err(StepError::AssetNotFound(_)) => Ok(false),
            Err(StepError::InvalidInput { .. }) => Ok(false),
            Err(StepError::Io { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// `find_assets` for a step: evaluate the glob, settle earlier-phase
    /// candidates, and record a glob node as the step's input.
    pub(crate) async fn find_assets_for_step(
        self: Rc<Self>,
        step: &BuildStep,
        pattern: &str,
        package: Option<&str>,
    ) -> Result<Vec<AssetId>, StepError> {
        let target = package.unwrap_or(&step.package).to_string();
        if !self.packages.contains(&target) {
            return Err(StepError::Failure(format!(
                "cannot glob unknown package `{target}`"
            )));
        }
        let glob = Glob::new(pattern)
            .map_err(|e| StepError::Failure(format!("invalid glob `{pattern}`: {e}")))?;

        // Settle matching generated candidates of earlier phases so the
        // result reflects what they actually produced.
        let pending: Vec<ActionKey> = {
            let graph = self.graph.borrow();
            let mut pending = Vec::new();
            for node in graph.nodes() {
                if let AssetNode::Generated(g) = node {
                    if g.phase_number < step.phase_number
                        && !g.is_hidden
                        && g.id.package() == target
                        && glob.matches(g.id.path())
                        && (g.result.is_none() || g.dirty)
                    {
                        pending.push(ActionKey {
                            phase_number: g.phase_number,
                            primary_input: g.primary_input.clone(),
                        });
                    }
                }
            }
            pending.sort_by(|a, b| {
                (a.phase_number, &a.primary_input).cmp(&(b.phase_number, &b.primary_input))
            });
            pending.dedup();
            pending
        };
        for key in pending {
            if let Err(e) = self.clone().run_action(key).await {
                let message = e.to_string();
                *self.fatal.borrow_mut() = Some(message.clone());
                return Err(StepError::Fatal(message));
            }
        }

        let results = self.evaluate_glob(&glob, &target, &step.package, step.phase_number);
        let glob_id = GlobNode::id_for(&target, step.phase_number, pattern);
        self.graph.borrow_mut().add(AssetNode::Glob(GlobNode {
            id: glob_id.clone(),
            phase_number: step.phase_number,
            package: target,
            pattern: pattern.to_string(),
            results: results.clone(),
        }));
        step.state.borrow_mut().inputs.insert(glob_id);
        Ok(results.into_iter().collect())
    }

    /// Bytes of a source asset, for post-process steps.
    pub(crate) fn read_source_bytes(&self, id: &AssetId) -> Result<Vec<u8>, StepError> {
        self.rw.read(id, false).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StepError::AssetNotFound(id.clone())
            } else {
                StepError::Io {
                    id: id.clone(),
                    source,
                }
            }
        })
    }

    /// Run the trailing post-build phase: every dirty anchor runs its
    /// action; outputs are always hidden and owned by the anchor.
    async fn run_post_build(
        self: &Rc<Self>,
        phase_number: usize,
        actions: &[PostBuildAction],
    ) -> Result<(), BuildError> {
        for action in actions {
            let anchors: Vec<PostProcessAnchorNode> = {
                let graph = self.graph.borrow();
                let mut anchors: Vec<PostProcessAnchorNode> = graph
                    .nodes()
                    .filter_map(|n| match n {
                        AssetNode::PostProcessAnchor(a)
                            if a.action_key == action.key && a.dirty =>
                        {
                            Some(a.clone())
                        }
                        _ => None,
                    })
                    .collect();
                anchors.sort_by(|a, b| a.primary_input.cmp(&b.primary_input));
                anchors
            };

            for anchor in anchors {
                self.actions_run.set(self.actions_run.get() + 1);
                debug!(
                    action = %action.key,
                    input = %anchor.primary_input,
                    "running post-process action"
                );
                let step = PostProcessBuildStep {
                    runner: self.clone(),
                    primary_input: anchor.primary_input.clone(),
                    package: anchor.primary_input.package().to_string(),
                    overlay: RefCell::new(FxHashMap::default()),
                };
                let result = action.builder.build(&step).await;
                let overlay = step.overlay.into_inner();
                match result {
                    Ok(()) => {
                        self.commit_post_step(phase_number, &anchor, overlay)?;
                    }
                    Err(error) => {
                        warn!(
                            action = %action.key,
                            input = %anchor.primary_input,
                            %error,
                            "post-process action failed"
                        );
                        self.failures.borrow_mut().push(FailureReport {
                            primary_input: anchor.primary_input.clone(),
                            builder_key: action.key.clone(),
                            phase_number,
                            message: error.to_string(),
                        });
                        // The anchor stays dirty; the next build retries.
                    }
                }
            }
        }
        Ok(())
    }

    fn commit_post_step(
        &self,
        phase_number: usize,
        anchor: &PostProcessAnchorNode,
        overlay: FxHashMap<AssetId, Vec<u8>>,
    ) -> Result<(), BuildError> {
        // Stale outputs from a previous run that were not rewritten.
        for stale in &anchor.outputs {
            if !overlay.contains_key(stale) {
                self.rw.delete(stale, true)?;
                self.graph.borrow_mut().remove(stale);
            }
        }

        let mut outputs = BTreeSet::new();
        let mut sorted: Vec<(AssetId, Vec<u8>)> = overlay.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, bytes) in sorted {
            let collides = {
                let graph = self.graph.borrow();
                match graph.get(&id) {
                    None => false,
                    Some(AssetNode::Generated(g)) => {
                        !(g.phase_number == phase_number && g.primary_input == anchor.primary_input)
                    }
                    Some(_) => true,
                }
            };
            if collides {
                warn!(output = %id, "post-process output collides with an existing asset; skipped");
                continue;
            }
            self.rw.write(&id, true, &bytes)?;
            self.outputs_written.set(self.outputs_written.get() + 1);
            let mut node = kiln_graph::GeneratedNode::expected(
                id.clone(),
                anchor.primary_input.clone(),
                phase_number,
                true,
            );
            node.result = Some(true);
            node.was_output = true;
            node.dirty = false;
            node.digest = Some(Digest::compute(&id, &bytes));
            node.inputs.insert(anchor.primary_input.clone());
            self.graph.borrow_mut().add(AssetNode::Generated(node));
            outputs.insert(id);
        }

        let mut graph = self.graph.borrow_mut();
        graph.update_post_process_outputs(&anchor.id, outputs);
        if let Some(AssetNode::PostProcessAnchor(a)) = graph.get_mut(&anchor.id) {
            a.dirty = false;
        }
        Ok(())
    }
}
