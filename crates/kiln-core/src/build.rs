//! The top-level build driver.
//!
//! [`BuildOptions`] is the embedder-facing entry point: configure packages,
//! builders, and flags, then call [`BuildOptions::build`]. One call runs
//! one build: load or rebuild the graph, invalidate, plan, schedule, and
//! persist. Builder failures do not abort the build; they surface in the
//! returned [`BuildSummary`].

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use kiln_asset::{AssetId, Digest, PackageGraph};
use kiln_graph::{AssetGraph, GraphError, InternalNode, SourceNode};
use rustc_hash::FxHashMap;
use tracing::{error, info, warn};

use crate::builder::{BuilderApplication, PostProcessApplication, Resolver};
use crate::config::BuildConfig;
use crate::error::{BuildError, FailureReport, Result};
use crate::filters::BuildFilter;
use crate::invalidation::invalidate;
use crate::phase::{BuildPhase, BuildPhases};
use crate::planner::expand_phases;
use crate::rw::ReaderWriter;
use crate::scan::{scan_sources, ScannedSource};
use crate::scheduler::{RunOptions, RunnerInner};

/// Name of the package configuration file at the root package.
pub const PACKAGES_FILE: &str = "kiln.packages.json";

/// Overall result of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Success,
    /// At least one builder step failed.
    Failure,
}

/// What a finished build did.
#[derive(Debug)]
pub struct BuildSummary {
    pub status: BuildStatus,
    /// Whether this was a full (non-incremental) build.
    pub full_build: bool,
    /// Builder actions actually executed (skipped ones not counted).
    pub actions_run: usize,
    /// Output files written (unchanged outputs not counted).
    pub outputs_written: usize,
    pub failures: Vec<FailureReport>,
    /// Sources that changed while their step was running; the next build
    /// reruns them.
    pub concurrent_modifications: Vec<AssetId>,
    pub duration: Duration,
}

impl BuildSummary {
    pub fn succeeded(&self) -> bool {
        self.status == BuildStatus::Success
    }
}

/// Configuration for one build run.
pub struct BuildOptions {
    root: PathBuf,
    package_graph: Option<PackageGraph>,
    builders: Vec<BuilderApplication>,
    post_process: Vec<PostProcessApplication>,
    build_filters: Vec<String>,
    build_dirs: Vec<String>,
    delete_conflicting_outputs: bool,
    low_resources_mode: bool,
    config_name: Option<String>,
    output_dir: Option<PathBuf>,
    resolver: Option<Rc<dyn Resolver>>,
}

impl BuildOptions {
    /// A build rooted at the given directory (the root package directory;
    /// the process working directory for the CLI).
    pub fn new(root: impl Into<PathBuf>) -> BuildOptions {
        BuildOptions {
            root: root.into(),
            package_graph: None,
            builders: Vec::new(),
            post_process: Vec::new(),
            build_filters: Vec::new(),
            build_dirs: Vec::new(),
            delete_conflicting_outputs: false,
            low_resources_mode: false,
            config_name: None,
            output_dir: None,
            resolver: None,
        }
    }

    /// Use an explicit package graph instead of loading
    /// `kiln.packages.json`.
    pub fn package_graph(mut self, packages: PackageGraph) -> Self {
        self.package_graph = Some(packages);
        self
    }

    /// Append a builder application; order defines phase order.
    pub fn builder(mut self, application: BuilderApplication) -> Self {
        self.builders.push(application);
        self
    }

    /// Append a post-process action.
    pub fn post_process(mut self, application: PostProcessApplication) -> Self {
        self.post_process.push(application);
        self
    }

    /// Add a `--build-filter` pattern.
    pub fn build_filter(mut self, pattern: impl Into<String>) -> Self {
        self.build_filters.push(pattern.into());
        self
    }

    /// Add a build directory scoping the outputs that must be produced.
    pub fn build_dir(mut self, dir: impl Into<String>) -> Self {
        self.build_dirs.push(dir.into());
        self
    }

    /// Treat pre-existing files at expected output paths as absent.
    pub fn delete_conflicting_outputs(mut self, enabled: bool) -> Self {
        self.delete_conflicting_outputs = enabled;
        self
    }

    /// Serialize work further; observable outputs are identical.
    pub fn low_resources_mode(mut self, enabled: bool) -> Self {
        self.low_resources_mode = enabled;
        self
    }

    /// Use `kiln.<name>.config.json` for the root package.
    pub fn config_name(mut self, name: impl Into<String>) -> Self {
        self.config_name = Some(name.into());
        self
    }

    /// After a successful build, materialize the merged source + output
    /// tree into this directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Install the opaque semantic-query capability handed to builders.
    pub fn resolver(mut self, resolver: Rc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Run one build.
    pub async fn build(self) -> Result<BuildSummary> {
        let start = Instant::now();

        let mut packages = match self.package_graph.clone() {
            Some(packages) => packages,
            None => load_packages(&self.root)?,
        };
        let configs = load_configs(&packages, self.config_name.as_deref())?;
        for (name, config) in &configs {
            let globs = config.public_globs()?;
            packages.set_additional_public_assets(name, globs);
        }

        let phases = BuildPhases::new(self.builders.clone(), self.post_process.clone())
            .map_err(BuildError::Extension)?;
        let rw = ReaderWriter::new(packages.clone());
        let internal = compute_internal_nodes(
            &packages,
            self.config_name.as_deref(),
            &phases,
        );
        let scan = scan_sources(&packages, &configs)?;

        let (mut graph, full_build) =
            load_or_rebuild(&rw, &scan, &internal, &packages)?;
        expand_phases(
            &mut graph,
            &phases,
            &packages,
            &configs,
            self.delete_conflicting_outputs,
        )?;

        let root_name = packages.root_package().name().to_string();
        let build_filters: Vec<BuildFilter> = self
            .build_filters
            .iter()
            .map(|pattern| BuildFilter::parse(pattern, &root_name))
            .collect::<std::result::Result<_, _>>()?;
        let builder_options = collect_builder_options(&configs, &phases);

        let runner = Rc::new(RunnerInner::new(
            graph,
            phases,
            packages.clone(),
            rw.clone(),
            RunOptions {
                build_filters,
                build_dirs: self.build_dirs.clone(),
                low_resources_mode: self.low_resources_mode,
            },
            builder_options,
            self.resolver.clone(),
        ));
        let run_result = runner.run().await;
        let outcome = runner.finish();
        run_result?;

        rw.write_graph(&outcome.graph.serialize()?)?;

        for failure in &outcome.failures {
            error!("step failed: {failure}");
        }
        let status = if outcome.failures.is_empty() {
            BuildStatus::Success
        } else {
            BuildStatus::Failure
        };
        if status == BuildStatus::Success {
            if let Some(output_dir) = &self.output_dir {
                materialize_output(&outcome.graph, &packages, &rw, output_dir)?;
            }
        }

        let summary = BuildSummary {
            status,
            full_build,
            actions_run: outcome.actions_run,
            outputs_written: outcome.outputs_written,
            failures: outcome.failures,
            concurrent_modifications: outcome.concurrent_modifications,
            duration: start.elapsed(),
        };
        info!(
            actions = summary.actions_run,
            outputs = summary.outputs_written,
            full = summary.full_build,
            failed = summary.failures.len(),
            "build finished in {:.1?}",
            summary.duration
        );
        Ok(summary)
    }
}

/// Load the package graph from `kiln.packages.json`, falling back to a
/// single-package graph named after the root directory.
fn load_packages(root: &Path) -> Result<PackageGraph> {
    let packages_file = root.join(PACKAGES_FILE);
    if packages_file.exists() {
        Ok(PackageGraph::load(&packages_file)?)
    } else {
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("root")
            .to_string();
        Ok(PackageGraph::single(name, root))
    }
}

/// Load every package's build config. `config_name` applies to the root
/// package only; dependencies always use the default file.
fn load_configs(
    packages: &PackageGraph,
    config_name: Option<&str>,
) -> Result<FxHashMap<String, BuildConfig>> {
    let root_name = packages.root_package().name().to_string();
    let mut configs = FxHashMap::default();
    for package in packages.packages() {
        let name = if package.name() == root_name {
            config_name
        } else {
            None
        };
        let (config, _path) = BuildConfig::load(package.root(), name)?;
        configs.insert(package.name().to_string(), config);
    }
    Ok(configs)
}

/// Digests of the engine's own inputs: the package configuration, every
/// package's build configuration, and the builder identity. Any change to
/// these forces a full rebuild.
fn compute_internal_nodes(
    packages: &PackageGraph,
    config_name: Option<&str>,
    phases: &BuildPhases,
) -> Vec<InternalNode> {
    let root_name = packages.root_package().name().to_string();
    let mut nodes = Vec::new();

    let packages_id = AssetId::new(root_name.clone(), PACKAGES_FILE);
    let packages_path = packages.root_package().root().join(PACKAGES_FILE);
    nodes.push(InternalNode {
        digest: Some(digest_of_file(&packages_id, &packages_path)),
        id: packages_id,
    });

    for package in packages.packages() {
        let name = if package.name() == root_name {
            config_name
        } else {
            None
        };
        let file = BuildConfig::file_name(name);
        let id = AssetId::new(package.name(), file.clone());
        let path = package.root().join(file);
        nodes.push(InternalNode {
            digest: Some(digest_of_file(&id, &path)),
            id,
        });
    }

    // Builder identity: the engine version plus the full shape of the
    // phase list. Adding, reordering, or reconfiguring builders rebuilds
    // everything.
    let mut identity = format!("kiln {}", env!("CARGO_PKG_VERSION"));
    for (number, phase) in phases.phases().iter().enumerate() {
        match phase {
            BuildPhase::InBuild(ph) => {
                identity.push_str(&format!(
                    "\n{number} {} optional={} hidden={} extensions={:?}",
                    ph.key(),
                    ph.is_optional(),
                    ph.hide_output(),
                    ph.builder.build_extensions(),
                ));
            }
            BuildPhase::PostBuild(actions) => {
                for action in actions {
                    identity.push_str(&format!(
                        "\n{number} post {} inputs={:?}",
                        action.key(),
                        action.builder.input_extensions()
                    ));
                }
            }
        }
    }
    let id = AssetId::new(root_name, "$builders$");
    nodes.push(InternalNode {
        digest: Some(Digest::compute(&id, identity.as_bytes())),
        id,
    });
    nodes
}

fn digest_of_file(id: &AssetId, path: &Path) -> Digest {
    match std::fs::read(path) {
        Ok(bytes) => Digest::compute(id, &bytes),
        Err(_) => Digest::compute(id, b"<absent>"),
    }
}

/// Load the persisted graph and invalidate it, or start fresh. Starting
/// fresh purges the generated cache (engine-owned directories only).
fn load_or_rebuild(
    rw: &ReaderWriter,
    scan: &[ScannedSource],
    internal: &[InternalNode],
    packages: &PackageGraph,
) -> Result<(AssetGraph, bool)> {
    if let Some(bytes) = rw.read_graph()? {
        match AssetGraph::deserialize(&bytes) {
            Ok(mut graph) => {
                let outcome = invalidate(&mut graph, scan, internal, rw)?;
                match outcome.full_rebuild_reason {
                    None => return Ok((graph, false)),
                    Some(reason) => info!(%reason, "configuration changed, full rebuild"),
                }
            }
            Err(GraphError::VersionMismatch { expected, found }) => {
                info!(expected, ?found, "asset graph version changed, full rebuild");
            }
            Err(_) => {
                warn!("asset graph is corrupt, full rebuild");
            }
        }
    }
    rw.purge_generated()?;
    let sources = scan.iter().map(|s| {
        let mut node = SourceNode::new(s.id.clone());
        node.last_modified_millis = s.mtime_millis;
        node
    });
    let graph = AssetGraph::build(sources, internal.iter().cloned(), packages);
    Ok((graph, true))
}

fn collect_builder_options(
    configs: &FxHashMap<String, BuildConfig>,
    phases: &BuildPhases,
) -> FxHashMap<(String, String), serde_json::Value> {
    let mut options = FxHashMap::default();
    for (package, config) in configs {
        for phase in phases.phases() {
            if let BuildPhase::InBuild(ph) = phase {
                let value = config.options(ph.key());
                if !value.is_null() {
                    options.insert((package.clone(), ph.key().to_string()), value);
                }
            }
        }
    }
    options
}

/// Copy the merged tree into an output directory: the root package at the
/// top level, dependencies under `packages/<name>/`. Hidden outputs land at
/// their logical paths.
fn materialize_output(
    graph: &AssetGraph,
    packages: &PackageGraph,
    rw: &ReaderWriter,
    output_dir: &Path,
) -> Result<()> {
    let root_name = packages.root_package().name();
    for node in graph.sorted_nodes() {
        let (id, hidden) = match node {
            kiln_graph::AssetNode::Source(s) => (&s.id, false),
            kiln_graph::AssetNode::Generated(g) if g.is_readable() => (&g.id, g.is_hidden),
            _ => continue,
        };
        if ReaderWriter::is_engine_path(id.path()) || id.path().starts_with('$') {
            continue;
        }
        let destination = if id.package() == root_name {
            output_dir.join(id.path())
        } else {
            output_dir
                .join("packages")
                .join(id.package())
                .join(id.path())
        };
        let bytes = match rw.read(id, hidden) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(BuildError::Io(e)),
        };
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, bytes)?;
    }
    info!(dir = %output_dir.display(), "materialized merged output");
    Ok(())
}
