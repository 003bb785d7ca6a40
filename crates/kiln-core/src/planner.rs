//! Phase expansion.
//!
//! Walks the phase list in order and creates the expected generated nodes
//! for every matching input, wiring up the bidirectional
//! `primary_input`/`primary_outputs` links. Outputs of earlier phases are
//! candidates for later phases, so generate-on-generated chains fall out of
//! the iteration order. Expansion is idempotent: nodes that already exist
//! (from a loaded graph or an earlier call) are left alone, which is how
//! new sources get their nodes on incremental builds.

use std::collections::BTreeSet;

use kiln_asset::{AssetId, PackageGraph};
use kiln_graph::{
    AssetGraph, AssetNode, GeneratedNode, PlaceholderNode, PostProcessAnchorNode,
};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::BuildConfig;
use crate::error::{BuildError, ExtensionError, Result};
use crate::phase::{BuildPhase, BuildPhases, InBuildPhase, PostBuildAction};

/// Create expected generated nodes and post-process anchors for every phase.
///
/// # Errors
///
/// - [`ExtensionError::DuplicateOutput`] when two phases derive the same
///   concrete output path;
/// - [`BuildError::CannotBuild`] when an expected output collides with an
///   existing source and `delete_conflicting_outputs` is off.
pub(crate) fn expand_phases(
    graph: &mut AssetGraph,
    phases: &BuildPhases,
    packages: &PackageGraph,
    configs: &FxHashMap<String, BuildConfig>,
    delete_conflicting_outputs: bool,
) -> Result<()> {
    let root_name = packages.root_package().name().to_string();
    let mut conflicts: Vec<AssetId> = Vec::new();

    for (phase_number, phase) in phases.phases().iter().enumerate() {
        match phase {
            BuildPhase::InBuild(ph) => expand_in_build_phase(
                graph,
                ph,
                phase_number,
                packages,
                configs,
                &root_name,
                delete_conflicting_outputs,
                &mut conflicts,
            )?,
            BuildPhase::PostBuild(actions) => {
                expand_post_build_phase(graph, actions, &root_name);
            }
        }
    }

    if !conflicts.is_empty() {
        conflicts.sort();
        let listed = conflicts
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(BuildError::CannotBuild(format!(
            "expected outputs already exist as sources: {listed} \
             (enable --delete-conflicting-outputs to replace them)"
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn expand_in_build_phase(
    graph: &mut AssetGraph,
    ph: &InBuildPhase,
    phase_number: usize,
    packages: &PackageGraph,
    configs: &FxHashMap<String, BuildConfig>,
    root_name: &str,
    delete_conflicting_outputs: bool,
    conflicts: &mut Vec<AssetId>,
) -> Result<()> {
    let extensions = ph.builder.build_extensions().clone();

    // Candidates: sources plus outputs of earlier phases, in stable order.
    let mut candidates: Vec<AssetId> = graph
        .nodes()
        .filter_map(|node| match node {
            AssetNode::Source(s) => Some(s.id.clone()),
            AssetNode::Generated(g) if g.phase_number < phase_number => Some(g.id.clone()),
            _ => None,
        })
        .collect();
    // Whole-package builders take a placeholder as primary input instead.
    if let Some(kind) = extensions.placeholder_input() {
        candidates = packages
            .packages()
            .map(|p| PlaceholderNode::id_for(p.name(), kind))
            .collect();
    }
    candidates.sort();

    for input in candidates {
        let package = input.package().to_string();
        if !ph
            .target_packages
            .matches(&package, package == *root_name)
        {
            continue;
        }
        if !ph.generate_for.matches(input.path()) {
            continue;
        }
        if let Some(config) = configs.get(&package) {
            if let Some(generate_for) = config.generate_for(&ph.key)? {
                if !generate_for.matches(input.path()) {
                    continue;
                }
            }
        }
        let Some(outputs) = extensions.expected_output_ids(&input) else {
            continue;
        };

        let mut created = BTreeSet::new();
        for output in outputs {
            match graph.get(&output) {
                Some(AssetNode::Generated(existing)) => {
                    if existing.phase_number == phase_number && existing.primary_input == input {
                        continue; // already planned on a previous build
                    }
                    return Err(BuildError::Extension(ExtensionError::DuplicateOutput {
                        output,
                        first: existing.phase_number,
                        second: phase_number,
                    }));
                }
                Some(AssetNode::Source(_)) => {
                    if !delete_conflicting_outputs {
                        conflicts.push(output);
                        continue;
                    }
                    debug!(output = %output, "replacing pre-existing source with generated output");
                    graph.remove(&output);
                }
                Some(AssetNode::MissingSource(_)) => {
                    // Readers saw this id as missing; it is about to exist.
                    graph.mark_dirty(&output);
                    graph.remove(&output);
                }
                Some(_) => {
                    return Err(BuildError::CannotBuild(format!(
                        "expected output {output} collides with an engine-internal asset"
                    )));
                }
                None => {}
            }
            graph.add(AssetNode::Generated(GeneratedNode::expected(
                output.clone(),
                input.clone(),
                phase_number,
                ph.hide_output,
            )));
            created.insert(output);
        }

        if created.is_empty() {
            continue;
        }
        match graph.get_mut(&input) {
            Some(AssetNode::Source(s)) => s.primary_outputs.extend(created),
            Some(AssetNode::Generated(g)) => g.primary_outputs.extend(created),
            _ => {}
        }
    }
    Ok(())
}

fn expand_post_build_phase(graph: &mut AssetGraph, actions: &[PostBuildAction], root_name: &str) {
    for action in actions {
        let sources: Vec<AssetId> = graph
            .nodes()
            .filter_map(|node| node.as_source().map(|s| s.id.clone()))
            .filter(|id| {
                let is_root = id.package() == root_name;
                action.target_packages.matches(id.package(), is_root)
                    && action.generate_for.matches(id.path())
                    && action
                        .builder
                        .input_extensions()
                        .iter()
                        .any(|ext| id.path().ends_with(ext.as_str()))
            })
            .collect();
        for source in sources {
            let anchor_id = PostProcessAnchorNode::id_for(&source, &action.key);
            if !graph.contains(&anchor_id) {
                graph.add(AssetNode::PostProcessAnchor(PostProcessAnchorNode::new(
                    source,
                    action.key.clone(),
                )));
            }
        }
    }
}
