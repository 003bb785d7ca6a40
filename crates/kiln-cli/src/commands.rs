//! Subcommand implementations.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_core::{
    BuildError, BuildOptions, BuildSummary, BuilderApplication, PostProcessApplication,
};
use tracing::{error, info};

use crate::cli::{BuildArgs, WatchArgs};
use crate::watcher::FileWatcher;
use crate::{EXIT_BUILD_FAILURE, EXIT_CONFIG_ERROR, EXIT_SUCCESS};

fn exit_code_for(error: &BuildError) -> i32 {
    if error.is_config_error() {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_BUILD_FAILURE
    }
}

async fn run_build(
    root: &Path,
    args: &BuildArgs,
    builders: Vec<BuilderApplication>,
    post_process: Vec<PostProcessApplication>,
) -> Result<BuildSummary, BuildError> {
    let mut options = BuildOptions::new(root)
        .delete_conflicting_outputs(args.delete_conflicting_outputs)
        .low_resources_mode(args.low_resources_mode);
    for application in builders {
        options = options.builder(application);
    }
    for application in post_process {
        options = options.post_process(application);
    }
    for pattern in &args.build_filter {
        options = options.build_filter(pattern);
    }
    if let Some(name) = &args.config {
        options = options.config_name(name);
    }
    if let Some(dir) = &args.output {
        options = options.output_dir(dir);
    }
    options.build().await
}

/// `kiln build`
pub(crate) async fn build(
    root: &Path,
    args: BuildArgs,
    builders: Vec<BuilderApplication>,
    post_process: Vec<PostProcessApplication>,
) -> i32 {
    match run_build(root, &args, builders, post_process).await {
        Ok(summary) if summary.succeeded() => EXIT_SUCCESS,
        Ok(summary) => {
            error!("build failed: {} step(s) failed", summary.failures.len());
            EXIT_BUILD_FAILURE
        }
        Err(e) => {
            error!("{e}");
            exit_code_for(&e)
        }
    }
}

/// `kiln watch`: build, then rebuild on every relevant change.
pub(crate) async fn watch(
    root: &Path,
    args: WatchArgs,
    builders: Vec<BuilderApplication>,
    post_process: Vec<PostProcessApplication>,
) -> i32 {
    match run_build(root, &args.build, builders.clone(), post_process.clone()).await {
        Ok(_) => {}
        Err(e) if e.is_config_error() => {
            error!("{e}");
            return EXIT_CONFIG_ERROR;
        }
        Err(e) => error!("{e}"),
    }

    let debounce = Duration::from_millis(args.debounce);
    let (watcher, mut rx) = match FileWatcher::new(root.to_path_buf(), debounce) {
        Ok(pair) => pair,
        Err(e) => {
            error!("cannot watch {}: {e}", root.display());
            return EXIT_BUILD_FAILURE;
        }
    };
    let mut own_outputs = generated_output_paths(root);
    info!("watching {} for changes", watcher.root().display());

    while let Some(first) = rx.recv().await {
        let mut relevant = !own_outputs.contains(first.path());
        // Quiet period: fold the burst into one rebuild.
        tokio::time::sleep(debounce).await;
        while let Ok(more) = rx.try_recv() {
            relevant |= !own_outputs.contains(more.path());
        }
        if !relevant {
            continue;
        }
        info!(path = %first.path().display(), "change detected");
        match run_build(root, &args.build, builders.clone(), post_process.clone()).await {
            Ok(_) => own_outputs = generated_output_paths(root),
            Err(e) if e.is_config_error() => {
                error!("{e}");
                return EXIT_CONFIG_ERROR;
            }
            Err(e) => error!("{e}"),
        }
    }
    EXIT_SUCCESS
}

/// Absolute paths of known to-source outputs, so the watcher does not
/// rebuild in response to the engine's own writes.
fn generated_output_paths(root: &Path) -> HashSet<PathBuf> {
    let mut paths = HashSet::new();
    let Ok(bytes) = std::fs::read(root.join(".kiln/asset_graph.json")) else {
        return paths;
    };
    let Ok(graph) = kiln_core::AssetGraph::deserialize(&bytes) else {
        return paths;
    };
    for node in graph.nodes() {
        if let kiln_core::AssetNode::Generated(g) = node {
            if !g.is_hidden {
                paths.insert(root.join(g.id.path()));
            }
        }
    }
    paths
}

/// `kiln clean`: delete the engine cache, leaving to-source outputs alone.
pub(crate) fn clean(root: &Path) -> i32 {
    let cache = root.join(kiln_core::CACHE_DIR);
    match std::fs::remove_dir_all(&cache) {
        Ok(()) => {
            info!("deleted {}", cache.display());
            EXIT_SUCCESS
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("nothing to clean");
            EXIT_SUCCESS
        }
        Err(e) => {
            error!("cannot delete {}: {e}", cache.display());
            EXIT_BUILD_FAILURE
        }
    }
}
