//! Incremental invalidation.
//!
//! Diffs a loaded graph against the current filesystem and configuration:
//! changed engine inputs force a full rebuild; changed, new, or deleted
//! sources mark their transitive consumers dirty; globs whose matching set
//! moved dirty their readers; generated outputs missing from disk dirty
//! themselves so their actions rerun.

use kiln_asset::{AssetId, Digest, Glob};
use kiln_graph::{AssetGraph, AssetNode, InternalNode, SourceNode, SourceReconcile};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::Result;
use crate::rw::ReaderWriter;
use crate::scan::ScannedSource;

/// Outcome of invalidating a loaded graph.
#[derive(Debug, Default)]
pub(crate) struct InvalidationOutcome {
    /// When set, the loaded graph is unusable and the caller must rebuild
    /// from scratch (after purging the engine cache).
    pub full_rebuild_reason: Option<String>,
}

/// Bring a loaded graph up to date with the world.
pub(crate) fn invalidate(
    graph: &mut AssetGraph,
    scan: &[ScannedSource],
    internal: &[InternalNode],
    rw: &ReaderWriter,
) -> Result<InvalidationOutcome> {
    // Engine inputs first: any change invalidates everything.
    for current in internal {
        let stored = graph.get(&current.id).and_then(|n| match n {
            AssetNode::Internal(i) => Some(i.digest),
            _ => None,
        });
        if stored != Some(current.digest) {
            info!(input = %current.id, "engine input changed");
            return Ok(InvalidationOutcome {
                full_rebuild_reason: Some(format!("engine input {} changed", current.id)),
            });
        }
    }

    reconcile_sources(graph, scan, rw)?;
    recheck_globs(graph);
    verify_outputs_on_disk(graph, rw);

    Ok(InvalidationOutcome::default())
}

/// Step 1 and 3: diff the source set and propagate dirtiness.
fn reconcile_sources(
    graph: &mut AssetGraph,
    scan: &[ScannedSource],
    rw: &ReaderWriter,
) -> Result<()> {
    let scanned: FxHashMap<&AssetId, &ScannedSource> =
        scan.iter().map(|s| (&s.id, s)).collect();

    let known_sources: Vec<AssetId> = graph
        .nodes()
        .filter_map(|n| n.as_source().map(|s| s.id.clone()))
        .collect();

    for id in known_sources {
        match scanned.get(&id) {
            None => {
                debug!(source = %id, "source deleted");
                if let SourceReconcile::Deleted { primary_outputs } =
                    graph.reconcile_source(&id, None)
                {
                    for output in primary_outputs {
                        for removed in graph.remove_generated_subtree(&output) {
                            rw.delete(&removed.id, removed.is_hidden)?;
                        }
                    }
                }
            }
            Some(current) => {
                let (stored_digest, stored_mtime) = match graph.get(&id).and_then(|n| n.as_source())
                {
                    Some(s) => (s.digest, s.last_modified_millis),
                    None => continue,
                };
                let mtime_reliable =
                    current.mtime_millis.is_some() && current.mtime_millis == stored_mtime;
                if mtime_reliable && stored_digest.is_some() {
                    continue;
                }
                let digest = match std::fs::read(&current.path) {
                    Ok(bytes) => Digest::compute(&id, &bytes),
                    Err(_) => continue, // raced deletion; the next build settles it
                };
                if stored_digest.is_none() {
                    // Never hashed before: record without dirtying anyone.
                    if let Some(s) = graph.get_mut(&id).and_then(|n| n.as_source_mut()) {
                        s.digest = Some(digest);
                        s.last_modified_millis = current.mtime_millis;
                    }
                    continue;
                }
                if graph.reconcile_source(&id, Some((digest, current.mtime_millis)))
                    == SourceReconcile::Modified
                {
                    debug!(source = %id, "source modified");
                }
            }
        }
    }

    // New sources: plain additions, or resurrections of tombstones.
    for source in scan {
        match graph.get(&source.id) {
            None => {
                let mut node = SourceNode::new(source.id.clone());
                node.last_modified_millis = source.mtime_millis;
                graph.add(AssetNode::Source(node));
            }
            Some(AssetNode::MissingSource(_)) => {
                debug!(source = %source.id, "missing source appeared");
                graph.mark_dirty(&source.id);
                let mut node = SourceNode::new(source.id.clone());
                node.last_modified_millis = source.mtime_millis;
                graph.add(AssetNode::Source(node));
            }
            // Generated nodes own their paths; a file sitting there is the
            // output itself, not a new source.
            Some(_) => {}
        }
    }
    Ok(())
}

/// Step 4: globs whose matching set changed dirty their readers.
fn recheck_globs(graph: &mut AssetGraph) {
    let globs: Vec<(AssetId, String, String, usize)> = graph
        .nodes()
        .filter_map(|n| match n {
            AssetNode::Glob(g) => Some((
                g.id.clone(),
                g.package.clone(),
                g.pattern.clone(),
                g.phase_number,
            )),
            _ => None,
        })
        .collect();

    for (id, package, pattern, phase_number) in globs {
        let Ok(glob) = Glob::new(&pattern) else {
            continue;
        };
        let current: std::collections::BTreeSet<AssetId> = graph
            .nodes()
            .filter_map(|node| match node {
                AssetNode::Source(s) => Some(&s.id),
                AssetNode::Generated(g)
                    if g.phase_number < phase_number && !g.is_hidden && g.is_readable() =>
                {
                    Some(&g.id)
                }
                _ => None,
            })
            .filter(|candidate| {
                candidate.package() == package
                    && glob.matches(candidate.path())
                    && !ReaderWriter::is_engine_path(candidate.path())
            })
            .cloned()
            .collect();

        let changed = match graph.get(&id).and_then(|n| n.as_glob()) {
            Some(node) => node.results != current,
            None => continue,
        };
        if changed {
            debug!(glob = %pattern, "glob match set changed");
            graph.mark_dirty(&id);
            if let Some(AssetNode::Glob(node)) = graph.get_mut(&id) {
                node.results = current;
            }
        }
    }
}

/// Step 5: outputs that vanished from disk must be rebuilt.
fn verify_outputs_on_disk(graph: &mut AssetGraph, rw: &ReaderWriter) {
    let missing: Vec<AssetId> = graph
        .nodes()
        .filter_map(|n| n.as_generated())
        .filter(|g| g.is_readable() && !rw.exists(&g.id, g.is_hidden))
        .map(|g| g.id.clone())
        .collect();
    for id in missing {
        debug!(output = %id, "output missing on disk");
        graph.mark_dirty(&id);
    }
}
