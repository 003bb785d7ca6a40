//! Incremental rebuild behavior: idempotence, minimal rebuilds, early
//! cutoff, cleanup, and the graph version gate.

mod helpers;

use helpers::*;
use kiln_core::{AssetId, BuilderApplication};
use pretty_assertions::assert_eq;

fn copy_builders() -> Vec<BuilderApplication> {
    vec![BuilderApplication::new(
        "copy",
        CopyBuilder::new(".txt", ".txt.copy"),
    )]
}

/// Building twice with no changes runs nothing the second time.
#[tokio::test]
async fn rebuild_without_changes_is_a_no_op() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");
    pkg.write("web/b.txt", "b");

    let first = pkg.build(copy_builders()).await;
    assert_eq!(first.actions_run, 2);
    assert!(first.full_build);

    let second = pkg.build(copy_builders()).await;
    assert!(!second.full_build);
    assert_eq!(second.actions_run, 0);
    assert_eq!(second.outputs_written, 0);
}

/// Changing one source reruns exactly its own action.
#[tokio::test]
async fn single_change_rebuilds_one_action() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");
    pkg.write("web/b.txt", "b");

    pkg.build(copy_builders()).await;
    pkg.write("web/a.txt", "a2");

    let summary = pkg.build(copy_builders()).await;
    assert_eq!(summary.actions_run, 1);
    assert_eq!(pkg.read("web/a.txt.copy").as_deref(), Some("a2"));
    assert_eq!(pkg.read("web/b.txt.copy").as_deref(), Some("b"));
}

/// A changed input whose output digests identically cuts the rebuild off
/// before its dependents.
#[tokio::test]
async fn identical_output_digest_cuts_off_downstream() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");

    let builders = || {
        vec![
            BuilderApplication::new("constant", ConstantBuilder::new(".txt", ".txt.k", "K")),
            BuilderApplication::new("copy", CopyBuilder::new(".k", ".k.copy")),
        ]
    };

    let first = pkg.build(builders()).await;
    assert_eq!(first.actions_run, 2);
    assert_eq!(pkg.read("web/a.txt.k.copy").as_deref(), Some("K"));

    pkg.write("web/a.txt", "something else");
    let second = pkg.build(builders()).await;
    // The constant builder reruns, its output digest is unchanged, and the
    // copy of it is skipped.
    assert_eq!(second.actions_run, 1);
    assert_eq!(pkg.read("web/a.txt.k.copy").as_deref(), Some("K"));
}

/// Deleting a source removes its generated descendants from disk and
/// leaves a tombstone in the graph.
#[tokio::test]
async fn deleted_source_cleans_up_outputs() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");

    pkg.build(vec![
        BuilderApplication::new("copy", CopyBuilder::new(".txt", ".txt.copy")),
        BuilderApplication::new("clone", CopyBuilder::new(".copy", ".copy.clone")),
    ])
    .await;
    assert!(pkg.exists("web/a.txt.copy"));
    assert!(pkg.exists("web/a.txt.copy.clone"));

    pkg.delete("web/a.txt");
    pkg.build(vec![
        BuilderApplication::new("copy", CopyBuilder::new(".txt", ".txt.copy")),
        BuilderApplication::new("clone", CopyBuilder::new(".copy", ".copy.clone")),
    ])
    .await;

    assert!(!pkg.exists("web/a.txt.copy"));
    assert!(!pkg.exists("web/a.txt.copy.clone"));
    let bytes = std::fs::read(pkg.root().join(".kiln/asset_graph.json")).unwrap();
    let graph = kiln_core::AssetGraph::deserialize(&bytes).unwrap();
    assert!(graph
        .get(&AssetId::new("a", "web/a.txt"))
        .map(|n| n.is_missing_source())
        .unwrap_or(true));
    assert!(graph.get(&AssetId::new("a", "web/a.txt.copy")).is_none());
}

/// A deleted output file reappears on the next build without touching its
/// unchanged siblings.
#[tokio::test]
async fn deleted_output_is_restored() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");
    pkg.write("web/b.txt", "b");

    pkg.build(copy_builders()).await;
    pkg.delete("web/a.txt.copy");

    let summary = pkg.build(copy_builders()).await;
    assert_eq!(summary.actions_run, 1);
    assert_eq!(pkg.read("web/a.txt.copy").as_deref(), Some("a"));
}

/// A step that probed for a nonexistent asset reruns when the asset
/// appears: the tombstone left by the negative read carries the edge.
#[tokio::test]
async fn created_missing_input_invalidates_reader() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");

    let builders = || {
        vec![BuilderApplication::new(
            "probe-missing",
            MissingProbeBuilder::new(),
        )]
    };

    let first = pkg.build(builders()).await;
    assert_eq!(first.actions_run, 1);
    assert_eq!(pkg.read("web/a.txt.probe").as_deref(), Some("false"));

    // Nothing changed: no-op.
    let idle = pkg.build(builders()).await;
    assert_eq!(idle.actions_run, 0);

    // The probed asset now exists; the step reruns and sees it.
    pkg.write("web/extra.txt", "here");
    let second = pkg.build(builders()).await;
    assert_eq!(second.actions_run, 1);
    assert_eq!(pkg.read("web/a.txt.probe").as_deref(), Some("true"));
}

/// A glob's matching set changing reruns the step that globbed, while an
/// unchanged set stays quiet.
#[tokio::test]
async fn glob_match_set_change_invalidates_reader() {
    let pkg = TestPackage::new();
    pkg.write("web/index.txt", "index");
    pkg.write("web/a.txt", "a");

    let builders = || vec![BuilderApplication::new("glob-list", GlobListBuilder::new())];

    let first = pkg.build(builders()).await;
    assert_eq!(first.actions_run, 1);
    assert_eq!(
        pkg.read("web/index.out").as_deref(),
        Some("a|web/a.txt,a|web/index.txt")
    );

    let idle = pkg.build(builders()).await;
    assert_eq!(idle.actions_run, 0);

    pkg.write("web/c.txt", "c");
    let second = pkg.build(builders()).await;
    assert_eq!(second.actions_run, 1);
    assert_eq!(
        pkg.read("web/index.out").as_deref(),
        Some("a|web/a.txt,a|web/c.txt,a|web/index.txt")
    );
}

/// Tampering with the stored graph version forces exactly one full
/// rebuild.
#[tokio::test]
async fn version_gate_forces_full_rebuild_once() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");
    pkg.build(copy_builders()).await;

    let graph_path = pkg.root().join(".kiln/asset_graph.json");
    let mut doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&graph_path).unwrap()).unwrap();
    doc["version"] = serde_json::json!(999);
    std::fs::write(&graph_path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let rebuilt = pkg.build(copy_builders()).await;
    assert!(rebuilt.full_build);
    assert_eq!(rebuilt.actions_run, 1);

    let again = pkg.build(copy_builders()).await;
    assert!(!again.full_build);
    assert_eq!(again.actions_run, 0);
}

/// Changing the builder set is a configuration change: full rebuild.
#[tokio::test]
async fn changed_builders_force_full_rebuild() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");
    pkg.build(copy_builders()).await;

    let summary = pkg
        .build(vec![BuilderApplication::new(
            "copy",
            CopyBuilder::new(".txt", ".txt.copy2"),
        )])
        .await;
    assert!(summary.full_build);
    assert_eq!(pkg.read("web/a.txt.copy2").as_deref(), Some("a"));
}

/// Two fresh builds of the same tree produce byte-identical outputs.
#[tokio::test]
async fn fresh_builds_are_deterministic() {
    let outputs = |pkg: &TestPackage| {
        let mut files = Vec::new();
        for rel in ["web/a.txt.copy", "web/b.txt.copy"] {
            files.push((rel, pkg.read(rel)));
        }
        files
    };

    let one = TestPackage::new();
    one.write("web/a.txt", "alpha");
    one.write("web/b.txt", "beta");
    one.build(copy_builders()).await;

    let two = TestPackage::new();
    two.write("web/a.txt", "alpha");
    two.write("web/b.txt", "beta");
    two.build(copy_builders()).await;

    assert_eq!(outputs(&one), outputs(&two));
}

/// Failed actions are retried on every build until they recover.
#[tokio::test]
async fn failure_is_retried_until_it_recovers() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");

    let failing = pkg
        .build(vec![BuilderApplication::new(
            "out",
            FailingBuilder::new(".txt", ".txt.out"),
        )])
        .await;
    assert!(!failing.succeeded());
    assert!(!pkg.exists("web/a.txt.out"));

    // Unchanged inputs: the failure is retried, and fails again.
    let retried = pkg
        .build(vec![BuilderApplication::new(
            "out",
            FailingBuilder::new(".txt", ".txt.out"),
        )])
        .await;
    assert_eq!(retried.actions_run, 1);
    assert!(!retried.succeeded());

}

/// Build filters keep hidden outputs lazy but never skip to-source
/// outputs.
#[tokio::test]
async fn build_filters_scope_hidden_outputs() {
    let pkg = TestPackage::new();
    pkg.write("web/a.txt", "a");
    pkg.write("web/b.txt", "b");

    let summary = kiln_core::BuildOptions::new(pkg.root())
        .package_graph(kiln_core::PackageGraph::single("a", pkg.root()))
        .builder(
            BuilderApplication::new("copy", CopyBuilder::new(".txt", ".txt.copy"))
                .hide_output(true),
        )
        .build_filter("web/a.txt.copy")
        .build()
        .await
        .unwrap();

    assert!(summary.succeeded());
    assert_eq!(pkg.read_hidden("a", "web/a.txt.copy").as_deref(), Some("a"));
    assert_eq!(pkg.read_hidden("a", "web/b.txt.copy"), None);
}
