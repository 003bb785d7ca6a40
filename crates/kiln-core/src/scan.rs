//! Source tree scanning.
//!
//! Walks every package root and produces the set of source assets the
//! build considers, filtered by each package's configured sources. Hidden
//! files and directories, the engine cache, and the engine's own
//! configuration files are never sources.

use std::path::PathBuf;

use kiln_asset::{AssetId, PackageGraph};
use rustc_hash::FxHashMap;
use walkdir::WalkDir;

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};
use crate::rw::mtime_millis;

/// One file found by the scan.
#[derive(Debug, Clone)]
pub(crate) struct ScannedSource {
    pub id: AssetId,
    pub path: PathBuf,
    pub mtime_millis: Option<u64>,
}

/// Whether a file name is engine configuration rather than a source.
fn is_engine_config(name: &str) -> bool {
    name == "kiln.packages.json"
        || (name.starts_with("kiln.") && name.ends_with("config.json"))
}

/// Scan all packages, in stable (package, path) order.
pub(crate) fn scan_sources(
    packages: &PackageGraph,
    configs: &FxHashMap<String, BuildConfig>,
) -> Result<Vec<ScannedSource>> {
    let mut sources = Vec::new();
    for package in packages.packages() {
        let sources_set = configs
            .get(package.name())
            .cloned()
            .unwrap_or_default()
            .sources_input_set()?;
        let root = package.root();
        if !root.exists() {
            return Err(BuildError::CannotBuild(format!(
                "package `{}` root {} does not exist",
                package.name(),
                root.display()
            )));
        }
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // Prunes hidden entries and with them the engine cache.
                // Depth 0 is the package root itself, whatever its name.
                entry.depth() == 0
                    || !entry
                        .file_name()
                        .to_str()
                        .map(|name| name.starts_with('.'))
                        .unwrap_or(true)
            });
        for entry in walker {
            let entry = entry.map_err(|e| {
                BuildError::CannotBuild(format!(
                    "failed to scan package `{}`: {e}",
                    package.name()
                ))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if is_engine_config(name) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let rel = relative.to_string_lossy().replace('\\', "/");
            if !sources_set.matches(&rel) {
                continue;
            }
            sources.push(ScannedSource {
                id: AssetId::new(package.name(), rel),
                path: entry.path().to_path_buf(),
                mtime_millis: mtime_millis(entry.path()),
            });
        }
    }
    sources.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(root: &std::path::Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_scan_skips_hidden_and_engine_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "web/a.txt", "a");
        write(dir.path(), "lib/b.txt", "b");
        write(dir.path(), ".kiln/asset_graph.json", "{}");
        write(dir.path(), ".git/config", "x");
        write(dir.path(), "kiln.config.json", "{}");
        write(dir.path(), "kiln.release.config.json", "{}");

        let packages = PackageGraph::single("a", dir.path());
        let sources = scan_sources(&packages, &FxHashMap::default()).unwrap();
        let ids: Vec<String> = sources.iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["a|lib/b.txt", "a|web/a.txt"]);
        assert!(sources[0].mtime_millis.is_some());
    }

    #[test]
    fn test_scan_honors_sources_config() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "web/a.txt", "a");
        write(dir.path(), "notes/readme.txt", "n");

        let mut configs = FxHashMap::default();
        let config: BuildConfig = serde_json::from_value(serde_json::json!({
            "sources": { "include": ["web/**"] }
        }))
        .unwrap();
        configs.insert("a".to_string(), config);

        let packages = PackageGraph::single("a", dir.path());
        let sources = scan_sources(&packages, &configs).unwrap();
        let ids: Vec<String> = sources.iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["a|web/a.txt"]);
    }
}
