//! On-disk asset reading and writing.
//!
//! Maps asset ids to physical locations and performs the raw I/O the
//! engine needs. Non-hidden outputs live in the package source tree; hidden
//! outputs live under the engine cache at `.kiln/generated/<package>/`.
//! Visibility policy is enforced a layer up, where the graph is available.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use kiln_asset::{AssetId, PackageGraph};

/// Engine-owned directory inside the root package. Never readable by
/// builders and the only place the engine deletes recursively.
pub const CACHE_DIR: &str = ".kiln";

/// Physical reader/writer for assets and engine state.
#[derive(Debug, Clone)]
pub(crate) struct ReaderWriter {
    packages: PackageGraph,
    cache_root: PathBuf,
}

impl ReaderWriter {
    pub fn new(packages: PackageGraph) -> ReaderWriter {
        let cache_root = packages.root_package().root().join(CACHE_DIR);
        ReaderWriter {
            packages,
            cache_root,
        }
    }

    /// Where the serialized asset graph lives.
    pub fn graph_file(&self) -> PathBuf {
        self.cache_root.join("asset_graph.json")
    }

    /// Root of the generated-output cache.
    pub fn generated_root(&self) -> PathBuf {
        self.cache_root.join("generated")
    }

    /// Whether an asset path points into the engine-owned tree.
    pub fn is_engine_path(path: &str) -> bool {
        path == CACHE_DIR || path.starts_with(".kiln/")
    }

    /// Physical location of an asset.
    pub fn path_for(&self, id: &AssetId, hidden: bool) -> PathBuf {
        if hidden {
            self.generated_root().join(id.package()).join(id.path())
        } else {
            self.packages
                .source_path(id)
                .unwrap_or_else(|| self.generated_root().join(id.package()).join(id.path()))
        }
    }

    pub fn read(&self, id: &AssetId, hidden: bool) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_for(id, hidden))
    }

    pub fn exists(&self, id: &AssetId, hidden: bool) -> bool {
        self.path_for(id, hidden).exists()
    }

    pub fn write(&self, id: &AssetId, hidden: bool, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.path_for(id, hidden);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)
    }

    /// Delete an asset's file if present. Missing files are not an error;
    /// a failed step may never have written them.
    pub fn delete(&self, id: &AssetId, hidden: bool) -> std::io::Result<()> {
        match std::fs::remove_file(self.path_for(id, hidden)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Mtime of a source file in milliseconds, when the platform offers it.
    pub fn source_mtime_millis(&self, id: &AssetId) -> Option<u64> {
        let path = self.packages.source_path(id)?;
        mtime_millis(&path)
    }

    /// Remove the whole generated cache. Used on full rebuilds; confined to
    /// the engine-owned directory by construction.
    pub fn purge_generated(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(self.generated_root()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Persist the serialized graph atomically (temp file, then rename).
    pub fn write_graph(&self, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.graph_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, bytes)?;
        std::fs::rename(&temp, &path)
    }

    /// Load the serialized graph, `None` when no previous build exists.
    pub fn read_graph(&self) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.graph_file()) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Mtime in milliseconds since the epoch, `None` when unavailable.
pub(crate) fn mtime_millis(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let millis = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
    u64::try_from(millis).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixture() -> (tempfile::TempDir, ReaderWriter) {
        let dir = tempfile::tempdir().unwrap();
        let packages = PackageGraph::single("a", dir.path());
        let rw = ReaderWriter::new(packages);
        (dir, rw)
    }

    #[test]
    fn test_hidden_and_visible_locations() {
        let (dir, rw) = fixture();
        let id = AssetId::new("a", "web/a.txt.copy");
        assert_eq!(rw.path_for(&id, false), dir.path().join("web/a.txt.copy"));
        assert_eq!(
            rw.path_for(&id, true),
            dir.path().join(".kiln/generated/a/web/a.txt.copy")
        );
    }

    #[test]
    fn test_write_read_delete_round_trip() {
        let (_dir, rw) = fixture();
        let id = AssetId::new("a", "web/out.txt");
        rw.write(&id, true, b"generated").unwrap();
        assert!(rw.exists(&id, true));
        assert_eq!(rw.read(&id, true).unwrap(), b"generated");
        rw.delete(&id, true).unwrap();
        assert!(!rw.exists(&id, true));
        // Deleting again is fine.
        rw.delete(&id, true).unwrap();
    }

    #[test]
    fn test_engine_path_detection() {
        assert!(ReaderWriter::is_engine_path(".kiln"));
        assert!(ReaderWriter::is_engine_path(".kiln/asset_graph.json"));
        assert!(!ReaderWriter::is_engine_path("web/kiln.txt"));
    }

    #[test]
    fn test_graph_persistence() {
        let (_dir, rw) = fixture();
        assert_eq!(rw.read_graph().unwrap(), None);
        rw.write_graph(b"{\"version\":3}").unwrap();
        assert_eq!(rw.read_graph().unwrap().unwrap(), b"{\"version\":3}");
    }

    #[test]
    fn test_purge_is_confined_to_cache() {
        let (dir, rw) = fixture();
        std::fs::write(dir.path().join("keep.txt"), b"keep").unwrap();
        rw.write(&AssetId::new("a", "web/out.txt"), true, b"x").unwrap();
        rw.purge_generated().unwrap();
        assert!(dir.path().join("keep.txt").exists());
        assert!(!rw.exists(&AssetId::new("a", "web/out.txt"), true));
    }
}
