//! Package adjacency and asset visibility.
//!
//! A [`PackageGraph`] is the set of packages participating in a build, with
//! one distinguished root. It answers two questions for the engine: where a
//! package lives on disk, and which of its assets other packages may see.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AssetId, Glob};

/// Errors from loading or querying the package graph.
#[derive(Debug, Error)]
pub enum PackageGraphError {
    #[error("failed to read package config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid package config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("root package `{0}` is not declared in the package config")]
    UnknownRoot(String),

    #[error("package `{of}` depends on undeclared package `{on}`")]
    UnknownDependency { of: String, on: String },
}

/// One package: a name, a filesystem root, and its declared dependencies.
#[derive(Debug, Clone)]
pub struct Package {
    name: String,
    root: PathBuf,
    dependencies: Vec<String>,
    /// Globs beyond `lib/**` that this package exposes to other packages.
    /// Populated from the package's build configuration.
    additional_public_assets: Vec<Glob>,
}

impl Package {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn additional_public_assets(&self) -> &[Glob] {
        &self.additional_public_assets
    }
}

/// Serialized form of the package configuration file.
#[derive(Debug, Serialize, Deserialize)]
struct PackagesConfig {
    root: String,
    packages: BTreeMap<String, PackageEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackageEntry {
    root: PathBuf,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// The set of packages with a distinguished root.
#[derive(Debug, Clone)]
pub struct PackageGraph {
    packages: BTreeMap<String, Package>,
    root: String,
}

impl PackageGraph {
    /// Load from a package configuration file. Package roots in the file are
    /// resolved relative to the file's directory.
    pub fn load(path: &Path) -> Result<PackageGraph, PackageGraphError> {
        let bytes = std::fs::read(path).map_err(|source| PackageGraphError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PackagesConfig =
            serde_json::from_slice(&bytes).map_err(|source| PackageGraphError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut packages = BTreeMap::new();
        for (name, entry) in &config.packages {
            packages.insert(
                name.clone(),
                Package {
                    name: name.clone(),
                    root: base.join(&entry.root),
                    dependencies: entry.dependencies.clone(),
                    additional_public_assets: Vec::new(),
                },
            );
        }
        for (name, entry) in &config.packages {
            for dep in &entry.dependencies {
                if !packages.contains_key(dep) {
                    return Err(PackageGraphError::UnknownDependency {
                        of: name.clone(),
                        on: dep.clone(),
                    });
                }
            }
        }
        if !packages.contains_key(&config.root) {
            return Err(PackageGraphError::UnknownRoot(config.root));
        }
        Ok(PackageGraph {
            packages,
            root: config.root,
        })
    }

    /// A graph containing a single root package. Used by embedders that
    /// build one package tree without a package configuration file.
    pub fn single(name: impl Into<String>, root: impl Into<PathBuf>) -> PackageGraph {
        let name = name.into();
        let mut packages = BTreeMap::new();
        packages.insert(
            name.clone(),
            Package {
                name: name.clone(),
                root: root.into(),
                dependencies: Vec::new(),
                additional_public_assets: Vec::new(),
            },
        );
        PackageGraph {
            packages,
            root: name,
        }
    }

    /// The distinguished root package.
    pub fn root_package(&self) -> &Package {
        &self.packages[&self.root]
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// All packages, in stable name order.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Install the `additional_public_assets` globs for a package, read from
    /// that package's build configuration.
    pub fn set_additional_public_assets(&mut self, package: &str, globs: Vec<Glob>) {
        if let Some(pkg) = self.packages.get_mut(package) {
            pkg.additional_public_assets = globs;
        }
    }

    /// Absolute path of a source asset on disk.
    pub fn source_path(&self, id: &AssetId) -> Option<PathBuf> {
        let pkg = self.packages.get(id.package())?;
        Some(pkg.root.join(id.path()))
    }

    /// Whether `id` is visible to code running on behalf of `from_package`.
    ///
    /// Assets are always visible within their own package. Across packages
    /// only `lib/**` and the owning package's `additional_public_assets`
    /// are visible.
    pub fn is_visible_from(&self, id: &AssetId, from_package: &str) -> bool {
        if id.package() == from_package {
            return true;
        }
        let Some(owner) = self.packages.get(id.package()) else {
            return false;
        };
        id.is_lib()
            || owner
                .additional_public_assets
                .iter()
                .any(|g| g.matches(id.path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn two_package_graph() -> PackageGraph {
        let dir = tempfile::tempdir().unwrap();
        let config = serde_json::json!({
            "root": "a",
            "packages": {
                "a": { "root": "a", "dependencies": ["b"] },
                "b": { "root": "b" }
            }
        });
        let path = dir.path().join("kiln.packages.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();
        let graph = PackageGraph::load(&path).unwrap();
        // The tempdir is only needed for the config file itself.
        drop(dir);
        graph
    }

    #[test]
    fn test_load_and_roots() {
        let graph = two_package_graph();
        assert_eq!(graph.root_package().name(), "a");
        assert_eq!(graph.get("a").unwrap().dependencies(), &["b".to_string()]);
        assert!(graph.contains("b"));
        assert!(!graph.contains("c"));
    }

    #[test]
    fn test_visibility_lib_is_public() {
        let graph = two_package_graph();
        assert!(graph.is_visible_from(&AssetId::new("b", "lib/b.txt"), "a"));
        assert!(!graph.is_visible_from(&AssetId::new("b", "web/b.txt"), "a"));
        // Own package sees everything.
        assert!(graph.is_visible_from(&AssetId::new("b", "web/b.txt"), "b"));
    }

    #[test]
    fn test_additional_public_assets() {
        let mut graph = two_package_graph();
        assert!(!graph.is_visible_from(&AssetId::new("b", "assets/logo.txt"), "a"));
        graph.set_additional_public_assets("b", vec![Glob::new("assets/**").unwrap()]);
        assert!(graph.is_visible_from(&AssetId::new("b", "assets/logo.txt"), "a"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = serde_json::json!({
            "root": "a",
            "packages": { "a": { "root": ".", "dependencies": ["ghost"] } }
        });
        let path = dir.path().join("kiln.packages.json");
        std::fs::write(&path, serde_json::to_vec(&config).unwrap()).unwrap();
        assert!(matches!(
            PackageGraph::load(&path),
            Err(PackageGraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_single_package() {
        let graph = PackageGraph::single("app", "/tmp/app");
        assert_eq!(graph.root_package().name(), "app");
        assert_eq!(
            graph.source_path(&AssetId::new("app", "web/a.txt")).unwrap(),
            PathBuf::from("/tmp/app/web/a.txt")
        );
    }
}
