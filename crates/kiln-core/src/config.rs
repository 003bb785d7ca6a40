//! Per-package build configuration.
//!
//! Each package may carry a `kiln.config.json` declaring which files are
//! sources, how individual builders are scoped and parameterized, and which
//! private assets the package exposes to others. A change to this file
//! invalidates the full build for the affected package (it is tracked as an
//! internal node).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_asset::Glob;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::phase::InputSet;

/// Default config file name; `--config <name>` selects
/// `kiln.<name>.config.json` instead.
pub const CONFIG_FILE: &str = "kiln.config.json";

/// Source include/exclude globs for a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourcesConfig {
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_include() -> Vec<String> {
    vec!["**".to_string()]
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            include: default_include(),
            exclude: Vec::new(),
        }
    }
}

/// Per-builder overrides within one package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BuilderOverride {
    /// Restricts the builder's inputs within this package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_for: Option<Vec<String>>,
    /// Opaque options handed to the builder through its build step.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

/// The parsed `kiln.config.json` of one package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BuildConfig {
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Keyed by builder application key.
    #[serde(default)]
    pub builders: BTreeMap<String, BuilderOverride>,

    /// Globs beyond `lib/**` this package exposes to other packages.
    #[serde(default)]
    pub additional_public_assets: Vec<String>,
}

impl BuildConfig {
    /// The config file name for an optional named configuration.
    pub fn file_name(config_name: Option<&str>) -> String {
        match config_name {
            Some(name) => format!("kiln.{name}.config.json"),
            None => CONFIG_FILE.to_string(),
        }
    }

    /// Load a package's build config, returning the default when the file
    /// does not exist. Also returns the path that was consulted so the
    /// caller can track it as an internal input.
    pub fn load(
        package_root: &Path,
        config_name: Option<&str>,
    ) -> Result<(BuildConfig, PathBuf), ConfigError> {
        let path = package_root.join(Self::file_name(config_name));
        if !path.exists() {
            return Ok((BuildConfig::default(), path));
        }
        let bytes = std::fs::read(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: BuildConfig =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Json {
                path: path.clone(),
                source,
            })?;
        Ok((config, path))
    }

    /// The source scoping as an [`InputSet`].
    pub fn sources_input_set(&self) -> Result<InputSet, ConfigError> {
        InputSet::new(&self.sources.include, &self.sources.exclude).map_err(|source| {
            ConfigError::Glob {
                pattern: format!(
                    "include={:?} exclude={:?}",
                    self.sources.include, self.sources.exclude
                ),
                source,
            }
        })
    }

    /// The per-builder `generate_for` restriction, if configured.
    pub fn generate_for(&self, builder_key: &str) -> Result<Option<InputSet>, ConfigError> {
        let Some(patterns) = self
            .builders
            .get(builder_key)
            .and_then(|b| b.generate_for.as_ref())
        else {
            return Ok(None);
        };
        let set = InputSet::new(patterns, std::iter::empty::<&str>()).map_err(|source| {
            ConfigError::Glob {
                pattern: patterns.join(","),
                source,
            }
        })?;
        Ok(Some(set))
    }

    /// The opaque options for a builder, `null` when not configured.
    pub fn options(&self, builder_key: &str) -> serde_json::Value {
        self.builders
            .get(builder_key)
            .map(|b| b.options.clone())
            .unwrap_or(serde_json::Value::Null)
    }

    /// The compiled `additional_public_assets` globs.
    pub fn public_globs(&self) -> Result<Vec<Glob>, ConfigError> {
        self.additional_public_assets
            .iter()
            .map(|p| {
                Glob::new(p).map_err(|source| ConfigError::Glob {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let (config, path) = BuildConfig::load(dir.path(), None).unwrap();
        assert_eq!(path, dir.path().join("kiln.config.json"));
        assert!(config.builders.is_empty());
        assert!(config.sources_input_set().unwrap().matches("web/a.txt"));
    }

    #[test]
    fn test_named_config_file() {
        assert_eq!(BuildConfig::file_name(None), "kiln.config.json");
        assert_eq!(
            BuildConfig::file_name(Some("release")),
            "kiln.release.config.json"
        );
    }

    #[test]
    fn test_load_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let config = serde_json::json!({
            "sources": { "include": ["web/**", "lib/**"], "exclude": ["web/skip/**"] },
            "builders": {
                "copy": { "generate_for": ["web/**"], "options": { "suffix": ".bak" } }
            },
            "additional_public_assets": ["assets/**"]
        });
        std::fs::write(
            dir.path().join("kiln.config.json"),
            serde_json::to_vec_pretty(&config).unwrap(),
        )
        .unwrap();

        let (config, _) = BuildConfig::load(dir.path(), None).unwrap();
        let sources = config.sources_input_set().unwrap();
        assert!(sources.matches("web/a.txt"));
        assert!(!sources.matches("web/skip/a.txt"));
        assert!(!sources.matches("bin/tool.txt"));

        let generate_for = config.generate_for("copy").unwrap().unwrap();
        assert!(generate_for.matches("web/a.txt"));
        assert!(!generate_for.matches("lib/a.txt"));
        assert_eq!(config.generate_for("other").unwrap(), None);

        assert_eq!(config.options("copy")["suffix"], ".bak");
        assert!(config.options("other").is_null());

        let globs = config.public_globs().unwrap();
        assert_eq!(globs.len(), 1);
        assert!(globs[0].matches("assets/logo.png"));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kiln.config.json"), b"{ not json").unwrap();
        assert!(matches!(
            BuildConfig::load(dir.path(), None),
            Err(ConfigError::Json { .. })
        ));
    }
}
