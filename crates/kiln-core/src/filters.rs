//! Build filters and build directories.
//!
//! Filters limit which outputs a build must produce. Non-hidden outputs are
//! always produced regardless of filters, so the source tree stays
//! deterministic; hidden outputs are produced only when a filter (or an
//! on-demand read) asks for them.

use kiln_asset::{AssetId, Glob, GlobError, HIDDEN_PREFIX};
use thiserror::Error;

/// Errors parsing a `--build-filter` pattern.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("invalid build filter `{pattern}`: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: GlobError,
    },

    #[error("invalid build filter `{0}`: empty package or path")]
    Empty(String),
}

/// One output filter, parsed from `[$$][<package>|]<path-glob>`.
///
/// The `$$` prefix selects the cache-located (hidden) form; without it the
/// filter matches the logical form regardless of where the output lives.
/// A filter without a package part applies to the root package.
#[derive(Debug, Clone)]
pub struct BuildFilter {
    package: String,
    path: Glob,
    hidden_only: bool,
}

impl BuildFilter {
    /// Parse a filter pattern against the given root package name.
    pub fn parse(pattern: &str, root_package: &str) -> Result<BuildFilter, FilterParseError> {
        let (hidden_only, rest) = match pattern.strip_prefix(HIDDEN_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        let (package, path) = match rest.split_once('|') {
            Some((package, path)) => (package.to_string(), path),
            None => (root_package.to_string(), rest),
        };
        if package.is_empty() || path.is_empty() {
            return Err(FilterParseError::Empty(pattern.to_string()));
        }
        let path = Glob::new(path).map_err(|source| FilterParseError::Glob {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(BuildFilter {
            package,
            path,
            hidden_only,
        })
    }

    /// Whether a generated output matches this filter.
    pub fn matches(&self, id: &AssetId, is_hidden: bool) -> bool {
        if self.hidden_only && !is_hidden {
            return false;
        }
        id.package() == self.package && self.path.matches(id.path())
    }
}

/// Whether any filter matches the output.
pub fn any_filter_matches(filters: &[BuildFilter], id: &AssetId, is_hidden: bool) -> bool {
    filters.iter().any(|f| f.matches(id, is_hidden))
}

/// Whether a non-hidden output falls under one of the build directories.
pub fn under_build_dirs(dirs: &[String], id: &AssetId) -> bool {
    dirs.iter().any(|dir| {
        let dir = dir.trim_end_matches('/');
        id.path() == dir || id.path().starts_with(&format!("{dir}/"))
    })
}
