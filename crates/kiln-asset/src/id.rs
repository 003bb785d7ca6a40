//! Stable asset identity.
//!
//! An [`AssetId`] names one logical file as a `(package, path)` pair. Paths
//! are always forward-slash separated and relative to the package root, so
//! the same id refers to the same asset on every platform and across builds.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Prefix callers use to reference the cache-located form of a hidden output.
pub const HIDDEN_PREFIX: &str = "$$";

/// Errors produced when parsing asset id string forms.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseIdError {
    /// The string is missing the `|` separator between package and path.
    #[error("invalid asset id `{0}`: expected `<package>|<path>`")]
    MissingSeparator(String),

    /// The package or path component is empty.
    #[error("invalid asset id `{0}`: empty package or path")]
    EmptyComponent(String),

    /// A `package:` URI that does not contain a path component.
    #[error("invalid package uri `{0}`: expected `package:<name>/<path>`")]
    InvalidPackageUri(String),
}

/// Identity of a single asset: a package name plus a relative path.
///
/// Two well-known path spaces exist: everything under `lib/` is public
/// across packages, everything else is private to the owning package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId {
    package: String,
    path: String,
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

impl AssetId {
    /// Create an id from a package name and a package-relative path.
    ///
    /// Backslashes are normalized to forward slashes and any leading `./`
    /// is stripped, so ids built from platform paths compare equal to ids
    /// parsed from their string form.
    pub fn new(package: impl Into<String>, path: impl Into<String>) -> Self {
        let mut path = path.into().replace('\\', "/");
        while let Some(rest) = path.strip_prefix("./") {
            path = rest.to_string();
        }
        Self {
            package: package.into(),
            path,
        }
    }

    /// The owning package name.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The forward-slash relative path within the package.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this asset is in the public `lib/` space.
    pub fn is_lib(&self) -> bool {
        self.path.starts_with("lib/")
    }

    /// The trailing extension chain of the path, e.g. `.txt.copy` for
    /// `web/a.txt.copy` returns `.copy`.
    pub fn extension(&self) -> Option<&str> {
        let name = self.path.rsplit('/').next()?;
        name.rfind('.').map(|i| &name[i..])
    }

    /// Replace a matched suffix of the path with another, producing the id
    /// of a derived asset in the same package.
    pub fn change_extension(&self, matched: &str, replacement: &str) -> Option<AssetId> {
        let stem = self.path.strip_suffix(matched)?;
        Some(AssetId::new(
            self.package.clone(),
            format!("{stem}{replacement}"),
        ))
    }

    /// The `package:` URI form, available only for assets under `lib/`.
    pub fn to_package_uri(&self) -> Option<String> {
        let sub = self.path.strip_prefix("lib/")?;
        Some(format!("package:{}/{}", self.package, sub))
    }

    /// Parse a `package:<name>/<path>` URI into the `lib/` asset it names.
    pub fn from_package_uri(uri: &str) -> Result<AssetId, ParseIdError> {
        let rest = uri
            .strip_prefix("package:")
            .ok_or_else(|| ParseIdError::InvalidPackageUri(uri.to_string()))?;
        let (package, sub) = rest
            .split_once('/')
            .ok_or_else(|| ParseIdError::InvalidPackageUri(uri.to_string()))?;
        if package.is_empty() || sub.is_empty() {
            return Err(ParseIdError::InvalidPackageUri(uri.to_string()));
        }
        Ok(AssetId::new(package, format!("lib/{sub}")))
    }

    /// Parse the external string form `<package>|<path>`, accepting the
    /// `$$` hidden-output prefix. Returns the id and whether the hidden form
    /// was used.
    pub fn parse_external(s: &str) -> Result<(AssetId, bool), ParseIdError> {
        let (hidden, s) = match s.strip_prefix(HIDDEN_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (package, path) = s
            .split_once('|')
            .ok_or_else(|| ParseIdError::MissingSeparator(s.to_string()))?;
        if package.is_empty() || path.is_empty() {
            return Err(ParseIdError::EmptyComponent(s.to_string()));
        }
        Ok((AssetId::new(package, path), hidden))
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.package, self.path)
    }
}

impl std::str::FromStr for AssetId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, _) = AssetId::parse_external(s)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_round_trip() {
        let id = AssetId::new("a", "web/a.txt");
        assert_eq!(id.to_string(), "a|web/a.txt");
        assert_eq!("a|web/a.txt".parse::<AssetId>().unwrap(), id);
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(
            AssetId::new("a", "./web\\a.txt"),
            AssetId::new("a", "web/a.txt")
        );
    }

    #[test]
    fn test_package_uri_only_for_lib() {
        let lib = AssetId::new("b", "lib/src/util.txt");
        assert_eq!(
            lib.to_package_uri().as_deref(),
            Some("package:b/src/util.txt")
        );
        assert_eq!(AssetId::from_package_uri("package:b/src/util.txt").unwrap(), lib);

        let private = AssetId::new("b", "web/main.txt");
        assert_eq!(private.to_package_uri(), None);
    }

    #[test]
    fn test_parse_external_hidden_prefix() {
        let (id, hidden) = AssetId::parse_external("$$a|lib/b.txt.copy").unwrap();
        assert_eq!(id, AssetId::new("a", "lib/b.txt.copy"));
        assert!(hidden);

        let (id, hidden) = AssetId::parse_external("a|lib/b.txt.copy").unwrap();
        assert_eq!(id, AssetId::new("a", "lib/b.txt.copy"));
        assert!(!hidden);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            AssetId::parse_external("no-separator"),
            Err(ParseIdError::MissingSeparator(_))
        ));
        assert!(matches!(
            AssetId::parse_external("|path"),
            Err(ParseIdError::EmptyComponent(_))
        ));
        assert!(AssetId::from_package_uri("package:nopath").is_err());
    }

    #[test]
    fn test_extension_helpers() {
        let id = AssetId::new("a", "web/a.txt");
        assert_eq!(id.extension(), Some(".txt"));
        assert_eq!(
            id.change_extension(".txt", ".txt.copy").unwrap(),
            AssetId::new("a", "web/a.txt.copy")
        );
        assert_eq!(id.change_extension(".md", ".html"), None);
    }
}
