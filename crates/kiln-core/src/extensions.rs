//! Builder output-extension declarations.
//!
//! Every builder statically declares how output paths derive from input
//! paths. The engine uses the declaration twice: at planning time to create
//! expected generated nodes, and at validation time to reject builders that
//! would feed themselves.
//!
//! Input pattern forms:
//! - `.txt` — suffix match; outputs replace the matched suffix.
//! - `web/{{}}.txt` — capture form, anchored at the package root; outputs
//!   substitute the capture.
//! - `^web/robots.txt` — root-relative exact path.
//! - `$package$` / `$lib$` — whole-package placeholders; outputs are
//!   root-relative literals.

use kiln_asset::AssetId;
use kiln_graph::PlaceholderKind;

use crate::error::ExtensionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InputMatcher {
    /// Matches any path ending with the suffix.
    Suffix(String),
    /// Anchored capture: `<prefix>{{}}<suffix>`.
    Capture { prefix: String, suffix: String },
    /// Exact root-relative path.
    Exact(String),
    /// A synthetic whole-package input.
    Placeholder(PlaceholderKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExtensionPair {
    raw_input: String,
    matcher: InputMatcher,
    outputs: Vec<String>,
}

/// A builder's parsed `build_extensions` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildExtensions {
    pairs: Vec<ExtensionPair>,
}

impl BuildExtensions {
    /// Parse and statically validate a declaration.
    ///
    /// `builder` is only used in error messages.
    ///
    /// # Errors
    ///
    /// - [`ExtensionError::EmptyExtensions`] for an empty declaration;
    /// - [`ExtensionError::InvalidPattern`] for malformed patterns;
    /// - [`ExtensionError::SelfFeeding`] when an output extension would
    ///   match one of the builder's own input extensions.
    pub fn parse<I, S, O>(builder: &str, entries: I) -> Result<BuildExtensions, ExtensionError>
    where
        I: IntoIterator<Item = (S, O)>,
        S: AsRef<str>,
        O: IntoIterator,
        O::Item: AsRef<str>,
    {
        let mut pairs = Vec::new();
        for (input, outputs) in entries {
            let input = input.as_ref();
            let matcher = parse_input(builder, input)?;
            let outputs: Vec<String> = outputs
                .into_iter()
                .map(|o| o.as_ref().to_string())
                .collect();
            for output in &outputs {
                validate_output(builder, &matcher, input, output)?;
            }
            pairs.push(ExtensionPair {
                raw_input: input.to_string(),
                matcher,
                outputs,
            });
        }
        if pairs.is_empty() {
            return Err(ExtensionError::EmptyExtensions(builder.to_string()));
        }
        let extensions = BuildExtensions { pairs };
        extensions.check_self_feeding(builder)?;
        Ok(extensions)
    }

    /// Whether `path` matches any input pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.pairs.iter().any(|p| matcher_matches(&p.matcher, path))
    }

    /// The output paths this builder would produce for `path`, or `None`
    /// when no input pattern matches. The first matching pair wins.
    pub fn expected_outputs(&self, path: &str) -> Option<Vec<String>> {
        let pair = self
            .pairs
            .iter()
            .find(|p| matcher_matches(&p.matcher, path))?;
        let outputs = match &pair.matcher {
            InputMatcher::Suffix(suffix) => {
                let stem = &path[..path.len() - suffix.len()];
                pair.outputs.iter().map(|o| format!("{stem}{o}")).collect()
            }
            InputMatcher::Capture { prefix, suffix } => {
                let capture = &path[prefix.len()..path.len() - suffix.len()];
                pair.outputs
                    .iter()
                    .map(|o| o.replace("{{}}", capture))
                    .collect()
            }
            InputMatcher::Exact(_) | InputMatcher::Placeholder(_) => pair.outputs.clone(),
        };
        Some(outputs)
    }

    /// Output ids for an input id, in the same package.
    pub fn expected_output_ids(&self, input: &AssetId) -> Option<Vec<AssetId>> {
        let outputs = self.expected_outputs(input.path())?;
        Some(
            outputs
                .into_iter()
                .map(|path| AssetId::new(input.package(), path))
                .collect(),
        )
    }

    /// The placeholder this builder takes as primary input, if any.
    pub fn placeholder_input(&self) -> Option<PlaceholderKind> {
        self.pairs.iter().find_map(|p| match p.matcher {
            InputMatcher::Placeholder(kind) => Some(kind),
            _ => None,
        })
    }

    /// Reject declarations whose outputs would match their own inputs.
    fn check_self_feeding(&self, builder: &str) -> Result<(), ExtensionError> {
        for pair in &self.pairs {
            for output in &pair.outputs {
                let out_suffix = output_suffix(output);
                for other in &self.pairs {
                    let overlaps = match &other.matcher {
                        InputMatcher::Suffix(s) => out_suffix.ends_with(s.as_str()),
                        InputMatcher::Capture { suffix, .. } => {
                            !suffix.is_empty() && out_suffix.ends_with(suffix.as_str())
                        }
                        InputMatcher::Exact(p) => out_suffix == p,
                        InputMatcher::Placeholder(_) => false,
                    };
                    if overlaps {
                        return Err(ExtensionError::SelfFeeding {
                            builder: builder.to_string(),
                            input: other.raw_input.clone(),
                            output: output.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_input(builder: &str, pattern: &str) -> Result<InputMatcher, ExtensionError> {
    let invalid = |reason: &str| ExtensionError::InvalidPattern {
        builder: builder.to_string(),
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };
    if pattern.is_empty() {
        return Err(invalid("empty pattern"));
    }
    if pattern == "$package$" {
        return Ok(InputMatcher::Placeholder(PlaceholderKind::Package));
    }
    if pattern == "$lib$" {
        return Ok(InputMatcher::Placeholder(PlaceholderKind::Lib));
    }
    let (root_relative, rest) = match pattern.strip_prefix('^') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    if let Some(idx) = rest.find("{{}}") {
        if rest[idx + 4..].contains("{{}}") {
            return Err(invalid("at most one `{{}}` capture is allowed"));
        }
        return Ok(InputMatcher::Capture {
            prefix: rest[..idx].to_string(),
            suffix: rest[idx + 4..].to_string(),
        });
    }
    if root_relative {
        return Ok(InputMatcher::Exact(rest.to_string()));
    }
    Ok(InputMatcher::Suffix(rest.to_string()))
}

fn validate_output(
    builder: &str,
    matcher: &InputMatcher,
    input: &str,
    output: &str,
) -> Result<(), ExtensionError> {
    let invalid = |reason: &str| ExtensionError::InvalidPattern {
        builder: builder.to_string(),
        pattern: format!("{input} -> {output}"),
        reason: reason.to_string(),
    };
    if output.is_empty() {
        return Err(invalid("empty output template"));
    }
    match matcher {
        InputMatcher::Capture { .. } => {
            if output.matches("{{}}").count() > 1 {
                return Err(invalid("at most one `{{}}` substitution is allowed"));
            }
        }
        _ => {
            if output.contains("{{}}") {
                return Err(invalid(
                    "`{{}}` substitution requires a `{{}}` capture in the input pattern",
                ));
            }
        }
    }
    Ok(())
}

fn matcher_matches(matcher: &InputMatcher, path: &str) -> bool {
    match matcher {
        InputMatcher::Suffix(s) => path.ends_with(s.as_str()),
        InputMatcher::Capture { prefix, suffix } => {
            path.len() >= prefix.len() + suffix.len()
                && path.starts_with(prefix.as_str())
                && path.ends_with(suffix.as_str())
        }
        InputMatcher::Exact(p) => path == p,
        InputMatcher::Placeholder(kind) => path == kind.path(),
    }
}

/// The fixed suffix of an output template: everything after the capture
/// marker, or the whole template when there is none.
fn output_suffix(output: &str) -> &str {
    match output.rfind("{{}}") {
        Some(idx) => &output[idx + 4..],
        None => output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_suffix_outputs() {
        let ext = BuildExtensions::parse("copy", [(".txt", vec![".txt.copy"])]).unwrap();
        assert!(ext.matches("web/a.txt"));
        assert!(!ext.matches("web/a.md"));
        assert_eq!(
            ext.expected_outputs("web/a.txt").unwrap(),
            vec!["web/a.txt.copy".to_string()]
        );
    }

    #[test]
    fn test_multiple_outputs() {
        let ext =
            BuildExtensions::parse("multi", [(".txt", vec![".txt.one", ".txt.two"])]).unwrap();
        assert_eq!(
            ext.expected_outputs("a.txt").unwrap(),
            vec!["a.txt.one".to_string(), "a.txt.two".to_string()]
        );
    }

    #[test]
    fn test_capture_form() {
        let ext =
            BuildExtensions::parse("gen", [("web/{{}}.txt", vec!["gen/{{}}.out"])]).unwrap();
        assert!(ext.matches("web/a.txt"));
        assert!(!ext.matches("lib/a.txt"));
        assert_eq!(
            ext.expected_outputs("web/sub/a.txt").unwrap(),
            vec!["gen/sub/a.out".to_string()]
        );
    }

    #[test]
    fn test_root_relative_exact() {
        let ext =
            BuildExtensions::parse("root", [("^web/index.txt", vec!["web/index.html"])]).unwrap();
        assert!(ext.matches("web/index.txt"));
        assert!(!ext.matches("other/web/index.txt"));
    }

    #[test]
    fn test_placeholder_input() {
        let ext =
            BuildExtensions::parse("pkg", [("$package$", vec!["lib/manifest.txt"])]).unwrap();
        assert_eq!(ext.placeholder_input(), Some(PlaceholderKind::Package));
        assert_eq!(
            ext.expected_outputs("$package$").unwrap(),
            vec!["lib/manifest.txt".to_string()]
        );
    }

    #[test]
    fn test_self_feeding_rejected() {
        let err = BuildExtensions::parse("bad", [(".txt", vec![".g.txt"])]).unwrap_err();
        assert_eq!(
            err,
            ExtensionError::SelfFeeding {
                builder: "bad".to_string(),
                input: ".txt".to_string(),
                output: ".g.txt".to_string(),
            }
        );
    }

    #[test]
    fn test_self_feeding_across_pairs() {
        // The .md pair's output lands in the .txt pair's input space.
        let err = BuildExtensions::parse(
            "bad",
            [(".txt", vec![".txt.copy"]), (".md", vec![".md.txt"])],
        )
        .unwrap_err();
        assert!(matches!(err, ExtensionError::SelfFeeding { .. }));
    }

    #[test]
    fn test_chained_extension_is_not_self_feeding() {
        // `.txt.copy` does not end with `.txt`, so copy -> clone chains are
        // fine within one builder as long as the output differs.
        assert!(BuildExtensions::parse("ok", [(".txt", vec![".txt.copy"])]).is_ok());
    }

    #[test]
    fn test_empty_rejected() {
        let entries: [(&str, Vec<&str>); 0] = [];
        assert_eq!(
            BuildExtensions::parse("none", entries).unwrap_err(),
            ExtensionError::EmptyExtensions("none".to_string())
        );
    }

    #[test]
    fn test_output_ids_stay_in_package() {
        let ext = BuildExtensions::parse("copy", [(".txt", vec![".txt.copy"])]).unwrap();
        let outs = ext
            .expected_output_ids(&AssetId::new("a", "web/a.txt"))
            .unwrap();
        assert_eq!(outs, vec![AssetId::new("a", "web/a.txt.copy")]);
    }

    #[test]
    fn test_first_matching_pair_wins() {
        let ext = BuildExtensions::parse(
            "layered",
            [(".gen.txt", vec![".gen.txt.meta"]), (".txt", vec![".txt.copy"])],
        )
        .unwrap();
        assert_eq!(
            ext.expected_outputs("a.gen.txt").unwrap(),
            vec!["a.gen.txt.meta".to_string()]
        );
        assert_eq!(
            ext.expected_outputs("a.txt").unwrap(),
            vec!["a.txt.copy".to_string()]
        );
    }
}
