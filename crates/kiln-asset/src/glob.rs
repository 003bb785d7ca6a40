//! Minimal glob matching over forward-slash asset paths.
//!
//! Supports the pattern language the engine needs and nothing more:
//! `*` (within one segment), `?` (one character), `**` (any number of whole
//! segments, including zero), and single-level `{a,b}` alternation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when compiling a glob pattern.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GlobError {
    /// A `{` without a matching `}`.
    #[error("unclosed brace in glob `{0}`")]
    UnclosedBrace(String),

    /// The pattern is empty.
    #[error("empty glob pattern")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `**`: matches zero or more whole path segments.
    Globstar,
    /// A single segment, matched with `*`/`?` wildcards.
    Part(String),
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Glob {
    pattern: String,
    alternatives: Vec<Vec<Segment>>,
}

impl Glob {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Result<Glob, GlobError> {
        if pattern.is_empty() {
            return Err(GlobError::Empty);
        }
        let mut alternatives = Vec::new();
        for expanded in expand_braces(pattern)? {
            let segments = expanded
                .split('/')
                .map(|s| {
                    if s == "**" {
                        Segment::Globstar
                    } else {
                        Segment::Part(s.to_string())
                    }
                })
                .collect();
            alternatives.push(segments);
        }
        Ok(Glob {
            pattern: pattern.to_string(),
            alternatives,
        })
    }

    /// The original pattern text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `path` (forward-slash relative) matches this glob.
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').collect();
        self.alternatives
            .iter()
            .any(|segs| match_segments(segs, &parts))
    }
}

impl std::fmt::Display for Glob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl TryFrom<String> for Glob {
    type Error = GlobError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Glob::new(&s)
    }
}

impl From<Glob> for String {
    fn from(g: Glob) -> String {
        g.pattern
    }
}

/// Expand single-level `{a,b}` alternation into a list of plain patterns.
fn expand_braces(pattern: &str) -> Result<Vec<String>, GlobError> {
    let Some(open) = pattern.find('{') else {
        return Ok(vec![pattern.to_string()]);
    };
    let close = pattern[open..]
        .find('}')
        .map(|i| open + i)
        .ok_or_else(|| GlobError::UnclosedBrace(pattern.to_string()))?;
    let (head, rest) = (&pattern[..open], &pattern[close + 1..]);
    let mut out = Vec::new();
    for option in pattern[open + 1..close].split(',') {
        for tail in expand_braces(rest)? {
            out.push(format!("{head}{option}{tail}"));
        }
    }
    Ok(out)
}

fn match_segments(segs: &[Segment], parts: &[&str]) -> bool {
    match segs.split_first() {
        None => parts.is_empty(),
        Some((Segment::Globstar, rest)) => {
            // Try consuming zero or more path segments.
            (0..=parts.len()).any(|n| match_segments(rest, &parts[n..]))
        }
        Some((Segment::Part(pat), rest)) => match parts.split_first() {
            Some((part, tail)) => wildcard_match(pat, part) && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Match one path segment against `*`/`?` wildcards, iteratively with
/// single-star backtracking.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}
