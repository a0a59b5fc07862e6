//! # Ignore Rules
//!
//! Evaluates `.rinneignore`-style exclusion rules against workspace-relative
//! paths. Supported syntax:
//!
//! - `*` matches within one path component, `?` matches one character,
//!   `**` (as a whole segment) matches any number of components.
//! - A pattern containing `/` is anchored at the workspace root.
//! - A bare name without `/` matches a file or directory of that name at any
//!   depth; matching a directory excludes everything beneath it.
//! - A trailing `/` restricts the rule to directories.
//! - Blank lines and lines starting with `#` are skipped. No negation.

use std::path::Path;

/// A compiled set of exclusion rules.
#[derive(Debug, Default)]
pub struct IgnoreEngine {
    rules: Vec<Rule>,
}

#[derive(Debug)]
struct Rule {
    segments: Vec<Segment>,
    anchored: bool,
    dir_only: bool,
}

#[derive(Debug)]
enum Segment {
    /// A bare `**` segment: any number of components, including zero.
    Any,
    /// A glob over a single component.
    Glob(String),
}

impl IgnoreEngine {
    /// An engine with no rules; ignores nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads rules from an ignore file. A missing file yields an empty engine.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::from_rules(text.lines())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::empty()),
            Err(e) => Err(e),
        }
    }

    /// Compiles rules from raw lines.
    pub fn from_rules<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let rules = lines
            .into_iter()
            .filter_map(Rule::parse)
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True if `rel` (a `/`-separated workspace-relative path) is excluded.
    pub fn is_ignored(&self, rel: &str, is_dir: bool) -> bool {
        if self.rules.is_empty() || rel.is_empty() {
            return false;
        }
        let comps: Vec<&str> = rel.split('/').collect();
        self.rules.iter().any(|r| r.matches(&comps, is_dir))
    }
}

impl Rule {
    fn parse(line: &str) -> Option<Rule> {
        let mut pat = line.trim();
        if pat.is_empty() || pat.starts_with('#') {
            return None;
        }

        let dir_only = pat.ends_with('/');
        pat = pat.trim_end_matches('/');
        if pat.is_empty() {
            return None;
        }

        let anchored = pat.starts_with('/') || pat.trim_start_matches('/').contains('/');
        pat = pat.trim_start_matches('/');

        let segments = pat
            .split('/')
            .map(|s| {
                if s == "**" {
                    Segment::Any
                } else {
                    Segment::Glob(s.to_string())
                }
            })
            .collect();

        Some(Rule {
            segments,
            anchored,
            dir_only,
        })
    }

    fn matches(&self, comps: &[&str], is_dir: bool) -> bool {
        if self.anchored {
            return self.match_from_root(comps, is_dir);
        }

        // Unanchored single-segment rule: match any component. A hit on a
        // non-final component means the path sits under a matched directory.
        let pat = match self.segments.as_slice() {
            [Segment::Glob(p)] => p,
            _ => return false,
        };
        comps.iter().enumerate().any(|(i, comp)| {
            glob_match(pat, comp) && (!self.dir_only || i + 1 < comps.len() || is_dir)
        })
    }

    fn match_from_root(&self, comps: &[&str], is_dir: bool) -> bool {
        fn go(segs: &[Segment], comps: &[&str], is_dir: bool, dir_only: bool) -> bool {
            match segs.first() {
                None => {
                    if comps.is_empty() {
                        // Matched the path itself.
                        !dir_only || is_dir
                    } else {
                        // Matched an ancestor directory of the path.
                        true
                    }
                }
                Some(Segment::Any) => (0..=comps.len())
                    .any(|k| go(&segs[1..], &comps[k..], is_dir, dir_only)),
                Some(Segment::Glob(p)) => match comps.first() {
                    Some(c) => glob_match(p, c) && go(&segs[1..], &comps[1..], is_dir, dir_only),
                    None => false,
                },
            }
        }
        go(&self.segments, comps, is_dir, self.dir_only)
    }
}

/// Glob match over a single path component: `*` any run, `?` one character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    fn go(pat: &[char], txt: &[char]) -> bool {
        match pat.first() {
            None => txt.is_empty(),
            Some('*') => go(&pat[1..], txt) || (!txt.is_empty() && go(pat, &txt[1..])),
            Some('?') => !txt.is_empty() && go(&pat[1..], &txt[1..]),
            Some(c) => txt.first() == Some(c) && go(&pat[1..], &txt[1..]),
        }
    }
    go(&pat, &txt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(rules: &[&str]) -> IgnoreEngine {
        IgnoreEngine::from_rules(rules.iter().copied())
    }

    #[test]
    fn bare_name_matches_any_depth() {
        let e = engine(&["target"]);
        assert!(e.is_ignored("target", true));
        assert!(e.is_ignored("target/debug/app", false));
        assert!(e.is_ignored("crates/core/target", true));
        assert!(e.is_ignored("crates/core/target/foo.o", false));
        assert!(!e.is_ignored("targets", true));
        assert!(!e.is_ignored("src/main.rs", false));
    }

    #[test]
    fn trailing_slash_requires_directory() {
        let e = engine(&["build/"]);
        assert!(e.is_ignored("build", true));
        assert!(!e.is_ignored("build", false));
        // A file below a matched directory is still excluded.
        assert!(e.is_ignored("build/out.bin", false));
    }

    #[test]
    fn anchored_patterns() {
        let e = engine(&["/docs/api", "src/gen"]);
        assert!(e.is_ignored("docs/api", true));
        assert!(e.is_ignored("docs/api/index.html", false));
        assert!(!e.is_ignored("other/docs/api", true));
        assert!(e.is_ignored("src/gen/mod.rs", false));
        assert!(!e.is_ignored("x/src/gen", true));
    }

    #[test]
    fn star_within_component() {
        let e = engine(&["*.tmp", "cache-?"]);
        assert!(e.is_ignored("a.tmp", false));
        assert!(e.is_ignored("deep/nested/b.tmp", false));
        assert!(e.is_ignored("cache-1", true));
        assert!(!e.is_ignored("cache-10", true));
        assert!(!e.is_ignored("a.tmpx", false));
    }

    #[test]
    fn double_star_spans_components() {
        let e = engine(&["logs/**/*.log"]);
        assert!(e.is_ignored("logs/app.log", false));
        assert!(e.is_ignored("logs/2024/01/app.log", false));
        assert!(!e.is_ignored("logs/app.txt", false));
        assert!(!e.is_ignored("other/app.log", false));
    }

    #[test]
    fn comments_and_blanks_skipped() {
        let e = engine(&["# a comment", "", "  ", "real"]);
        assert!(e.is_ignored("real", false));
        assert!(!e.is_ignored("# a comment", false));
    }

    #[test]
    fn empty_engine_ignores_nothing() {
        let e = IgnoreEngine::empty();
        assert!(!e.is_ignored("anything", false));
        assert!(e.is_empty());
    }
}
