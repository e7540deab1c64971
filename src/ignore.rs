use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::Result;

/// Prefixes marking temporary files written by the engine itself.
pub const TEMP_PREFIX: &str = "~driftsync~";
pub const DOT_TEMP_PREFIX: &str = ".driftsync.";

/// Names reserved for the engine's own metadata inside a folder.
const INTERNAL_NAMES: &[&str] = &[".driftsync", ".driftsyncignore", ".driftsync-versions"];

/// Decides whether a relative path is ignored. Paths use `/` as separator.
pub trait Matcher: Send + Sync {
    fn is_ignored(&self, rel_path: &str) -> bool;
}

/// True for names the engine uses for in-flight temporary copies.
pub fn is_temporary(rel_path: &str) -> bool {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    name.starts_with(TEMP_PREFIX) || name.starts_with(DOT_TEMP_PREFIX)
}

/// True for the engine's own metadata paths, which are never scanned.
pub fn is_internal(rel_path: &str) -> bool {
    let first = rel_path.split('/').next().unwrap_or(rel_path);
    INTERNAL_NAMES.contains(&first)
}

/// Glob based `Matcher` built from gitignore style patterns. A pattern
/// matches the path itself and any path below it.
pub struct PatternMatcher {
    set: GlobSet,
}

impl PatternMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder.add(Glob::new(pattern)?);
            // Also match the pattern anywhere in the tree, and everything
            // beneath a matched directory.
            builder.add(Glob::new(&format!("**/{pattern}"))?);
            builder.add(Glob::new(&format!("{pattern}/**"))?);
            builder.add(Glob::new(&format!("**/{pattern}/**"))?);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }
}

impl Matcher for PatternMatcher {
    fn is_ignored(&self, rel_path: &str) -> bool {
        self.set.is_match(rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_names() {
        assert!(is_temporary("~driftsync~photo.jpg"));
        assert!(is_temporary("sub/dir/.driftsync.partial"));
        assert!(!is_temporary("photo.jpg"));
        assert!(!is_temporary("~backup/photo.jpg"));
    }

    #[test]
    fn internal_names() {
        assert!(is_internal(".driftsync"));
        assert!(is_internal(".driftsync/marker"));
        assert!(is_internal(".driftsync-versions/old/a.txt"));
        assert!(!is_internal("docs/.driftsync"));
        assert!(!is_internal("a.txt"));
    }

    #[test]
    fn pattern_matcher_matches_nested() {
        let m = PatternMatcher::new(&["*.log", "node_modules"]).unwrap();
        assert!(m.is_ignored("build.log"));
        assert!(m.is_ignored("deep/path/build.log"));
        assert!(m.is_ignored("node_modules"));
        assert!(m.is_ignored("pkg/node_modules/dep/index.js"));
        assert!(!m.is_ignored("src/main.rs"));
    }
}
