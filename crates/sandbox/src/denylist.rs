// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gitignore-style denylist matching (spec.md §3, §4.B).

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

/// Patterns that cause an operation to fail with `DenylistFile`. Built from
/// gitignore syntax so operators can reuse patterns like `*.lock` or
/// `/secrets/**`.
pub struct Denylist {
    matcher: Gitignore,
}

impl Denylist {
    pub fn new(patterns: &[String]) -> Self {
        let mut builder = GitignoreBuilder::new("/");
        for pattern in patterns {
            // Malformed patterns are skipped rather than failing sandbox
            // construction over an operator typo.
            let _ = builder.add_line(None, pattern);
        }
        let matcher = builder.build().unwrap_or_else(|_| Gitignore::empty());
        Self { matcher }
    }

    pub fn empty() -> Self {
        Self::new(&[])
    }

    /// `path` is sandbox-relative; `is_dir` selects the gitignore directory
    /// matching semantics (a pattern ending in `/` only matches directories).
    pub fn is_denied(&self, path: &Path, is_dir: bool) -> bool {
        self.matcher.matched(path, is_dir).is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_simple_extension_pattern() {
        let denylist = Denylist::new(&["*.lock".to_string()]);
        assert!(denylist.is_denied(Path::new("Cargo.lock"), false));
        assert!(!denylist.is_denied(Path::new("Cargo.toml"), false));
    }

    #[test]
    fn matches_directory_only_pattern() {
        let denylist = Denylist::new(&["secrets/".to_string()]);
        assert!(denylist.is_denied(Path::new("secrets"), true));
        assert!(!denylist.is_denied(Path::new("secrets"), false));
    }

    #[test]
    fn empty_denylist_denies_nothing() {
        let denylist = Denylist::empty();
        assert!(!denylist.is_denied(Path::new("anything"), false));
    }
}
