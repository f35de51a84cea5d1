// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Path resolution for untrusted, sandbox-relative paths (spec.md §4.B).
//!
//! Every public [`crate::SandboxFs`] method takes an untrusted path. This
//! module lexically cleans it, then re-checks the resolved absolute path
//! against `root` after the filesystem has had a chance to act on it —
//! the "resolve-beneath" policy, approximated here with a canonicalize +
//! prefix re-check since the workspace does not depend on a `libc`
//! `openat2` binding.

use crate::error::{SandboxError, SandboxResult};
use std::path::{Component, Path, PathBuf};

/// Lexically clean an untrusted relative path: drop `.` components, pop on
/// `..`, and reject absolute paths and any `..` that would climb above
/// `root` itself.
pub fn clean_relative(untrusted: &str) -> SandboxResult<PathBuf> {
    let mut stack: Vec<&str> = Vec::new();
    for component in Path::new(untrusted).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or(SandboxError::BadPathResolution)?;
                stack.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return Err(SandboxError::BadPathResolution);
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::BadPathResolution);
            }
        }
    }
    Ok(stack.into_iter().collect())
}

/// Resolve a cleaned relative path that must already exist, verifying the
/// canonical result still lives beneath `root`. Catches symlink escapes
/// (including components swapped in after the lexical clean, i.e. TOCTOU
/// races) because canonicalization follows every symlink on disk.
pub async fn resolve_existing(root: &Path, relative: &Path) -> SandboxResult<PathBuf> {
    let root = root.to_path_buf();
    let candidate = root.join(relative);
    let (canon_root, canon_candidate) = tokio::task::spawn_blocking(move || {
        let canon_root = std::fs::canonicalize(&root)?;
        let canon_candidate = std::fs::canonicalize(&candidate)?;
        Ok::<_, std::io::Error>((canon_root, canon_candidate))
    })
    .await
    .map_err(|e| SandboxError::Unknown(e.to_string()))??;

    if canon_candidate.starts_with(&canon_root) {
        Ok(canon_candidate)
    } else {
        Err(SandboxError::BadPathResolution)
    }
}

/// Resolve a cleaned relative path without canonicalizing its final
/// component. The parent directory must already exist and canonicalize
/// beneath `root`; the leaf is then joined back on and re-checked
/// lexically rather than followed. Used both for a file about to be
/// created (which doesn't exist yet, so canonicalizing it would fail
/// outright) and for a path whose leaf must be resolved as itself rather
/// than through a symlink it might be (e.g. unlinking a symlink: the link
/// must resolve inside `root`, but its target must never be followed to
/// decide that).
pub async fn resolve_for_create(root: &Path, relative: &Path) -> SandboxResult<PathBuf> {
    let file_name = relative.file_name().ok_or(SandboxError::BadPathResolution)?.to_owned();
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    let parent_abs = resolve_existing(root, parent).await?;
    let candidate = parent_abs.join(&file_name);
    let canon_root = {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || std::fs::canonicalize(&root))
            .await
            .map_err(|e| SandboxError::Unknown(e.to_string()))??
    };
    if candidate.starts_with(&canon_root) {
        Ok(candidate)
    } else {
        Err(SandboxError::BadPathResolution)
    }
}
