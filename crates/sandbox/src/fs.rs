// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Path-safe, quota-accounted I/O rooted at a server's data directory
//! (spec.md §4.B).

use crate::denylist::Denylist;
use crate::error::{SandboxError, SandboxResult};
use crate::quota::{Quota, QuotaLimit};
use crate::resolve::{clean_relative, resolve_existing, resolve_for_create};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Ownership applied to newly-written files. `None` in test mode, where
/// chown would require privileges the test harness does not have.
#[derive(Debug, Clone, Copy, Default)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// A single entry from [`SandboxFs::list_directory`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub mode: u32,
    pub mimetype: String,
    pub modified: std::time::SystemTime,
}

/// Directory-scoped, symlink-escape-resistant filesystem for one server's
/// data directory.
pub struct SandboxFs {
    root: PathBuf,
    quota: Quota,
    denylist: Denylist,
    owner: Option<Owner>,
}

impl SandboxFs {
    pub fn new(root: impl Into<PathBuf>, limit: QuotaLimit, denylist: Denylist, owner: Option<Owner>) -> Self {
        Self { root: root.into(), quota: Quota::new(limit, Duration::from_secs(120)), denylist, owner }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_denylist(&self, relative: &Path, is_dir: bool) -> SandboxResult<()> {
        if self.denylist.is_denied(relative, is_dir) {
            Err(SandboxError::DenylistFile)
        } else {
            Ok(())
        }
    }

    async fn resolve_rw(&self, path: &str) -> SandboxResult<(PathBuf, PathBuf)> {
        let relative = clean_relative(path)?;
        if relative.as_os_str().is_empty() {
            return Err(SandboxError::IsDirectory);
        }
        let absolute = resolve_for_create(&self.root, &relative).await?;
        Ok((relative, absolute))
    }

    pub async fn read(&self, path: &str) -> SandboxResult<(tokio::fs::File, std::fs::Metadata)> {
        let relative = clean_relative(path)?;
        let absolute = resolve_existing(&self.root, &relative).await?;
        self.check_denylist(&relative, false)?;
        let file = tokio::fs::File::open(&absolute).await?;
        let meta = file.metadata().await?;
        if meta.is_dir() {
            return Err(SandboxError::IsDirectory);
        }
        Ok((file, meta))
    }

    /// Writes at most `new_size` bytes from `reader`, creating parent
    /// directories (mode `0755`), truncating any existing content, and
    /// chowning to the configured owner. Checks the quota before copying
    /// any bytes and updates `diskUsedBytes` by `written - previous_size`.
    pub async fn write<R>(&self, path: &str, mut reader: R, new_size: u64, mode: u32) -> SandboxResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let (relative, absolute) = self.resolve_rw(path).await?;
        self.check_denylist(&relative, false)?;

        let previous_size = tokio::fs::metadata(&absolute).await.map(|m| m.len()).unwrap_or(0) as i64;
        let delta = new_size as i64 - previous_size;
        if !self.quota.can_fit(delta) {
            return Err(SandboxError::DiskSpace);
        }

        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755)).await;
            }
        }

        let mut file = tokio::fs::OpenOptions::new().write(true).create(true).truncate(true).open(&absolute).await?;
        let mut remaining = new_size;
        let mut buf = [0u8; 64 * 1024];
        let mut written: u64 = 0;
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            let n = reader.read(&mut buf[..chunk]).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            written += n as u64;
            remaining -= n as u64;
        }
        file.flush().await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = tokio::fs::set_permissions(&absolute, std::fs::Permissions::from_mode(mode)).await;
            if let Some(owner) = self.owner {
                chown_path(&absolute, owner.uid, owner.gid, false).await?;
            }
        }

        self.quota.apply_delta(written as i64 - previous_size);
        Ok(())
    }

    pub async fn touch(&self, path: &str) -> SandboxResult<tokio::fs::File> {
        let (_, absolute) = self.resolve_rw(path).await?;
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let file = tokio::fs::OpenOptions::new().read(true).write(true).create(true).open(&absolute).await?;
        #[cfg(unix)]
        if let Some(owner) = self.owner {
            chown_path(&absolute, owner.uid, owner.gid, false).await?;
        }
        Ok(file)
    }

    pub async fn mkdir_all(&self, path: &str, _perm: u32) -> SandboxResult<()> {
        let relative = clean_relative(path)?;
        let absolute = self.root.join(&relative);
        tokio::fs::create_dir_all(&absolute).await?;
        resolve_existing(&self.root, &relative).await?;
        Ok(())
    }

    /// Refuses when either side resolves to `root` itself; fails with
    /// `Exist` if the destination already exists (never replaces).
    pub async fn rename(&self, old: &str, new: &str) -> SandboxResult<()> {
        let old_relative = clean_relative(old)?;
        let new_relative = clean_relative(new)?;
        if old_relative.as_os_str().is_empty() || new_relative.as_os_str().is_empty() {
            return Err(SandboxError::BadPathResolution);
        }
        let old_absolute = resolve_existing(&self.root, &old_relative).await?;
        if tokio::fs::metadata(self.root.join(&new_relative)).await.is_ok() {
            return Err(SandboxError::Exist);
        }
        let new_absolute = resolve_for_create(&self.root, &new_relative).await?;
        if let Some(parent) = new_absolute.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::rename(&old_absolute, &new_absolute).await?;
        Ok(())
    }

    /// Resolves a unique sibling name `name copy[.<i>].ext` for `i` in
    /// `1..=50`; beyond that, falls back to `name copy.<rfc3339>.ext`.
    /// Double extensions ending in `.tar.gz` are preserved as a unit.
    pub async fn copy(&self, path: &str) -> SandboxResult<String> {
        let relative = clean_relative(path)?;
        let absolute = resolve_existing(&self.root, &relative).await?;
        let meta = tokio::fs::metadata(&absolute).await?;
        if !meta.is_file() {
            return Err(SandboxError::IsDirectory);
        }

        let parent = relative.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let file_name = relative.file_name().and_then(|n| n.to_str()).ok_or(SandboxError::BadPathResolution)?;
        let (stem, ext) = split_copy_suffix(file_name);

        let size = meta.len() as i64;
        if !self.quota.can_fit(size) {
            return Err(SandboxError::DiskSpace);
        }

        let mut candidate_name = None;
        for i in 0..=50u32 {
            let candidate = if i == 0 {
                format!("{stem} copy{ext}")
            } else {
                format!("{stem} copy.{i}{ext}")
            };
            if tokio::fs::metadata(self.root.join(&parent).join(&candidate)).await.is_err() {
                candidate_name = Some(candidate);
                break;
            }
        }
        let candidate_name = candidate_name.unwrap_or_else(|| {
            let now = chrono::Utc::now().to_rfc3339();
            format!("{stem} copy.{now}{ext}")
        });

        let dest_relative = parent.join(&candidate_name);
        let dest_absolute = resolve_for_create(&self.root, &dest_relative).await?;
        tokio::fs::copy(&absolute, &dest_absolute).await?;
        self.quota.apply_delta(size);
        Ok(candidate_name)
    }

    /// Refuses deleting `root` itself. Subtracts the freed size from the
    /// quota counter. A symlink target is left intact; the link itself is
    /// always unlinked, never followed.
    pub async fn delete(&self, path: &str) -> SandboxResult<()> {
        let relative = clean_relative(path)?;
        if relative.as_os_str().is_empty() {
            return Err(SandboxError::BadPathResolution);
        }
        // Resolve the parent only and join the leaf back on unresolved: a
        // symlink leaf must be judged by where the link itself lands, not
        // where it points, so the final component must never be
        // canonicalized (unlike every other accessor in this file, which
        // wants the fully-resolved, followed target).
        let absolute = resolve_for_create(&self.root, &relative).await?;
        let symlink_meta = tokio::fs::symlink_metadata(&absolute).await?;

        if symlink_meta.file_type().is_symlink() {
            tokio::fs::remove_file(&absolute).await?;
            return Ok(());
        }

        if symlink_meta.is_dir() {
            let freed = crate::quota::walk_regular_file_sizes(&absolute).await;
            tokio::fs::remove_dir_all(&absolute).await?;
            self.quota.apply_delta(-freed);
        } else {
            let freed = symlink_meta.len() as i64;
            tokio::fs::remove_file(&absolute).await?;
            self.quota.apply_delta(-freed);
        }
        Ok(())
    }

    pub async fn list_directory(&self, path: &str) -> SandboxResult<Vec<DirEntry>> {
        let relative = clean_relative(path)?;
        let absolute = if relative.as_os_str().is_empty() {
            self.root.clone()
        } else {
            resolve_existing(&self.root, &relative).await?
        };

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&absolute).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_directory = meta.is_dir();
            let mimetype = if is_directory {
                "inode/directory".to_string()
            } else if meta.is_file() {
                sniff_mimetype(&entry.path()).await
            } else {
                "application/octet-stream".to_string()
            };
            #[cfg(unix)]
            let mode = {
                use std::os::unix::fs::PermissionsExt;
                meta.permissions().mode()
            };
            #[cfg(not(unix))]
            let mode = 0;
            entries.push(DirEntry {
                name,
                is_directory,
                size: meta.len(),
                mode,
                mimetype,
                modified: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            });
        }
        entries.sort_by(|a, b| match (a.is_directory, b.is_directory) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });
        Ok(entries)
    }

    pub async fn chmod(&self, path: &str, mode: u32, recursive: bool) -> SandboxResult<()> {
        let relative = clean_relative(path)?;
        let absolute = resolve_existing(&self.root, &relative).await?;
        apply_recursive(&absolute, recursive, |p| chmod_one(p, mode)).await
    }

    /// Recursive chown never follows symlinks during the walk (uses
    /// `lchown` semantics); a plain symlink target is chowned, not the link.
    pub async fn chown(&self, path: &str, owner: Owner, recursive: bool) -> SandboxResult<()> {
        let relative = clean_relative(path)?;
        let absolute = resolve_existing(&self.root, &relative).await?;
        apply_recursive(&absolute, recursive, move |p| {
            let owner = owner;
            Box::pin(async move { chown_path(&p, owner.uid, owner.gid, true).await })
        })
        .await
    }

    pub async fn chtimes(&self, path: &str, mtime: std::time::SystemTime) -> SandboxResult<()> {
        let relative = clean_relative(path)?;
        let absolute = resolve_existing(&self.root, &relative).await?;
        let file = tokio::fs::OpenOptions::new().write(true).open(&absolute).await?;
        file.set_modified(mtime).await?;
        Ok(())
    }

    pub async fn symlink(&self, path: &str, target: &str) -> SandboxResult<()> {
        let (_, absolute) = self.resolve_rw(path).await?;
        #[cfg(unix)]
        tokio::fs::symlink(target, &absolute).await?;
        #[cfg(not(unix))]
        return Err(SandboxError::Unknown("symlinks unsupported on this platform".into()));
        #[cfg(unix)]
        Ok(())
    }

    pub fn disk_used_bytes(&self) -> i64 {
        self.quota.used()
    }

    pub fn disk_limit_bytes(&self) -> i64 {
        self.quota.limit().0
    }

    pub async fn disk_usage(&self, allow_stale: bool) -> i64 {
        self.quota.disk_usage(&self.root, allow_stale).await
    }

    pub fn quota_can_fit(&self, delta: i64) -> bool {
        self.quota.can_fit(delta)
    }

    /// Resolve an untrusted relative path to an absolute, existing path
    /// beneath `root`. Exposed for [`crate::Archiver`], which walks the
    /// resolved tree directly with `std::fs` rather than re-entering the
    /// sandbox's own per-call resolution for every file it touches.
    pub async fn resolve_dir(&self, path: &str) -> SandboxResult<PathBuf> {
        let relative = clean_relative(path)?;
        if relative.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }
        resolve_existing(&self.root, &relative).await
    }

    pub fn apply_quota_delta(&self, delta: i64) {
        self.quota.apply_delta(delta)
    }
}

/// Splits a filename into `(stem, extension)` where `extension` preserves
/// compound suffixes like `.tar.gz` as a unit (spec.md §8 boundary case).
fn split_copy_suffix(file_name: &str) -> (&str, &str) {
    const COMPOUND: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz"];
    for suffix in COMPOUND {
        if let Some(stem) = file_name.strip_suffix(suffix) {
            return (stem, suffix);
        }
    }
    match file_name.rfind('.') {
        Some(0) => (file_name, ""),
        Some(idx) => (&file_name[..idx], &file_name[idx..]),
        None => (file_name, ""),
    }
}

async fn sniff_mimetype(path: &Path) -> String {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || tree_magic_mini::from_filepath(&path).unwrap_or("application/octet-stream").to_string())
        .await
        .unwrap_or_else(|_| "application/octet-stream".to_string())
}

#[cfg(unix)]
async fn chmod_one(path: PathBuf, mode: u32) -> SandboxResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn chmod_one(_path: PathBuf, _mode: u32) -> SandboxResult<()> {
    Ok(())
}

#[cfg(unix)]
async fn chown_path(path: &Path, uid: u32, gid: u32, no_follow: bool) -> SandboxResult<()> {
    use nix::unistd::{Gid, Uid};
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if no_follow {
            nix::unistd::fchownat(
                None,
                &path,
                Some(Uid::from_raw(uid)),
                Some(Gid::from_raw(gid)),
                nix::unistd::FchownatFlags::NoFollowSymlink,
            )
        } else {
            nix::unistd::chown(&path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
        }
    })
    .await
    .map_err(|e| SandboxError::Unknown(e.to_string()))?
    .map_err(|e| SandboxError::Unknown(e.to_string()))
}

#[cfg(not(unix))]
async fn chown_path(_path: &Path, _uid: u32, _gid: u32, _no_follow: bool) -> SandboxResult<()> {
    Ok(())
}

async fn apply_recursive<F, Fut>(root: &Path, recursive: bool, mut f: F) -> SandboxResult<()>
where
    F: FnMut(PathBuf) -> Fut,
    Fut: std::future::Future<Output = SandboxResult<()>>,
{
    f(root.to_path_buf()).await?;
    if !recursive {
        return Ok(());
    }
    let meta = tokio::fs::symlink_metadata(root).await?;
    if !meta.is_dir() {
        return Ok(());
    }
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_symlink() {
                continue;
            }
            f(entry.path()).await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denylist::Denylist;

    fn sandbox(tmp: &tempfile::TempDir) -> SandboxFs {
        SandboxFs::new(tmp.path(), QuotaLimit::unlimited(), Denylist::empty(), None)
    }

    #[tokio::test]
    async fn write_then_read_round_trips_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = sandbox(&tmp);
        let data = b"hello sandbox";
        fs.write("greeting.txt", &data[..], data.len() as u64, 0o644).await.unwrap();
        let (mut file, meta) = fs.read("greeting.txt").await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, data);
        assert_eq!(meta.len(), data.len() as u64);
    }

    #[tokio::test]
    async fn quota_rejects_oversized_write_and_leaves_used_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = SandboxFs::new(tmp.path(), QuotaLimit(1024), Denylist::empty(), None);
        fs.write("a", &b"x".repeat(900)[..], 900, 0o644).await.unwrap();
        assert_eq!(fs.disk_used_bytes(), 900);
        let result = fs.write("b", &b"y".repeat(200)[..], 200, 0o644).await;
        assert!(matches!(result, Err(SandboxError::DiskSpace)));
        assert_eq!(fs.disk_used_bytes(), 900);
        assert!(tokio::fs::metadata(tmp.path().join("b")).await.is_err());
    }

    #[tokio::test]
    async fn delete_of_symlink_leaves_target_intact() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"keepme").unwrap();
        let fs = sandbox(&tmp);
        #[cfg(unix)]
        {
            tokio::fs::symlink(outside.path(), tmp.path().join("link")).await.unwrap();
            fs.delete("link").await.unwrap();
            assert!(tokio::fs::metadata(tmp.path().join("link")).await.is_err());
            assert!(outside.path().join("secret").exists());
        }
    }

    #[tokio::test]
    async fn read_through_symlink_escape_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("passwd"), b"root:x").unwrap();
        let fs = sandbox(&tmp);
        #[cfg(unix)]
        {
            tokio::fs::symlink(outside.path(), tmp.path().join("link")).await.unwrap();
            let result = fs.read("link/passwd").await;
            assert!(matches!(result, Err(SandboxError::BadPathResolution)));
        }
    }

    #[tokio::test]
    async fn rename_refuses_existing_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = sandbox(&tmp);
        fs.write("a", &b"1"[..], 1, 0o644).await.unwrap();
        fs.write("b", &b"2"[..], 1, 0o644).await.unwrap();
        let result = fs.rename("a", "b").await;
        assert!(matches!(result, Err(SandboxError::Exist)));
    }

    #[tokio::test]
    async fn list_directory_sorts_directories_first_then_alpha() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = sandbox(&tmp);
        fs.write("zebra.txt", &b"1"[..], 1, 0o644).await.unwrap();
        fs.mkdir_all("apricot", 0o755).await.unwrap();
        fs.write("mango.txt", &b"1"[..], 1, 0o644).await.unwrap();
        let entries = fs.list_directory("").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["apricot", "mango.txt", "zebra.txt"]);
    }

    #[test]
    fn split_copy_suffix_preserves_tar_gz() {
        assert_eq!(split_copy_suffix("backup.tar.gz"), ("backup", ".tar.gz"));
        assert_eq!(split_copy_suffix("notes.txt"), ("notes", ".txt"));
        assert_eq!(split_copy_suffix("README"), ("README", ""));
    }

    #[tokio::test]
    async fn copy_finds_unique_sibling_name() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = sandbox(&tmp);
        fs.write("notes.txt", &b"hi"[..], 2, 0o644).await.unwrap();
        let first = fs.copy("notes.txt").await.unwrap();
        assert_eq!(first, "notes copy.txt");
        let second = fs.copy("notes.txt").await.unwrap();
        assert_eq!(second, "notes copy.1.txt");
    }
}
