// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tar+gzip archive creation and extraction over a [`crate::SandboxFs`]
//! (spec.md §4.C).

use crate::error::{SandboxError, SandboxResult};
use crate::fs::SandboxFs;
use crate::quota::walk_regular_file_sizes;
use flate2::write::GzEncoder;
use flate2::Compression;
use ignore::gitignore::GitignoreBuilder;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Gzip level, configurable per spec.md §4.C; `BestSpeed` is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GzipLevel {
    None,
    #[default]
    BestSpeed,
    BestCompression,
}

impl From<GzipLevel> for Compression {
    fn from(level: GzipLevel) -> Self {
        match level {
            GzipLevel::None => Compression::none(),
            GzipLevel::BestSpeed => Compression::fast(),
            GzipLevel::BestCompression => Compression::best(),
        }
    }
}

/// Progress as consumed by transfer status and file-listing callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub written: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub include: Option<Vec<PathBuf>>,
    pub ignore_patterns: Option<Vec<String>>,
    pub gzip_level: GzipLevel,
    /// Outer rate limiter in MiB/s; `None` disables throttling.
    pub rate_limit_mib_per_sec: Option<f64>,
}

/// Tees written bytes through an optional token-bucket throttle and a
/// progress counter while the tar writer streams through it.
struct CountingWriter<W> {
    inner: W,
    written: u64,
    progress: Option<mpsc::Sender<Progress>>,
    total: u64,
    rate_limit_bytes_per_sec: Option<f64>,
    started: Instant,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        if let Some(rate) = self.rate_limit_bytes_per_sec {
            let expected = Duration::from_secs_f64(self.written as f64 / rate);
            let elapsed = self.started.elapsed();
            if expected > elapsed {
                std::thread::sleep(expected - elapsed);
            }
        }
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(Progress { written: self.written, total: self.total });
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Tar+gzip archive over a server's sandbox.
pub struct Archiver;

impl Archiver {
    /// Walks `base_path` inside `sandbox`, writes a gzip-framed tar to
    /// `dst`, and reports progress on `progress`. `includeList` takes
    /// priority over `ignorePatterns`; with neither set, everything under
    /// `base_path` is archived. Sockets are skipped; symlinks are stored as
    /// symlink records pointing at their literal target.
    pub async fn create(
        sandbox: &SandboxFs,
        base_path: &str,
        options: CreateOptions,
        dst: &Path,
        progress: Option<mpsc::Sender<Progress>>,
    ) -> SandboxResult<()> {
        let abs_base = sandbox.resolve_dir(base_path).await?;
        let total = walk_regular_file_sizes(&abs_base).await as u64;
        let dst = dst.to_path_buf();

        tokio::task::spawn_blocking(move || create_blocking(&abs_base, options, &dst, total, progress))
            .await
            .map_err(|e| SandboxError::Unknown(e.to_string()))?
    }

    /// Iterates archive entries, writing each file entry through the
    /// sandbox at `intoDir/entry.name` (inheriting path-escape protection
    /// and quota). A denylist match silently aborts extraction of that
    /// single entry rather than the whole archive. Unknown archive formats
    /// return `UnknownArchive`.
    pub async fn extract(sandbox: &SandboxFs, src_archive: &Path, into_dir: &str) -> SandboxResult<()> {
        let src_archive = src_archive.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || read_entries_blocking(&src_archive))
            .await
            .map_err(|e| SandboxError::Unknown(e.to_string()))??;

        for entry in entries {
            let target = format!("{}/{}", into_dir.trim_end_matches('/'), entry.path);
            match entry.kind {
                ArchivedKind::Symlink(target_link) => {
                    let _ = sandbox.symlink(&target, &target_link).await;
                }
                ArchivedKind::File(data, mode) => {
                    if sandbox.write(&target, &data[..], data.len() as u64, mode).await.is_err() {
                        // Denylist or quota failure aborts only this entry.
                        continue;
                    }
                }
            }
        }
        Ok(())
    }

    /// Sums declared entry sizes; if the running total plus current disk
    /// usage would exceed `limit`, fails with `DiskSpace` before any bytes
    /// are written.
    pub async fn preflight_extract_size(sandbox: &SandboxFs, src_archive: &Path) -> SandboxResult<()> {
        let limit = sandbox.disk_limit_bytes();
        if limit == 0 {
            return Ok(());
        }
        let src_archive = src_archive.to_path_buf();
        let declared: i64 = tokio::task::spawn_blocking(move || sum_declared_sizes_blocking(&src_archive))
            .await
            .map_err(|e| SandboxError::Unknown(e.to_string()))??;
        let used = sandbox.disk_usage(true).await;
        if used + declared > limit {
            Err(SandboxError::DiskSpace)
        } else {
            Ok(())
        }
    }
}

fn create_blocking(
    abs_base: &Path,
    options: CreateOptions,
    dst: &Path,
    total: u64,
    progress: Option<mpsc::Sender<Progress>>,
) -> SandboxResult<()> {
    let file = std::fs::File::create(dst)?;
    let rate_limit_bytes_per_sec = options.rate_limit_mib_per_sec.map(|mib| mib * 1_048_576.0);
    let counting = CountingWriter {
        inner: file,
        written: 0,
        progress,
        total,
        rate_limit_bytes_per_sec,
        started: Instant::now(),
    };
    let encoder = GzEncoder::new(counting, options.gzip_level.into());
    let mut builder = tar::Builder::new(encoder);

    let matcher = build_ignore_matcher(&options.ignore_patterns);
    let mut stack = vec![abs_base.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let relative = path.strip_prefix(abs_base).unwrap_or(&path).to_path_buf();

            if let Some(include) = &options.include {
                if !include.iter().any(|i| relative.starts_with(i) || *i == relative) {
                    if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                        stack.push(path);
                    }
                    continue;
                }
            } else if let Some(matcher) = &matcher {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if matcher.matched(&relative, is_dir).is_ignore() {
                    continue;
                }
            }

            let Ok(file_type) = entry.file_type() else { continue };
            if file_type.is_symlink() {
                #[cfg(unix)]
                if let Ok(target) = std::fs::read_link(&path) {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    let _ = builder.append_link(&mut header, &relative, &target);
                }
            } else if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Ok(mut f) = std::fs::File::open(&path) {
                    let _ = builder.append_file(&relative, &mut f);
                }
            }
            // Sockets and other specials are silently skipped.
        }
    }

    builder.into_inner().map_err(SandboxError::from)?.finish().map_err(SandboxError::from)?;
    Ok(())
}

fn build_ignore_matcher(patterns: &Option<Vec<String>>) -> Option<ignore::gitignore::Gitignore> {
    let patterns = patterns.as_ref()?;
    let mut builder = GitignoreBuilder::new("/");
    for pattern in patterns {
        let _ = builder.add_line(None, pattern);
    }
    builder.build().ok()
}

enum ArchivedKind {
    File(Vec<u8>, u32),
    Symlink(String),
}

struct ArchivedEntry {
    path: String,
    kind: ArchivedKind,
}

fn read_entries_blocking(src_archive: &Path) -> SandboxResult<Vec<ArchivedEntry>> {
    let file = std::fs::File::open(src_archive)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive.entries().map_err(|_| SandboxError::UnknownArchive)?;

    let mut out = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|_| SandboxError::UnknownArchive)?;
        let path = entry.path().map_err(|_| SandboxError::UnknownArchive)?.to_string_lossy().into_owned();
        let header = entry.header().clone();

        match header.entry_type() {
            tar::EntryType::Symlink => {
                let target = header.link_name().ok().flatten().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
                out.push(ArchivedEntry { path, kind: ArchivedKind::Symlink(target) });
            }
            tar::EntryType::Regular => {
                let mode = header.mode().unwrap_or(0o644);
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                out.push(ArchivedEntry { path, kind: ArchivedKind::File(data, mode) });
            }
            _ => {}
        }
    }
    Ok(out)
}

fn sum_declared_sizes_blocking(src_archive: &Path) -> SandboxResult<i64> {
    let file = std::fs::File::open(src_archive)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive.entries().map_err(|_| SandboxError::UnknownArchive)?;
    let mut total: i64 = 0;
    for entry in entries {
        let entry = entry.map_err(|_| SandboxError::UnknownArchive)?;
        total = total.saturating_add(entry.header().size().unwrap_or(0) as i64);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denylist::Denylist;
    use crate::quota::QuotaLimit;

    #[tokio::test]
    async fn create_then_extract_round_trips_regular_files() {
        let src_tmp = tempfile::tempdir().unwrap();
        let src = SandboxFs::new(src_tmp.path(), QuotaLimit::unlimited(), Denylist::empty(), None);
        src.write("a.txt", &b"alpha"[..], 5, 0o644).await.unwrap();
        src.mkdir_all("sub", 0o755).await.unwrap();
        src.write("sub/b.txt", &b"beta"[..], 4, 0o644).await.unwrap();

        let archive_path = src_tmp.path().join("out.tar.gz");
        Archiver::create(&src, "", CreateOptions::default(), &archive_path, None).await.unwrap();

        let dst_tmp = tempfile::tempdir().unwrap();
        let dst = SandboxFs::new(dst_tmp.path(), QuotaLimit::unlimited(), Denylist::empty(), None);
        Archiver::extract(&dst, &archive_path, "").await.unwrap();

        let (mut file, _) = dst.read("a.txt").await.unwrap();
        let mut buf = Vec::new();
        use tokio::io::AsyncReadExt;
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"alpha");

        let (mut file2, _) = dst.read("sub/b.txt").await.unwrap();
        let mut buf2 = Vec::new();
        file2.read_to_end(&mut buf2).await.unwrap();
        assert_eq!(buf2, b"beta");
    }

    #[tokio::test]
    async fn include_list_restricts_archived_files() {
        let src_tmp = tempfile::tempdir().unwrap();
        let src = SandboxFs::new(src_tmp.path(), QuotaLimit::unlimited(), Denylist::empty(), None);
        src.write("keep.txt", &b"yes"[..], 3, 0o644).await.unwrap();
        src.write("skip.txt", &b"no"[..], 2, 0o644).await.unwrap();

        let archive_path = src_tmp.path().join("out.tar.gz");
        let options = CreateOptions { include: Some(vec![PathBuf::from("keep.txt")]), ..Default::default() };
        Archiver::create(&src, "", options, &archive_path, None).await.unwrap();

        let dst_tmp = tempfile::tempdir().unwrap();
        let dst = SandboxFs::new(dst_tmp.path(), QuotaLimit::unlimited(), Denylist::empty(), None);
        Archiver::extract(&dst, &archive_path, "").await.unwrap();

        assert!(dst.read("keep.txt").await.is_ok());
        assert!(dst.read("skip.txt").await.is_err());
    }

    #[tokio::test]
    async fn unknown_archive_format_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("bogus.tar.gz");
        std::fs::write(&bogus, b"not a gzip stream at all").unwrap();
        let dst = SandboxFs::new(tmp.path(), QuotaLimit::unlimited(), Denylist::empty(), None);
        let result = Archiver::extract(&dst, &bogus, "").await;
        assert!(matches!(result, Err(SandboxError::UnknownArchive)));
    }
}
