// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Disk-usage quota accounting (spec.md §3, §4.B).

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Quota ceiling semantics: `0` unlimited, `-1` read-only (every write
/// fails), else a byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimit(pub i64);

impl QuotaLimit {
    pub fn unlimited() -> Self {
        Self(0)
    }

    pub fn read_only() -> Self {
        Self(-1)
    }

    pub fn can_fit(self, used: i64, delta: i64) -> bool {
        match self.0 {
            0 => true,
            -1 => false,
            limit => used.saturating_add(delta) <= limit,
        }
    }
}

struct UsageCache {
    last_computed: Instant,
    recompute_in_progress: bool,
}

/// Tracks `diskUsedBytes`/`diskLimitBytes` for a [`crate::SandboxFs`], plus
/// the recomputation cache described in spec.md §4.B.
pub struct Quota {
    limit: QuotaLimit,
    used: AtomicI64,
    cache: Mutex<UsageCache>,
    check_interval: Duration,
}

impl Quota {
    pub fn new(limit: QuotaLimit, check_interval: Duration) -> Self {
        Self {
            limit,
            used: AtomicI64::new(0),
            cache: Mutex::new(UsageCache { last_computed: Instant::now(), recompute_in_progress: false }),
            check_interval,
        }
    }

    pub fn limit(&self) -> QuotaLimit {
        self.limit
    }

    pub fn used(&self) -> i64 {
        self.used.load(Ordering::Acquire)
    }

    /// `true` if a write of `delta` additional bytes fits within the limit.
    pub fn can_fit(&self, delta: i64) -> bool {
        self.limit.can_fit(self.used(), delta)
    }

    /// Apply a signed delta to the running total (write/truncate grows or
    /// shrinks it; delete subtracts).
    pub fn apply_delta(&self, delta: i64) {
        self.used.fetch_add(delta, Ordering::AcqRel);
    }

    fn is_fresh(&self) -> bool {
        self.cache.lock().last_computed.elapsed() < self.check_interval
    }

    /// Returns the cached value if fresh; otherwise walks `root` (regular
    /// files only) to recompute. When `allow_stale` is set and a
    /// recomputation is already underway elsewhere, the stale value is
    /// returned instead of blocking on a second concurrent walk.
    pub async fn disk_usage(&self, root: &Path, allow_stale: bool) -> i64 {
        if self.is_fresh() {
            return self.used();
        }
        {
            let mut cache = self.cache.lock();
            if cache.recompute_in_progress {
                if allow_stale {
                    return self.used();
                }
            } else {
                cache.recompute_in_progress = true;
            }
        }
        let total = walk_regular_file_sizes(root).await;
        self.used.store(total, Ordering::Release);
        let mut cache = self.cache.lock();
        cache.last_computed = Instant::now();
        cache.recompute_in_progress = false;
        total
    }
}

/// Sum the sizes of regular files beneath `root`, skipping symlinks and
/// specials, as spec.md §4.B requires for both quota recomputation and
/// `delete` of a directory.
pub async fn walk_regular_file_sizes(root: &Path) -> i64 {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || -> i64 {
        let mut total: i64 = 0;
        let mut stack = vec![root];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else { continue };
                if file_type.is_symlink() {
                    continue;
                } else if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    if let Ok(meta) = entry.metadata() {
                        total = total.saturating_add(meta.len() as i64);
                    }
                }
            }
        }
        total
    })
    .await
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_always_fits() {
        assert!(QuotaLimit::unlimited().can_fit(1_000_000, 1_000_000));
    }

    #[test]
    fn read_only_never_fits() {
        assert!(!QuotaLimit::read_only().can_fit(0, 1));
    }

    #[test]
    fn bounded_limit_rejects_overflow() {
        let limit = QuotaLimit(100);
        assert!(limit.can_fit(50, 50));
        assert!(!limit.can_fit(50, 51));
    }

    #[tokio::test]
    async fn walk_sums_only_regular_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"12345").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/b.txt"), b"1234567890").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(tmp.path().join("a.txt"), tmp.path().join("link")).unwrap();
        let total = walk_regular_file_sizes(tmp.path()).await;
        assert_eq!(total, 15);
    }

    #[tokio::test]
    async fn disk_usage_caches_within_interval() {
        let quota = Quota::new(QuotaLimit::unlimited(), Duration::from_secs(60));
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"12345").unwrap();
        assert_eq!(quota.disk_usage(tmp.path(), false).await, 0);
        std::fs::write(tmp.path().join("b.txt"), b"more bytes on disk").unwrap();
        // Still within the check interval: cached counter wins over a fresh walk.
        assert_eq!(quota.disk_usage(tmp.path(), false).await, 0);
    }
}
