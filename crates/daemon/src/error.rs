// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no state directory configured and $HOME is unset")]
    NoStateDir,
    #[error("failed to read config at {path}: {source}")]
    ConfigRead { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse { path: PathBuf, #[source] source: toml::de::Error },
    #[error("another daemon instance already holds the lock at {0}")]
    LockFailed(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] wings_storage::StorageError),
    #[error("runtime backend error: {0}")]
    Runtime(#[from] wings_runtime::RuntimeError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
