// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox error codes (spec.md §4.B).

use std::io;
use thiserror::Error;

/// Errors from [`crate::SandboxFs`] and [`crate::Archiver`] operations.
///
/// Named as codes rather than wrapping `io::Error` directly so callers at
/// the websocket/HTTP boundary can match on the kind without string
/// sniffing.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("path is a directory")]
    IsDirectory,
    #[error("disk quota exceeded")]
    DiskSpace,
    #[error("unknown archive format")]
    UnknownArchive,
    #[error("path resolves outside the sandbox root")]
    BadPathResolution,
    #[error("path matches a denylist pattern")]
    DenylistFile,
    #[error("path does not exist")]
    NotExist,
    #[error("path already exists")]
    Exist,
    #[error("permission denied")]
    Permission,
    #[error("unexpected sandbox error: {0}")]
    Unknown(String),
}

impl From<io::Error> for SandboxError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SandboxError::NotExist,
            io::ErrorKind::AlreadyExists => SandboxError::Exist,
            io::ErrorKind::PermissionDenied => SandboxError::Permission,
            _ => SandboxError::Unknown(err.to_string()),
        }
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;
