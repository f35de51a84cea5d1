// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors from [`crate::ContainerRuntime`] operations (spec.md §4.D, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("image pull failed: {0}")]
    ImagePull(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("create failed: {0}")]
    CreateFailed(String),
    #[error("start failed: {0}")]
    StartFailed(String),
    #[error("stop failed: {0}")]
    StopFailed(String),
    #[error("attach failed: {0}")]
    AttachFailed(String),
    #[error("inspect failed: {0}")]
    InspectFailed(String),
    #[error("operation timed out")]
    Timeout,
    #[error("runtime backend error: {0}")]
    Backend(String),
}

impl RuntimeError {
    /// Whether this specific error represents "container doesn't exist",
    /// which `remove`/`stop`/`kill` treat as success per spec.md §7.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
