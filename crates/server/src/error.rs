// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors from [`crate::Environment`] and [`crate::Server`] (spec.md §4.E,
//! §4.F, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("runtime error: {0}")]
    Runtime(#[from] wings_runtime::RuntimeError),
    #[error("illegal state transition: {0}")]
    Transition(#[from] wings_core::TransitionError),
    #[error("not attached to the container")]
    NotAttached,
    #[error("waitForStop timed out after {0:?}")]
    StopTimeout(std::time::Duration),
    #[error("readLogs timed out after {0:?}")]
    ReadLogsTimeout(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error(transparent)]
    Sandbox(#[from] wings_sandbox::SandboxError),
    /// Surfaced to clients as "another power action is currently being
    /// processed" (spec.md §4.F).
    #[error("another power action is currently being processed")]
    LockerLocked,
    #[error("server is transferring; refusing power action")]
    Transferring,
    #[error("server is installing; action not permitted")]
    Installing,
}

pub type EnvironmentResult<T> = Result<T, EnvironmentError>;
pub type ServerResult<T> = Result<T, ServerError>;
