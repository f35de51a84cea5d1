// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Abstracted container operations (spec.md §4.D). `Environment` depends on
//! this trait, never on a concrete backend, so the state machine in
//! `wings-server` is testable without Docker.

use crate::error::RuntimeResult;
use crate::spec::{ContainerSpec, InspectResult, PullStatus, StatsRecord};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Bidirectional attach stream: the stdout/stderr byte stream plus a
/// writable stdin half. `Environment::attach` is the sole consumer.
pub struct AttachStream {
    pub output: BoxStream<'static, std::io::Result<Bytes>>,
    pub stdin: Box<dyn AsyncWrite + Unpin + Send>,
}

/// Capability contract over the container backend. No Docker-specific type
/// leaks past this trait; `wings-server` only ever sees these shapes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Pulls `image_ref` unless it begins with the local marker `~`, in
    /// which case it is a no-op. If the pull fails but a local image by
    /// that exact tag already exists, succeeds with a warning logged by the
    /// caller (the stream still ends normally).
    async fn ensure_image(&self, image_ref: &str) -> RuntimeResult<BoxStream<'static, RuntimeResult<PullStatus>>>;

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<()>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Treats "not found" as success per spec.md §7.
    async fn stop_container(&self, id: &str, timeout: Duration) -> RuntimeResult<()>;

    /// Treats "not found" as success per spec.md §7.
    async fn kill_container(&self, id: &str, signal: &str) -> RuntimeResult<()>;

    /// Treats "not found" as success per spec.md §7.
    async fn remove_container(&self, id: &str, force: bool, volumes: bool) -> RuntimeResult<()>;

    /// Resolves once the container is observed not-running. Documented as
    /// unreliable in earlier runtime versions (spec.md §4.E) — `Environment`
    /// must treat attach-stream closure as the authoritative stop signal and
    /// use this only as a secondary hint.
    async fn wait_not_running(&self, id: &str) -> RuntimeResult<()>;

    async fn attach(&self, id: &str) -> RuntimeResult<AttachStream>;

    async fn stats_stream(&self, id: &str) -> RuntimeResult<BoxStream<'static, RuntimeResult<StatsRecord>>>;

    /// Propagates "not found" rather than swallowing it, unlike
    /// stop/kill/remove — callers need to know the container is gone.
    async fn inspect(&self, id: &str) -> RuntimeResult<InspectResult>;

    async fn read_logs(&self, id: &str, tail_lines: usize) -> RuntimeResult<Vec<String>>;

    /// Hot-applies a derived resource spec without recreating the
    /// container. CPU pinning removal is impossible this way — the caller
    /// must recreate for that case (spec.md §4.E).
    async fn update_resources(&self, id: &str, resources: &crate::spec::ResourceSpec) -> RuntimeResult<()>;
}
