// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`ContainerRuntime`] double for testing `Environment`/`Server`
//! without Docker (`test-support` feature).

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{AttachStream, ContainerRuntime};
use crate::spec::{ContainerSpec, InspectResult, PullStatus, ResourceSpec, StatsRecord};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default)]
struct FakeContainer {
    running: bool,
    exit_code: i64,
    oom_killed: bool,
}

/// Scripted, in-memory runtime. Tests drive container lifecycle by calling
/// [`FakeRuntime::push_console_line`] / [`FakeRuntime::close_attach`] /
/// [`FakeRuntime::set_inspect`] rather than talking to a real daemon.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    containers: Arc<Mutex<HashMap<String, FakeContainer>>>,
    console_tx: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<std::io::Result<Bytes>>>>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_console_line(&self, id: &str, line: &str) {
        if let Some(tx) = self.console_tx.lock().get(id) {
            let _ = tx.send(Ok(Bytes::from(format!("{line}\n"))));
        }
    }

    pub fn close_attach(&self, id: &str) {
        self.console_tx.lock().remove(id);
    }

    pub fn set_running(&self, id: &str, running: bool) {
        self.containers.lock().entry(id.to_string()).or_default().running = running;
    }

    pub fn set_exit(&self, id: &str, exit_code: i64, oom_killed: bool) {
        let mut containers = self.containers.lock();
        let c = containers.entry(id.to_string()).or_default();
        c.running = false;
        c.exit_code = exit_code;
        c.oom_killed = oom_killed;
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, _image_ref: &str) -> RuntimeResult<BoxStream<'static, RuntimeResult<PullStatus>>> {
        use futures_util::stream::StreamExt;
        Ok(futures_util::stream::empty().boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<()> {
        self.containers.lock().insert(spec.id.clone(), FakeContainer::default());
        Ok(())
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.containers.lock().entry(id.to_string()).or_default().running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> RuntimeResult<()> {
        if let Some(c) = self.containers.lock().get_mut(id) {
            c.running = false;
        }
        Ok(())
    }

    async fn kill_container(&self, id: &str, _signal: &str) -> RuntimeResult<()> {
        if let Some(c) = self.containers.lock().get_mut(id) {
            c.running = false;
        }
        self.close_attach(id);
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool, _volumes: bool) -> RuntimeResult<()> {
        self.containers.lock().remove(id);
        Ok(())
    }

    async fn wait_not_running(&self, id: &str) -> RuntimeResult<()> {
        loop {
            if !self.containers.lock().get(id).map(|c| c.running).unwrap_or(false) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn attach(&self, id: &str) -> RuntimeResult<AttachStream> {
        use futures_util::stream::StreamExt;
        use tokio_stream::wrappers::UnboundedReceiverStream;

        let (tx, rx) = mpsc::unbounded_channel();
        self.console_tx.lock().insert(id.to_string(), tx);
        let output = UnboundedReceiverStream::new(rx).boxed();
        Ok(AttachStream { output, stdin: Box::new(tokio::io::sink()) })
    }

    async fn stats_stream(&self, _id: &str) -> RuntimeResult<BoxStream<'static, RuntimeResult<StatsRecord>>> {
        use futures_util::stream::StreamExt;
        Ok(futures_util::stream::empty().boxed())
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<InspectResult> {
        let containers = self.containers.lock();
        let c = containers.get(id).ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        Ok(InspectResult { running: c.running, exit_code: c.exit_code, oom_killed: c.oom_killed, log_path: None })
    }

    async fn read_logs(&self, _id: &str, _tail_lines: usize) -> RuntimeResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn update_resources(&self, _id: &str, _resources: &ResourceSpec) -> RuntimeResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ResourceSpec;
    use futures_util::StreamExt;

    fn spec(id: &str) -> ContainerSpec {
        ContainerSpec {
            id: id.to_string(),
            image: "~local/img".to_string(),
            hostname: id.to_string(),
            env: Default::default(),
            ports: Vec::new(),
            mounts: Vec::new(),
            tmpfs_size_mb: 100,
            resources: ResourceSpec {
                memory_bytes: 0,
                memory_swap_bytes: 0,
                cpu_quota: 0,
                cpu_period: 0,
                cpu_shares: 0,
                io_weight: 500,
                pids_limit: 0,
                cpuset_cpus: String::new(),
                oom_kill_disabled: false,
            },
            network_mode: "bridge".to_string(),
            dns: Vec::new(),
        }
    }

    #[tokio::test]
    async fn inspect_not_found_before_create() {
        let runtime = FakeRuntime::new();
        let result = runtime.inspect("missing").await;
        assert!(matches!(result, Err(RuntimeError::NotFound(_))));
    }

    #[tokio::test]
    async fn create_start_inspect_reports_running() {
        let runtime = FakeRuntime::new();
        runtime.create_container(&spec("srv-1")).await.unwrap();
        runtime.start_container("srv-1").await.unwrap();
        let inspected = runtime.inspect("srv-1").await.unwrap();
        assert!(inspected.running);
    }

    #[tokio::test]
    async fn attach_delivers_pushed_console_lines() {
        let runtime = FakeRuntime::new();
        runtime.create_container(&spec("srv-1")).await.unwrap();
        let mut attached = runtime.attach("srv-1").await.unwrap();
        runtime.push_console_line("srv-1", "Done (3.2s)!");
        let chunk = attached.output.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&chunk).contains("Done ("));
    }

    #[tokio::test]
    async fn stop_then_stop_is_idempotent() {
        let runtime = FakeRuntime::new();
        runtime.create_container(&spec("srv-1")).await.unwrap();
        runtime.start_container("srv-1").await.unwrap();
        runtime.stop_container("srv-1", Duration::from_secs(1)).await.unwrap();
        runtime.stop_container("srv-1", Duration::from_secs(1)).await.unwrap();
        assert!(!runtime.inspect("srv-1").await.unwrap().running);
    }
}
