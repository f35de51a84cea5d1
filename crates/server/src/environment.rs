// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-server state machine binding a [`wings_runtime::ContainerRuntime`] to
//! the [`wings_core::EventBus`] (spec.md §4.E).

use crate::error::{EnvironmentError, EnvironmentResult};
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wings_core::{EventBus, ProcState, ResourceSnapshot, ServerId, StartupConfig, StopAction};
use wings_runtime::{ContainerRuntime, ContainerSpec};

/// Thin wrapper over a [`watch`] channel: `procState` updates are
/// linearizable via this single cell, and `StateChange` is only observed by
/// readers when the value actually changes (spec.md §5).
struct StateCell {
    tx: watch::Sender<ProcState>,
}

impl StateCell {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(ProcState::Offline);
        Self { tx }
    }

    fn get(&self) -> ProcState {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ProcState> {
        self.tx.subscribe()
    }

    /// Returns `Ok(true)` if the value changed, `Ok(false)` for an
    /// accepted self-transition no-op.
    fn transition(&self, next: ProcState) -> Result<bool, wings_core::TransitionError> {
        let current = self.get();
        let landed = current.transition(next)?;
        if landed != current {
            let _ = self.tx.send(landed);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Per-server state machine: `offline -> starting -> running -> stopping ->
/// offline`. Owns the sole stdin handle and the background attach/stats
/// tasks.
pub struct Environment<R: ContainerRuntime> {
    id: ServerId,
    runtime: Arc<R>,
    bus: EventBus,
    state: StateCell,
    attached: Arc<AtomicBool>,
    stdin: Arc<AsyncMutex<Option<Box<dyn tokio::io::AsyncWrite + Unpin + Send>>>>,
    last_start_time: SyncMutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl<R: ContainerRuntime> Environment<R> {
    pub fn new(id: ServerId, runtime: Arc<R>, bus: EventBus) -> Self {
        Self {
            id,
            runtime,
            bus,
            state: StateCell::new(),
            attached: Arc::new(AtomicBool::new(false)),
            stdin: Arc::new(AsyncMutex::new(None)),
            last_start_time: SyncMutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn proc_state(&self) -> ProcState {
        self.state.get()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ProcState> {
        self.state.subscribe()
    }

    fn publish_topic(&self) -> String {
        format!("status:{}", self.id)
    }

    fn transition_and_publish(&self, next: ProcState) -> Result<(), wings_core::TransitionError> {
        if self.state.transition(next)? {
            self.bus.publish(self.publish_topic(), wings_core::Event::StateChange(next));
        }
        Ok(())
    }

    /// `offline -> starting`: ensures the image, (re)creates the container,
    /// attaches **before** starting it (order guarantee, spec.md §4.E), then
    /// issues `startContainer`. Bounded to 30s combined attach+start.
    pub async fn start(&self, spec: &ContainerSpec, startup: &StartupConfig) -> EnvironmentResult<()> {
        self.transition_and_publish(ProcState::Starting)?;
        *self.last_start_time.lock() = Some(Instant::now());

        let result = timeout(Duration::from_secs(30), self.start_inner(spec, startup)).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.teardown_to_offline().await;
                Err(e)
            }
            Err(_) => {
                self.teardown_to_offline().await;
                Err(EnvironmentError::StopTimeout(Duration::from_secs(30)))
            }
        }
    }

    async fn start_inner(&self, spec: &ContainerSpec, startup: &StartupConfig) -> EnvironmentResult<()> {
        let mut pulls = self.runtime.ensure_image(&spec.image).await?;
        while let Some(status) = pulls.next().await {
            if let Err(e) = status {
                warn!(server_id = %self.id, error = %e, "image pull reported an error, continuing if a local copy exists");
            }
        }

        self.runtime.remove_container(&spec.id, true, true).await?;
        self.runtime.create_container(spec).await?;
        self.attach(startup).await?;
        self.runtime.start_container(&spec.id).await?;
        Ok(())
    }

    /// The single authoritative consumer of container output (spec.md
    /// §4.E). Spawns the console and stats background tasks, then returns
    /// once the attach stream itself is open — it does not block on the
    /// container's lifetime.
    async fn attach(&self, startup: &StartupConfig) -> EnvironmentResult<()> {
        let attach_stream = self.runtime.attach(self.id.as_str()).await?;
        *self.stdin.lock().await = Some(attach_stream.stdin);
        self.attached.store(true, Ordering::Release);

        self.spawn_stats_task();
        self.spawn_console_task(attach_stream.output, startup.clone());
        Ok(())
    }

    fn spawn_stats_task(&self) {
        let runtime = self.runtime.clone();
        let bus = self.bus.clone();
        let id = self.id.clone();
        let mut state_rx = self.state.subscribe();
        let cancel = self.cancel.clone();
        let topic = self.publish_topic().replace("status", "stats");

        tokio::spawn(async move {
            let Ok(mut stats) = runtime.stats_stream(id.as_str()).await else { return };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = state_rx.changed() => {
                        if *state_rx.borrow() == ProcState::Offline {
                            break;
                        }
                    }
                    record = stats.next() => {
                        let Some(record) = record else { break };
                        let Ok(record) = record else { continue };
                        let cpu = ResourceSnapshot::cpu_absolute_from_deltas(record.cpu_delta, record.system_delta, record.online_cpus);
                        let memory = ResourceSnapshot::memory_from_usage(record.memory_usage, record.total_inactive_file, record.inactive_file);
                        let snapshot = ResourceSnapshot {
                            memory_bytes: memory,
                            memory_limit_bytes: 0,
                            cpu_absolute: cpu,
                            rx_bytes: record.rx_bytes,
                            tx_bytes: record.tx_bytes,
                            uptime_ms: 0,
                        };
                        bus.publish(&topic, wings_core::Event::Resources(snapshot));
                    }
                }
            }
        });
    }

    fn spawn_console_task(&self, mut output: futures_util::stream::BoxStream<'static, std::io::Result<Bytes>>, startup: StartupConfig) {
        let bus = self.bus.clone();
        let id = self.id.clone();
        let state = self_state_handle(self);
        let attached = self.attached.clone();
        let stdin = self.stdin.clone();
        let status_topic = self.publish_topic();
        let console_topic = status_topic.replace("status", "console output");

        tokio::spawn(async move {
            let mut pending = Vec::new();
            while let Some(chunk) = output.next().await {
                let Ok(chunk) = chunk else { continue };
                pending.extend_from_slice(&chunk);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line_bytes = pending.drain(..=pos).collect::<Vec<_>>();
                    let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len().saturating_sub(1)]).into_owned();

                    bus.publish(&console_topic, wings_core::Event::ConsoleOutput(line.clone()));

                    if state.get() == ProcState::Starting && startup.matches(&line) {
                        if state.transition(ProcState::Running).unwrap_or(false) {
                            bus.publish(&status_topic, wings_core::Event::StateChange(ProcState::Running));
                            info!(server_id = %id, "startup detection matched, server running");
                        }
                    }
                }
            }

            attached.store(false, Ordering::Release);
            *stdin.lock().await = None;
            if state.get() != ProcState::Offline {
                // From `Running` this is a legal two-hop teardown; from
                // `Starting` the `Stopping` hop is illegal (only a direct
                // `Starting -> Offline` is), so it's attempted but only
                // published when it actually lands.
                if state.transition(ProcState::Stopping).unwrap_or(false) {
                    bus.publish(&status_topic, wings_core::Event::StateChange(ProcState::Stopping));
                }
                if state.transition(ProcState::Offline).unwrap_or(false) {
                    bus.publish(&status_topic, wings_core::Event::StateChange(ProcState::Offline));
                }
            }
        });
    }

    /// `running -> stopping` per the server's configured stop descriptor.
    pub async fn stop(&self, action: &StopAction) -> EnvironmentResult<()> {
        self.transition_and_publish(ProcState::Stopping)?;
        match action {
            StopAction::Signal(sig) => {
                self.runtime.kill_container(self.id.as_str(), sig).await?;
            }
            StopAction::Command(command) => {
                self.send_raw_command(command).await?;
            }
            StopAction::Stop => {
                self.runtime.stop_container(self.id.as_str(), Duration::from_secs(30)).await?;
            }
        }
        Ok(())
    }

    /// `any -> offline` (via stopping): kills immediately, inspects, and
    /// publishes. Used for force-termination paths where graceful stop is
    /// not wanted (install abort, crash-detector escalation).
    pub async fn terminate(&self) -> EnvironmentResult<()> {
        if self.proc_state() != ProcState::Stopping {
            let _ = self.transition_and_publish(ProcState::Stopping);
        }
        self.runtime.kill_container(self.id.as_str(), "SIGKILL").await?;
        let _ = self.runtime.inspect(self.id.as_str()).await;
        self.teardown_to_offline().await;
        Ok(())
    }

    async fn teardown_to_offline(&self) {
        self.attached.store(false, Ordering::Release);
        *self.stdin.lock().await = None;
        if self.proc_state() != ProcState::Offline {
            let _ = self.transition_and_publish(ProcState::Offline);
        }
    }

    /// Issues `stop`, then races `waitNotRunning` against `duration` and the
    /// parent cancellation. On timeout, termination runs on the **parent**
    /// context — never the expired timer's own context — so a kill can
    /// never be aborted by the very deadline that demanded it (spec.md
    /// §4.E).
    pub async fn wait_for_stop(&self, action: &StopAction, duration: Duration, terminate_on_timeout: bool) -> EnvironmentResult<()> {
        self.stop(action).await?;

        let wait = self.runtime.wait_not_running(self.id.as_str());
        match timeout(duration, wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EnvironmentError::from(e)),
            Err(_) if terminate_on_timeout => {
                self.terminate().await?;
                Ok(())
            }
            Err(_) => Err(EnvironmentError::StopTimeout(duration)),
        }
    }

    /// Refuses when not attached. If `s` matches the configured `command`
    /// stop descriptor, preemptively transitions to `stopping` before
    /// writing, so a racing stop detector never double-fires (spec.md
    /// §4.E).
    pub async fn send_command(&self, s: &str, stop: &StopAction) -> EnvironmentResult<()> {
        if !self.is_attached() {
            return Err(EnvironmentError::NotAttached);
        }
        if let StopAction::Command(expected) = stop {
            if expected == s {
                let _ = self.transition_and_publish(ProcState::Stopping);
            }
        }
        self.send_raw_command(s).await
    }

    async fn send_raw_command(&self, s: &str) -> EnvironmentResult<()> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else { return Err(EnvironmentError::NotAttached) };
        stdin.write_all(s.as_bytes()).await.map_err(|e| EnvironmentError::Runtime(wings_runtime::RuntimeError::Backend(e.to_string())))?;
        stdin.write_all(b"\n").await.map_err(|e| EnvironmentError::Runtime(wings_runtime::RuntimeError::Backend(e.to_string())))?;
        Ok(())
    }

    /// Inspects the container (ignoring "not found") and applies the
    /// derived resource spec via the runtime's update primitive. Removing
    /// CPU pinning this way is impossible — the caller must recreate.
    pub async fn in_situ_update(&self, resources: &wings_runtime::spec::ResourceSpec) -> EnvironmentResult<()> {
        match self.runtime.inspect(self.id.as_str()).await {
            Ok(_) => self.runtime.update_resources(self.id.as_str(), resources).await.map_err(EnvironmentError::from),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(EnvironmentError::from(e)),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetches the last `tail_lines` of console output directly from the
    /// runtime, bounded by a 5s deadline (spec.md §5) distinct from the
    /// live attach stream the console task already consumes.
    pub async fn read_logs(&self, tail_lines: usize) -> EnvironmentResult<Vec<String>> {
        match timeout(Duration::from_secs(5), self.runtime.read_logs(self.id.as_str(), tail_lines)).await {
            Ok(result) => result.map_err(EnvironmentError::from),
            Err(_) => Err(EnvironmentError::ReadLogsTimeout(Duration::from_secs(5))),
        }
    }
}

/// A cheap, cloneable read/transition handle into the owning `Environment`'s
/// state cell, used by the background console task which otherwise cannot
/// borrow `&self` across the spawned task's lifetime.
struct StateHandle {
    tx: watch::Sender<ProcState>,
}

impl StateHandle {
    fn get(&self) -> ProcState {
        *self.tx.borrow()
    }

    fn transition(&self, next: ProcState) -> Result<bool, wings_core::TransitionError> {
        let current = self.get();
        let landed = current.transition(next)?;
        if landed != current {
            let _ = self.tx.send(landed);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn self_state_handle<R: ContainerRuntime>(env: &Environment<R>) -> StateHandle {
    StateHandle { tx: env.state.tx.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wings_runtime::FakeRuntime;

    fn spec(id: &str) -> ContainerSpec {
        ContainerSpec {
            id: id.to_string(),
            image: "~local/img".to_string(),
            hostname: id.to_string(),
            env: BTreeMap::new(),
            ports: Vec::new(),
            mounts: Vec::new(),
            tmpfs_size_mb: 100,
            resources: wings_runtime::spec::ResourceSpec {
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
    async fn start_transitions_through_starting_to_running_on_startup_match() {
        let runtime = Arc::new(FakeRuntime::new());
        let bus = EventBus::new();
        let id = ServerId::from_string("srv-1");

        let env = Arc::new(Environment::new(id.clone(), runtime.clone(), bus));
        let startup = StartupConfig { invocation: String::new(), done: vec!["Done (".to_string()], strip_ansi: false };
        let spec = spec(id.as_str());

        let mut state_rx = env.subscribe_state();
        let started = tokio::spawn({
            let env = env.clone();
            async move { env.start(&spec, &startup).await }
        });

        // Wait until the environment reaches `starting` (container created,
        // attach in flight), then push the line the fake backend's attach
        // stream delivers once it is subscribed.
        while *state_rx.borrow_and_update() != ProcState::Starting {
            state_rx.changed().await.unwrap();
        }
        // The console task registers its receiver asynchronously after
        // `attach` returns; retry the push until it lands.
        let mut changed = false;
        for _ in 0..50 {
            runtime.push_console_line(id.as_str(), "Done (3.2s)!");
            match timeout(Duration::from_millis(20), state_rx.changed()).await {
                Ok(result) => {
                    result.unwrap();
                    changed = true;
                    break;
                }
                Err(_) => continue,
            }
        }
        assert!(changed, "startup line was never observed");
        assert_eq!(*state_rx.borrow(), ProcState::Running);

        started.await.unwrap().unwrap();
        assert_eq!(env.proc_state(), ProcState::Running);
    }

    #[tokio::test]
    async fn send_command_refused_when_not_attached() {
        let runtime = Arc::new(FakeRuntime::new());
        let bus = EventBus::new();
        let env = Environment::new(ServerId::from_string("srv-1"), runtime, bus);
        let result = env.send_command("say hi", &StopAction::Signal("SIGTERM".to_string())).await;
        assert!(matches!(result, Err(EnvironmentError::NotAttached)));
    }

    #[tokio::test]
    async fn terminate_is_idempotent_from_offline() {
        let runtime = Arc::new(FakeRuntime::new());
        let bus = EventBus::new();
        let env = Environment::new(ServerId::from_string("srv-1"), runtime, bus);
        env.terminate().await.unwrap();
        env.terminate().await.unwrap();
        assert_eq!(env.proc_state(), ProcState::Offline);
    }
}
