// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-server facade: sandboxed filesystem, container state machine,
//! and event bus behind one power-action serializer (spec.md §4.F).

use crate::crash_detector::{CrashDetector, CrashDetectorConfig};
use crate::environment::Environment;
use crate::error::{ServerError, ServerResult};
use crate::throttle::{ConsoleThrottle, ThrottleAction, ThrottleConfig};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock as AsyncRwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wings_core::{Allocation, Event, EventBus, ProcState, ServerConfig, ServerId};
use wings_runtime::spec::{BindMount, ContainerSpec, PortBinding, Protocol, ResourceSpec};
use wings_runtime::ContainerRuntime;
use wings_sandbox::SandboxFs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
    Kill,
}

/// Ties a server's [`SandboxFs`], [`Environment`], and the shared
/// [`EventBus`] together behind a single-holder power-action lock. Contending
/// for the lock surfaces as [`ServerError::LockerLocked`] rather than
/// queueing — the panel is expected to retry (spec.md §4.F).
pub struct Server<R: ContainerRuntime> {
    id: ServerId,
    sandbox: SandboxFs,
    environment: Arc<Environment<R>>,
    bus: EventBus,
    config: Arc<AsyncRwLock<ServerConfig>>,
    allocation: Arc<AsyncRwLock<Allocation>>,
    power_lock: Arc<tokio::sync::Mutex<()>>,
    throttle: Arc<ConsoleThrottle>,
    crash_detector: Arc<CrashDetector>,
    installing: Arc<AtomicBool>,
    transferring: Arc<AtomicBool>,
    expected_stop: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl<R: ContainerRuntime> Server<R> {
    pub fn new(id: ServerId, runtime: Arc<R>, bus: EventBus, sandbox: SandboxFs, config: ServerConfig, allocation: Allocation) -> Self {
        let environment = Arc::new(Environment::new(id.clone(), runtime, bus.clone()));
        let server = Self {
            id,
            sandbox,
            environment,
            bus,
            config: Arc::new(AsyncRwLock::new(config)),
            allocation: Arc::new(AsyncRwLock::new(allocation)),
            power_lock: Arc::new(tokio::sync::Mutex::new(())),
            throttle: Arc::new(ConsoleThrottle::new(ThrottleConfig::default())),
            crash_detector: Arc::new(CrashDetector::new(CrashDetectorConfig::default())),
            installing: Arc::new(AtomicBool::new(false)),
            transferring: Arc::new(AtomicBool::new(false)),
            expected_stop: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        };
        server.spawn_supervisor();
        server
    }

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    pub fn sandbox(&self) -> &SandboxFs {
        &self.sandbox
    }

    pub fn environment(&self) -> &Arc<Environment<R>> {
        &self.environment
    }

    pub fn set_installing(&self, installing: bool) {
        self.installing.store(installing, Ordering::Release);
    }

    pub fn is_installing(&self) -> bool {
        self.installing.load(Ordering::Acquire)
    }

    pub fn set_transferring(&self, transferring: bool) {
        self.transferring.store(transferring, Ordering::Release);
    }

    pub fn is_transferring(&self) -> bool {
        self.transferring.load(Ordering::Acquire)
    }

    pub async fn update_config(&self, config: ServerConfig) {
        *self.config.write().await = config;
    }

    pub async fn update_allocation(&self, allocation: Allocation) {
        *self.allocation.write().await = allocation;
    }

    /// Single entry point for panel-initiated power actions. Diagnostic
    /// events (console output, stats) keep flowing during install/transfer;
    /// this guard only blocks state changes, and `Kill` is always allowed
    /// so an install that wedges can still be aborted (spec.md §4.F).
    pub async fn power_action(&self, action: PowerAction) -> ServerResult<()> {
        if self.installing.load(Ordering::Acquire) && action != PowerAction::Kill {
            return Err(ServerError::Installing);
        }
        if self.transferring.load(Ordering::Acquire) && matches!(action, PowerAction::Start | PowerAction::Restart) {
            return Err(ServerError::Transferring);
        }

        let _permit = self.power_lock.try_lock().map_err(|_| ServerError::LockerLocked)?;
        match action {
            PowerAction::Start => self.start_locked().await,
            PowerAction::Stop => self.stop_locked().await,
            PowerAction::Kill => self.kill_locked().await,
            PowerAction::Restart => {
                self.stop_locked().await?;
                self.start_locked().await
            }
        }
    }

    async fn start_locked(&self) -> ServerResult<()> {
        let config = self.config.read().await;
        let allocation = self.allocation.read().await;
        let spec = build_container_spec(&self.id, self.sandbox.root(), &config, &allocation);
        self.crash_detector.reset();
        self.environment.start(&spec, &config.startup).await.map_err(ServerError::from)
    }

    async fn stop_locked(&self) -> ServerResult<()> {
        self.expected_stop.store(true, Ordering::Release);
        let config = self.config.read().await;
        self.environment.wait_for_stop(&config.stop.action, Duration::from_secs(90), true).await.map_err(ServerError::from)
    }

    async fn kill_locked(&self) -> ServerResult<()> {
        self.expected_stop.store(true, Ordering::Release);
        self.environment.terminate().await.map_err(ServerError::from)
    }

    /// Refuses when not attached; pre-empts a matching stop descriptor the
    /// same way [`Environment::send_command`] does.
    pub async fn send_command(&self, command: &str) -> ServerResult<()> {
        if self.installing.load(Ordering::Acquire) {
            return Err(ServerError::Installing);
        }
        let config = self.config.read().await;
        self.environment.send_command(command, &config.stop.action).await.map_err(ServerError::from)
    }

    /// Background task owning console-flood throttling, startup-triggered
    /// throttle reset, and crash-triggered auto-restart. Runs for the
    /// lifetime of the `Server`; stopped by dropping it or via `shutdown`.
    fn spawn_supervisor(&self) {
        let mut sub = self.bus.subscribe(["console output", "status"]);
        let environment = self.environment.clone();
        let throttle = self.throttle.clone();
        let crash_detector = self.crash_detector.clone();
        let bus = self.bus.clone();
        let id = self.id.clone();
        let expected_stop = self.expected_stop.clone();
        let cancel = self.cancel.clone();
        let config = self.config.clone();
        let allocation = self.allocation.clone();
        let root = self.sandbox.root().to_path_buf();

        tokio::spawn(async move {
            let mut last_state = ProcState::Offline;
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = sub.recv() => event,
                };
                let Some(event) = event else { break };

                match event.payload {
                    Event::ConsoleOutput(line) => match throttle.observe(&line) {
                        ThrottleAction::Ok => {}
                        ThrottleAction::Warn(count) => {
                            bus.publish(
                                format!("daemon message:{id}"),
                                Event::DaemonMessage(format!("console output is flooding ({count} warning(s))")),
                            );
                        }
                        ThrottleAction::ForceStop => {
                            bus.publish(
                                format!("daemon message:{id}"),
                                Event::DaemonMessage("console output exceeded the configured rate limit, stopping server".to_string()),
                            );
                            expected_stop.store(true, Ordering::Release);
                            if let Err(e) = environment.terminate().await {
                                warn!(server_id = %id, error = %e, "failed to terminate flooding server");
                            }
                        }
                    },
                    Event::StateChange(next) => {
                        if next == ProcState::Starting {
                            throttle.reset();
                        }
                        if next == ProcState::Offline {
                            let was_expected = expected_stop.swap(false, Ordering::AcqRel);
                            if !was_expected && crash_detector.should_restart(last_state) {
                                warn!(server_id = %id, "server crashed, attempting automatic restart");
                                bus.publish(format!("daemon message:{id}"), Event::DaemonMessage("detected server process exit, restarting".to_string()));
                                let cfg = config.read().await;
                                let alloc = allocation.read().await;
                                let spec = build_container_spec(&id, &root, &cfg, &alloc);
                                if let Err(e) = environment.start(&spec, &cfg.startup).await {
                                    warn!(server_id = %id, error = %e, "automatic restart failed");
                                }
                            }
                        }
                        // `Stopping` always relays into `Offline` on a real
                        // exit, so it must not overwrite `last_state` here:
                        // otherwise by the time `Offline` arrives,
                        // `should_restart` above sees `Stopping` instead of
                        // the `Running` state the crash actually started from.
                        if next != ProcState::Stopping {
                            last_state = next;
                        }
                    }
                    _ => {}
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.bus.destroy();
    }
}

fn build_container_spec(id: &ServerId, root: &Path, config: &ServerConfig, allocation: &Allocation) -> ContainerSpec {
    const CPU_PERIOD: i64 = 100_000;

    let cpu_quota = if config.limits.cpu_percent > 0 {
        (config.limits.cpu_percent as i64 * CPU_PERIOD) / 100
    } else {
        -1
    };

    let mut ports = Vec::new();
    for (ip, port) in allocation.bindings() {
        ports.push(PortBinding { host_ip: ip.clone(), host_port: port, container_port: port, protocol: Protocol::Tcp });
        ports.push(PortBinding { host_ip: ip, host_port: port, container_port: port, protocol: Protocol::Udp });
    }

    let mut mounts = vec![BindMount { source: root.display().to_string(), target: "/home/container".to_string(), read_only: false }];
    mounts.extend(config.mounts.iter().map(|m| BindMount { source: m.source.clone(), target: m.target.clone(), read_only: m.read_only }));

    // Built-ins are seeded first so configured variables "deduplicate
    // against" them by losing the `entry().or_insert` race (spec.md §6).
    let mut env = std::collections::BTreeMap::new();
    env.insert("TZ".to_string(), host_timezone());
    env.insert("STARTUP".to_string(), config.startup.invocation.clone());
    env.insert("SERVER_MEMORY".to_string(), config.limits.memory_mib.to_string());
    env.insert("SERVER_IP".to_string(), allocation.default_ip.clone());
    env.insert("SERVER_PORT".to_string(), allocation.default_port.to_string());
    for (key, value) in &config.env_vars {
        env.entry(key.to_uppercase()).or_insert_with(|| value.clone());
    }

    ContainerSpec {
        id: id.as_str().to_string(),
        image: config.image.clone(),
        hostname: id.short().to_string(),
        env,
        ports,
        mounts,
        tmpfs_size_mb: 100,
        resources: ResourceSpec {
            memory_bytes: wings_core::bounded_memory_bytes(config.limits.memory_mib),
            memory_swap_bytes: wings_core::limits::swap_total_bytes(config.limits.memory_mib, config.limits.swap_mib),
            cpu_quota,
            cpu_period: CPU_PERIOD,
            cpu_shares: 1024,
            io_weight: config.limits.io_weight,
            pids_limit: config.limits.pid_limit,
            cpuset_cpus: config.limits.cpu_pinning.clone(),
            oom_kill_disabled: config.limits.oom_kill_disabled,
        },
        network_mode: "bridge".to_string(),
        dns: Vec::new(),
    }
}

/// The host's local timezone name, read from `$TZ`. Falls back to `"UTC"`
/// when unset, since there is no portable way to read `/etc/localtime`
/// without a dedicated timezone-database crate.
fn host_timezone() -> String {
    std::env::var("TZ").unwrap_or_else(|_| "UTC".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wings_core::{Limits, StartupConfig, StopConfig};
    use wings_sandbox::{Denylist, QuotaLimit};

    fn config() -> ServerConfig {
        ServerConfig {
            image: "~local/test".to_string(),
            limits: Limits::default(),
            mounts: Vec::new(),
            labels: BTreeMap::new(),
            env_vars: BTreeMap::new(),
            stop: StopConfig::signal("SIGTERM"),
            startup: StartupConfig { invocation: "java -jar server.jar".to_string(), done: vec!["Done (".to_string()], strip_ansi: false },
        }
    }

    fn sandbox(dir: &std::path::Path) -> SandboxFs {
        SandboxFs::new(dir.to_path_buf(), QuotaLimit::unlimited(), Denylist::empty(), None)
    }

    #[tokio::test]
    async fn second_concurrent_power_action_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(wings_runtime::FakeRuntime::new());
        let bus = EventBus::new();
        let server = Server::new(
            ServerId::from_string("srv-1"),
            runtime,
            bus,
            sandbox(dir.path()),
            config(),
            Allocation::default(),
        );

        let _held = server.power_lock.try_lock().unwrap();
        let result = server.power_action(PowerAction::Start).await;
        assert!(matches!(result, Err(ServerError::LockerLocked)));
    }

    #[tokio::test]
    async fn power_action_refused_while_installing() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(wings_runtime::FakeRuntime::new());
        let bus = EventBus::new();
        let server = Server::new(
            ServerId::from_string("srv-1"),
            runtime,
            bus,
            sandbox(dir.path()),
            config(),
            Allocation::default(),
        );
        server.set_installing(true);
        let result = server.power_action(PowerAction::Start).await;
        assert!(matches!(result, Err(ServerError::Installing)));
        let result = server.power_action(PowerAction::Kill).await;
        assert!(!matches!(result, Err(ServerError::Installing)));
    }

    #[test]
    fn container_spec_injects_every_built_in_env_var() {
        let mut cfg = config();
        cfg.env_vars.insert("custom_flag".to_string(), "1".to_string());
        let allocation = Allocation { default_ip: "10.0.0.5".to_string(), default_port: 25565, mappings: BTreeMap::new() };

        let spec = build_container_spec(&ServerId::from_string("srv-1"), Path::new("/srv/srv-1"), &cfg, &allocation);

        assert_eq!(spec.env.get("STARTUP"), Some(&"java -jar server.jar".to_string()));
        assert_eq!(spec.env.get("SERVER_MEMORY"), Some(&cfg.limits.memory_mib.to_string()));
        assert_eq!(spec.env.get("SERVER_IP"), Some(&"10.0.0.5".to_string()));
        assert_eq!(spec.env.get("SERVER_PORT"), Some(&"25565".to_string()));
        assert!(spec.env.contains_key("TZ"));
        assert_eq!(spec.env.get("CUSTOM_FLAG"), Some(&"1".to_string()));
    }

    #[test]
    fn configured_env_var_colliding_with_a_built_in_never_overrides_it() {
        let mut cfg = config();
        cfg.env_vars.insert("server_memory".to_string(), "9999".to_string());

        let spec = build_container_spec(&ServerId::from_string("srv-1"), Path::new("/srv/srv-1"), &cfg, &Allocation::default());

        assert_eq!(spec.env.get("SERVER_MEMORY"), Some(&cfg.limits.memory_mib.to_string()));
    }
}
