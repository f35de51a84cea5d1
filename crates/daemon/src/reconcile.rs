// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup reconciliation: rebuild the in-memory [`Server`] set from
//! [`ServerRegistry`] and compare each against what the runtime actually
//! has running, so a daemon restart doesn't silently lose track of
//! containers it owns (spec.md §9).

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use wings_core::{EventBus, ServerId};
use wings_runtime::ContainerRuntime;
use wings_sandbox::{Denylist, QuotaLimit, SandboxFs};
use wings_server::Server;
use wings_storage::ServerRegistry;

use crate::config::DaemonConfig;
use crate::error::LifecycleResult;

/// Rebuilds one [`Server`] per registry entry and logs a mismatch when the
/// runtime's view of "is this container running" disagrees with what the
/// daemon would otherwise assume (fresh `Environment`s start `Offline`).
///
/// Re-attaching a running container's console/stats streams on restart is
/// not implemented: [`wings_server::Environment`] only attaches as part of
/// `start()`. A server found running here stays reachable for power
/// actions and inspection but won't stream console output until the next
/// explicit start/restart.
pub async fn reconcile<R: ContainerRuntime>(
    config: &DaemonConfig,
    runtime: Arc<R>,
    bus: EventBus,
    registry: &ServerRegistry,
) -> LifecycleResult<HashMap<ServerId, Arc<Server<R>>>> {
    let mut servers = HashMap::new();

    for (id, record) in registry.list() {
        let root = config.server_root(&id);
        std::fs::create_dir_all(&root)?;
        let sandbox = SandboxFs::new(root, QuotaLimit::unlimited(), Denylist::empty(), None);
        let server = Arc::new(Server::new(id.clone(), runtime.clone(), bus.clone(), sandbox, record.config, record.allocation));

        match runtime.inspect(id.as_str()).await {
            Ok(inspect) if inspect.running => {
                warn!(server_id = %id, "found running container at startup; it will not stream console output until the next start/restart");
            }
            Ok(_) => info!(server_id = %id, "reconciled, container not running"),
            Err(err) => info!(server_id = %id, error = %err, "reconciled, container not found in runtime"),
        }

        servers.insert(id, server);
    }

    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wings_core::{Allocation, Limits, ServerConfig, StartupConfig, StopConfig};
    use wings_runtime::FakeRuntime;
    use wings_storage::ServerRecord;

    fn config(dir: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            state_dir: dir.to_path_buf(),
            config_path: dir.join("config.toml"),
            log_dir: dir.join("logs"),
            lock_path: dir.join("wingsd.pid"),
            registry_path: dir.join("registry.json"),
            servers_root: dir.join("volumes"),
            stop_grace_seconds: 90,
        }
    }

    fn record() -> ServerRecord {
        ServerRecord {
            config: ServerConfig {
                image: "~local/test".to_string(),
                limits: Limits::default(),
                mounts: Vec::new(),
                labels: Default::default(),
                env_vars: Default::default(),
                stop: StopConfig::signal("SIGTERM"),
                startup: StartupConfig { invocation: String::new(), done: vec!["Done".to_string()], strip_ansi: false },
            },
            allocation: Allocation::default(),
        }
    }

    #[tokio::test]
    async fn reconcile_rebuilds_one_server_per_registry_entry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServerRegistry::load(dir.path().join("registry.json")).unwrap();
        let id = ServerId::new();
        registry.upsert(id.clone(), record()).unwrap();

        let runtime = Arc::new(FakeRuntime::new());
        let bus = EventBus::new();
        let servers = reconcile(&config(dir.path()), runtime, bus, &registry).await.unwrap();

        assert_eq!(servers.len(), 1);
        assert!(servers.contains_key(&id));
    }
}
