// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI command implementations.

pub mod list;
pub mod logs;
pub mod power;
pub mod status;

use std::sync::Arc;
use wings_core::{EventBus, ServerId};
use wings_daemon::DaemonConfig;
use wings_runtime::DockerRuntime;
use wings_sandbox::{Denylist, QuotaLimit, SandboxFs};
use wings_server::Server;
use wings_storage::ServerRegistry;

use crate::exit_error::ExitError;

/// Shared setup for every command that needs to act on a single server:
/// load config + registry, find the record, connect to Docker, and build a
/// throwaway `Server` for this one-shot invocation. There is no long-running
/// daemon process this CLI talks to — it operates directly on the same
/// registry and runtime the daemon would (see DESIGN.md).
pub fn load_server(id: &str) -> Result<(DaemonConfig, Arc<Server<DockerRuntime>>), ExitError> {
    let config = DaemonConfig::load().map_err(|e| ExitError::new(1, format!("failed to load config: {e}")))?;
    let registry = ServerRegistry::load(config.registry_path.clone())
        .map_err(|e| ExitError::new(1, format!("failed to load registry: {e}")))?;
    let server_id = ServerId::from_string(id);
    let record = registry.get(&server_id).ok_or_else(|| ExitError::new(2, format!("no server configured with id {id}")))?;

    let runtime = Arc::new(DockerRuntime::connect_local().map_err(|e| ExitError::new(1, format!("failed to connect to the container runtime: {e}")))?);
    let root = config.server_root(&server_id);
    std::fs::create_dir_all(&root).map_err(|e| ExitError::new(1, format!("failed to create server directory: {e}")))?;
    let sandbox = SandboxFs::new(root, QuotaLimit::unlimited(), Denylist::empty(), None);
    let server = Arc::new(Server::new(server_id, runtime, EventBus::new(), sandbox, record.config, record.allocation));
    Ok((config, server))
}

pub fn load_registry() -> Result<(DaemonConfig, ServerRegistry), ExitError> {
    let config = DaemonConfig::load().map_err(|e| ExitError::new(1, format!("failed to load config: {e}")))?;
    let registry = ServerRegistry::load(config.registry_path.clone())
        .map_err(|e| ExitError::new(1, format!("failed to load registry: {e}")))?;
    Ok((config, registry))
}
