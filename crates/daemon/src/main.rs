// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `wingsd`: binary entrypoint. Acquires the single-instance lock, loads
//! configuration and the server registry, reconciles against the running
//! container runtime, then waits for a shutdown signal.

use fs2::FileExt;
use std::io::Write;
use std::sync::Arc;
use tracing::{error, info, warn};
use wings_core::EventBus;
use wings_daemon::{DaemonConfig, LifecycleError, LifecycleResult};
use wings_runtime::DockerRuntime;
use wings_storage::ServerRegistry;

#[tokio::main]
async fn main() {
    let config = match DaemonConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    let _log_guard = match wings_daemon::logging::init(&config.log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        error!(error = %err, "wingsd exited with an error");
        std::process::exit(1);
    }
}

async fn run(config: DaemonConfig) -> LifecycleResult<()> {
    std::fs::create_dir_all(&config.state_dir)?;
    std::fs::create_dir_all(&config.servers_root)?;

    let lock_file = acquire_lock(&config)?;

    let registry = ServerRegistry::load(config.registry_path.clone())?;
    let runtime = Arc::new(DockerRuntime::connect_local()?);
    let bus = EventBus::new();

    let servers = wings_daemon::reconcile(&config, runtime, bus.clone(), &registry).await?;
    info!(server_count = servers.len(), "reconciled registry against runtime");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping servers");

    for server in servers.values() {
        server.shutdown();
    }
    bus.destroy();
    drop(lock_file);

    Ok(())
}

/// Mirrors the teacher's lock-then-write-PID ordering: open without
/// truncating so an already-running daemon's PID file survives a failed
/// `try_lock_exclusive`, and only truncate once the lock is actually held.
fn acquire_lock(config: &DaemonConfig) -> LifecycleResult<std::fs::File> {
    let lock_file = std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(|_| LifecycleError::LockFailed(config.lock_path.clone()))?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    Ok(lock_file)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler, falling back to ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
