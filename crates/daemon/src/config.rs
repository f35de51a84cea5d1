// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: a TOML file on disk, overridable by environment
//! variables so container deployments never have to bind-mount a config
//! file just to change one path.

use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolve the config file path: `WINGS_CONFIG` env var, or
/// `<state_dir>/config.toml`.
fn config_path(state_dir: &std::path::Path) -> PathBuf {
    std::env::var("WINGS_CONFIG").map(PathBuf::from).unwrap_or_else(|_| state_dir.join("config.toml"))
}

/// Resolve state directory: `WINGS_STATE_DIR` > `/etc/pterodactyl` (the
/// product's well-known default, kept for behavioral familiarity).
fn default_state_dir() -> PathBuf {
    std::env::var("WINGS_STATE_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/etc/pterodactyl"))
}

/// Resolve the log directory: `WINGS_LOG` env var, or `<state_dir>/logs`.
fn default_log_dir(state_dir: &std::path::Path) -> PathBuf {
    std::env::var("WINGS_LOG").map(PathBuf::from).unwrap_or_else(|_| state_dir.join("logs"))
}

/// Values that round-trip through the TOML file on disk. Separated from
/// [`DaemonConfig`] so defaulting and env-var overrides stay in one place
/// (`DaemonConfig::load`) rather than scattered across `serde(default)`
/// attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileConfig {
    #[serde(default)]
    sandbox_root: Option<PathBuf>,
    #[serde(default)]
    docker: DockerSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DockerSection {
    #[serde(default = "default_stop_grace_seconds")]
    stop_grace_seconds: u64,
}

fn default_stop_grace_seconds() -> u64 {
    90
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    pub lock_path: PathBuf,
    pub registry_path: PathBuf,
    /// Root directory under which each server's sandbox lives at
    /// `<servers_root>/<server-id>`.
    pub servers_root: PathBuf,
    pub stop_grace_seconds: u64,
}

impl DaemonConfig {
    /// Loads the config file if present, applying environment overrides on
    /// top; a missing config file is not an error (spec.md's daemon is
    /// expected to run off defaults on a fresh node).
    pub fn load() -> LifecycleResult<Self> {
        let state_dir = default_state_dir();
        let path = config_path(&state_dir);

        let file_config = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|source| LifecycleError::ConfigParse { path: path.clone(), source })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(source) => return Err(LifecycleError::ConfigRead { path: path.clone(), source }),
        };

        let servers_root = file_config.sandbox_root.unwrap_or_else(|| state_dir.join("volumes"));

        Ok(Self {
            log_dir: default_log_dir(&state_dir),
            lock_path: state_dir.join("wingsd.pid"),
            registry_path: state_dir.join("registry.json"),
            servers_root,
            stop_grace_seconds: file_config.docker.stop_grace_seconds,
            config_path: path,
            state_dir,
        })
    }

    pub fn server_root(&self, id: &wings_core::ServerId) -> PathBuf {
        self.servers_root.join(id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("WINGS_STATE_DIR", dir.path());
        std::env::remove_var("WINGS_CONFIG");
        let config = DaemonConfig::load().unwrap();
        assert_eq!(config.state_dir, dir.path());
        assert_eq!(config.stop_grace_seconds, 90);
        std::env::remove_var("WINGS_STATE_DIR");
    }

    #[test]
    #[serial_test::serial]
    fn config_file_overrides_sandbox_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "sandbox_root = \"/srv/wings\"\n").unwrap();
        std::env::set_var("WINGS_STATE_DIR", dir.path());
        std::env::remove_var("WINGS_CONFIG");
        let config = DaemonConfig::load().unwrap();
        assert_eq!(config.servers_root, PathBuf::from("/srv/wings"));
        std::env::remove_var("WINGS_STATE_DIR");
    }
}
