// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable registry of configured servers, persisted as a single JSON
//! snapshot on every mutation. Lets the daemon reconcile its in-memory
//! `Server` set against disk on startup (spec.md §9's "attach before
//! start" guidance presumes the daemon already knows which containers it
//! owns before it probes the runtime).

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use wings_core::{Allocation, ServerConfig, ServerId};

pub const CURRENT_REGISTRY_VERSION: u32 = 1;

/// Everything the daemon needs to reconstruct a `Server` on startup,
/// short of re-probing the container runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub config: ServerConfig,
    pub allocation: Allocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistrySnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    servers: BTreeMap<String, ServerRecord>,
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out. Keeps
/// up to [`MAX_BAK_FILES`] backups, discarding the oldest once at capacity.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }
    bak(1)
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io { path: path.to_path_buf(), source }
}

/// In-memory, disk-backed registry. Every mutation rewrites the whole
/// snapshot file; this is not a high-frequency write path (config edits and
/// provisioning, not per-tick telemetry), so there is no WAL.
pub struct ServerRegistry {
    path: PathBuf,
    servers: RwLock<HashMap<ServerId, ServerRecord>>,
}

impl ServerRegistry {
    /// Loads `path` if it exists, otherwise starts empty. The file is not
    /// created until the first [`ServerRegistry::save`].
    pub fn load(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let servers = match fs::read(&path) {
            Ok(bytes) => {
                let snapshot: RegistrySnapshot = serde_json::from_slice(&bytes)?;
                if snapshot.version > CURRENT_REGISTRY_VERSION {
                    return Err(StorageError::UnsupportedVersion {
                        found: snapshot.version,
                        supported: CURRENT_REGISTRY_VERSION,
                    });
                }
                snapshot
                    .servers
                    .into_iter()
                    .map(|(id, record)| (ServerId::from(id), record))
                    .collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(io_err(&path, err)),
        };
        Ok(Self { path, servers: RwLock::new(servers) })
    }

    pub fn get(&self, id: &ServerId) -> Option<ServerRecord> {
        self.servers.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    pub fn list(&self) -> Vec<(ServerId, ServerRecord)> {
        self.servers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    pub fn upsert(&self, id: ServerId, record: ServerRecord) -> StorageResult<()> {
        self.servers.write().unwrap_or_else(|e| e.into_inner()).insert(id, record);
        self.save()
    }

    pub fn remove(&self, id: &ServerId) -> StorageResult<()> {
        self.servers.write().unwrap_or_else(|e| e.into_inner()).remove(id);
        self.save()
    }

    /// Atomically rewrites the snapshot file: write to a `.tmp` sibling,
    /// rotate the previous file into a `.bak`, then rename the tmp file
    /// into place.
    fn save(&self) -> StorageResult<()> {
        let snapshot = RegistrySnapshot {
            version: CURRENT_REGISTRY_VERSION,
            saved_at: Utc::now(),
            servers: self
                .servers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|(id, record)| (id.as_str().to_string(), record.clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &bytes).map_err(|e| io_err(&tmp_path, e))?;

        if self.path.exists() {
            let bak_path = rotate_bak_path(&self.path);
            fs::copy(&self.path, &bak_path).map_err(|e| io_err(&bak_path, e))?;
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use wings_core::{Limits, StartupConfig, StopConfig};

    fn record() -> ServerRecord {
        ServerRecord {
            config: ServerConfig {
                image: "ghcr.io/pterodactyl/yolks:java_17".to_string(),
                limits: Limits::default(),
                mounts: Vec::new(),
                labels: Map::new(),
                env_vars: Map::new(),
                stop: StopConfig::native(),
                startup: StartupConfig::default(),
            },
            allocation: Allocation::default(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServerRegistry::load(dir.path().join("registry.json")).unwrap();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn upsert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let id = ServerId::new();

        let registry = ServerRegistry::load(&path).unwrap();
        registry.upsert(id.clone(), record()).unwrap();

        let reloaded = ServerRegistry::load(&path).unwrap();
        assert_eq!(reloaded.get(&id).unwrap().config.image, record().config.image);
    }

    #[test]
    fn remove_drops_entry_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let id = ServerId::new();

        let registry = ServerRegistry::load(&path).unwrap();
        registry.upsert(id.clone(), record()).unwrap();
        registry.remove(&id).unwrap();

        let reloaded = ServerRegistry::load(&path).unwrap();
        assert!(reloaded.get(&id).is_none());
    }

    #[test]
    fn second_save_rotates_a_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = ServerRegistry::load(&path).unwrap();

        registry.upsert(ServerId::new(), record()).unwrap();
        registry.upsert(ServerId::new(), record()).unwrap();

        assert!(path.with_extension("bak").exists());
    }

    #[test]
    fn future_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let snapshot = RegistrySnapshot {
            version: CURRENT_REGISTRY_VERSION + 1,
            saved_at: Utc::now(),
            servers: Map::new(),
        };
        fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        assert!(matches!(
            ServerRegistry::load(&path),
            Err(StorageError::UnsupportedVersion { .. })
        ));
    }
}
