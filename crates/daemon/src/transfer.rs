// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server transfer between nodes (spec.md §4.H). This module owns archive
//! creation, checksum verification, throttled progress publication, and
//! the atomic on-disk swap; the actual network exchange of the archive
//! bytes is [`TransferTransport`], an out-of-scope seam the same way
//! [`crate::token::TokenVerifier`] is.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wings_core::{Event, EventBus};
use wings_runtime::ContainerRuntime;
use wings_sandbox::{Archiver, CreateOptions, Progress};
use wings_server::{PowerAction, Server};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Sandbox(#[from] wings_sandbox::SandboxError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },
    #[error("transfer was cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Sends an already-built archive to a peer node. Out of scope here: the
/// actual HTTP POST, retry policy, and destination authentication.
#[async_trait::async_trait]
pub trait TransferTransport: Send + Sync + 'static {
    async fn send_archive(&self, dest_url: &str, dest_token: &str, archive_path: &Path, checksum: &str) -> Result<(), TransferError>;
}

/// Orchestrates one outgoing or incoming transfer for a single server.
pub struct TransferCoordinator<R: ContainerRuntime, T: TransferTransport> {
    server: Arc<Server<R>>,
    bus: EventBus,
    transport: Arc<T>,
}

/// How often transfer progress is republished on the bus, regardless of
/// how fast the archiver's progress channel fills (spec.md §4.H).
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
/// How long the outgoing transfer waits for the server to reach `Offline`
/// before proceeding anyway; a "not found" or already-offline state is not
/// an error.
const PRE_STOP_GRACE: Duration = Duration::from_secs(60);

impl<R: ContainerRuntime, T: TransferTransport> TransferCoordinator<R, T> {
    pub fn new(server: Arc<Server<R>>, bus: EventBus, transport: Arc<T>) -> Self {
        Self { server, bus, transport }
    }

    fn topic(&self, suffix: &str) -> String {
        format!("transfer logs:{suffix}")
    }

    fn publish_log(&self, suffix: &str, line: impl Into<String>) {
        self.bus.publish(self.topic(suffix), Event::TransferLogs { suffix: suffix.to_string(), line: line.into() });
    }

    fn publish_status(&self, suffix: &str, successful: bool) {
        self.bus.publish(format!("transfer status:{suffix}"), Event::TransferStatus { suffix: suffix.to_string(), successful });
    }

    /// Archives the server's sandbox, computes its checksum, and hands it
    /// to `transport`. Never publishes a success status: only the
    /// destination node (after it has verified the checksum and extracted)
    /// is authoritative about whether the transfer actually succeeded.
    pub async fn send(
        &self,
        transfer_id: &str,
        dest_url: &str,
        dest_token: &str,
        work_dir: &Path,
        cancel: CancellationToken,
    ) -> Result<(), TransferError> {
        self.server.set_transferring(true);
        let outcome = self.send_inner(transfer_id, dest_url, dest_token, work_dir, &cancel).await;
        self.server.set_transferring(false);
        if let Err(err) = &outcome {
            self.publish_log(transfer_id, format!("transfer failed: {err}"));
            self.publish_status(transfer_id, false);
        }
        outcome
    }

    async fn send_inner(
        &self,
        transfer_id: &str,
        dest_url: &str,
        dest_token: &str,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        self.publish_log(transfer_id, "stopping server before transfer");
        let _ = tokio::time::timeout(PRE_STOP_GRACE, self.server.power_action(PowerAction::Stop)).await;

        std::fs::create_dir_all(work_dir)?;
        let archive_path = work_dir.join(format!("{transfer_id}.tar.gz"));

        self.publish_log(transfer_id, "building archive");
        let (progress_tx, mut progress_rx) = mpsc::channel::<Progress>(16);
        let bus = self.bus.clone();
        let topic = format!("transfer logs:{transfer_id}");
        let suffix = transfer_id.to_string();
        let progress_task = tokio::spawn(async move {
            let mut last = std::time::Instant::now() - PROGRESS_INTERVAL;
            while let Some(progress) = progress_rx.recv().await {
                if last.elapsed() < PROGRESS_INTERVAL {
                    continue;
                }
                last = std::time::Instant::now();
                let pct = if progress.total > 0 { progress.written * 100 / progress.total } else { 0 };
                bus.publish(topic.clone(), Event::TransferLogs { suffix: suffix.clone(), line: format!("{pct}% ({} / {} bytes)", progress.written, progress.total) });
            }
        });

        let create_result = tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = Archiver::create(self.server.sandbox(), "", CreateOptions::default(), &archive_path, Some(progress_tx)) => result.map_err(TransferError::from),
        };
        progress_task.abort();
        create_result?;

        self.publish_log(transfer_id, "computing checksum");
        let checksum = checksum_file(&archive_path).await?;

        self.publish_log(transfer_id, "sending archive to destination node");
        self.transport.send_archive(dest_url, dest_token, &archive_path, &checksum).await?;

        info!(transfer_id, "archive handed off to destination; awaiting its own status report");
        Ok(())
    }

    /// Verifies `archive_path` against `declared_checksum`, preflights disk
    /// space, extracts into a staging directory, and atomically swaps it in
    /// place of the server's sandbox root.
    pub async fn receive(&self, transfer_id: &str, archive_path: &Path, declared_checksum: &str) -> Result<(), TransferError> {
        let outcome = self.receive_inner(transfer_id, archive_path, declared_checksum).await;
        self.publish_status(transfer_id, outcome.is_ok());
        if let Err(err) = &outcome {
            self.publish_log(transfer_id, format!("transfer failed: {err}"));
        }
        outcome
    }

    async fn receive_inner(&self, transfer_id: &str, archive_path: &Path, declared_checksum: &str) -> Result<(), TransferError> {
        self.publish_log(transfer_id, "verifying checksum");
        let computed = checksum_file(archive_path).await?;
        if !computed.eq_ignore_ascii_case(declared_checksum) {
            return Err(TransferError::ChecksumMismatch { expected: declared_checksum.to_string(), computed });
        }

        Archiver::preflight_extract_size(self.server.sandbox(), archive_path).await?;

        let root = self.server.sandbox().root().to_path_buf();
        let staging = root.with_file_name(format!("{}-{transfer_id}-staging", root.file_name().and_then(|n| n.to_str()).unwrap_or("server")));
        std::fs::create_dir_all(&staging)?;
        let staging_sandbox = wings_sandbox::SandboxFs::new(staging.clone(), wings_sandbox::QuotaLimit::unlimited(), wings_sandbox::Denylist::empty(), None);

        self.publish_log(transfer_id, "extracting archive");
        Archiver::extract(&staging_sandbox, archive_path, "").await?;

        self.publish_log(transfer_id, "swapping in extracted data");
        atomic_swap(&staging, &root)?;
        let _ = std::fs::remove_dir_all(&staging);

        self.publish_log(transfer_id, "transfer complete");
        Ok(())
    }
}

fn atomic_swap(staging: &Path, root: &Path) -> std::io::Result<()> {
    if root.exists() {
        let backup = root.with_extension("pre-transfer");
        let _ = std::fs::remove_dir_all(&backup);
        std::fs::rename(root, &backup)?;
    }
    std::fs::rename(staging, root)
}

async fn checksum_file(path: &Path) -> Result<String, TransferError> {
    let path = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        use std::io::Read;
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| TransferError::Io(std::io::Error::other(e.to_string())))??;
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wings_core::{Allocation, Limits, ServerConfig, ServerId, StartupConfig, StopConfig};
    use wings_runtime::FakeRuntime;
    use wings_sandbox::{Denylist, QuotaLimit, SandboxFs};

    struct RecordingTransport {
        sent: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl TransferTransport for RecordingTransport {
        async fn send_archive(&self, dest_url: &str, _dest_token: &str, _archive_path: &Path, checksum: &str) -> Result<(), TransferError> {
            self.sent.lock().push(format!("{dest_url}:{checksum}"));
            Ok(())
        }
    }

    fn server(dir: &Path) -> Arc<Server<FakeRuntime>> {
        let sandbox = SandboxFs::new(dir.to_path_buf(), QuotaLimit::unlimited(), Denylist::empty(), None);
        let config = ServerConfig {
            image: "~local/test".to_string(),
            limits: Limits::default(),
            mounts: Vec::new(),
            labels: Default::default(),
            env_vars: Default::default(),
            stop: StopConfig::signal("SIGTERM"),
            startup: StartupConfig { invocation: String::new(), done: vec!["Done".to_string()], strip_ansi: false },
        };
        Arc::new(Server::new(ServerId::from_string("srv-1"), Arc::new(FakeRuntime::new()), EventBus::new(), sandbox, config, Allocation::default()))
    }

    #[tokio::test]
    async fn send_hands_off_archive_and_never_reports_success() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("world.dat"), b"hello").unwrap();
        let server = server(src_dir.path());
        let bus = EventBus::new();
        let transport = Arc::new(RecordingTransport { sent: parking_lot::Mutex::new(Vec::new()) });
        let coordinator = TransferCoordinator::new(server.clone(), bus.clone(), transport.clone());

        let work_dir = tempfile::tempdir().unwrap();
        let mut status_sub = bus.subscribe(["transfer status"]);
        coordinator.send("t1", "https://peer.example/transfer", "tok", work_dir.path(), CancellationToken::new()).await.unwrap();

        assert_eq!(transport.sent.lock().len(), 1);
        let nothing_received = tokio::time::timeout(Duration::from_millis(50), status_sub.recv()).await.is_err();
        assert!(nothing_received);
        assert!(!server.sandbox().disk_used_bytes().is_negative());
    }

    #[tokio::test]
    async fn receive_rejects_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("in.tar.gz");
        std::fs::write(&archive_path, b"not actually a tarball").unwrap();
        let server = server(dir.path());
        let bus = EventBus::new();
        let transport = Arc::new(RecordingTransport { sent: parking_lot::Mutex::new(Vec::new()) });
        let coordinator = TransferCoordinator::new(server, bus, transport);

        let result = coordinator.receive("t2", &archive_path, "deadbeef").await;
        assert!(matches!(result, Err(TransferError::ChecksumMismatch { .. })));
    }
}
