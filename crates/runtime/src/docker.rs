// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker Engine API backed [`ContainerRuntime`] (spec.md §4.D).

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{AttachStream, ContainerRuntime};
use crate::spec::{ContainerSpec, InspectResult, PullStatus, ResourceSpec, StatsRecord};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding as BollardPortBinding};
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::time::Duration;

/// Local-marker image prefix (spec.md §6): images beginning with `~` are
/// treated as already present, never pulled.
const LOCAL_IMAGE_MARKER: char = '~';

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect_local() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| RuntimeError::Backend(e.to_string()))?;
        Ok(Self { docker })
    }

    fn is_not_found(err: &bollard::errors::Error) -> bool {
        matches!(err, bollard::errors::Error::DockerResponseServerError { status_code: 404, .. })
    }
}

fn to_container_config(spec: &ContainerSpec) -> (Config<String>, HostConfig) {
    let mut labels = HashMap::new();
    labels.insert(crate::spec::LABEL_SERVICE.to_string(), crate::spec::LABEL_SERVICE_VALUE.to_string());
    labels.insert(crate::spec::LABEL_CONTAINER_TYPE.to_string(), crate::spec::LABEL_CONTAINER_TYPE_VALUE.to_string());

    let mut env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    env.sort();

    let mut exposed_ports = HashMap::new();
    let mut port_bindings: HashMap<String, Option<Vec<BollardPortBinding>>> = HashMap::new();
    for port in &spec.ports {
        let proto = match port.protocol {
            crate::spec::Protocol::Tcp => "tcp",
            crate::spec::Protocol::Udp => "udp",
        };
        let key = format!("{}/{}", port.container_port, proto);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.entry(key).or_default().get_or_insert_with(Vec::new).push(BollardPortBinding {
            host_ip: Some(port.host_ip.clone()),
            host_port: Some(port.host_port.to_string()),
        });
    }

    let mounts: Vec<Mount> = spec
        .mounts
        .iter()
        .map(|m| Mount {
            source: Some(m.source.clone()),
            target: Some(m.target.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    let mut tmpfs = HashMap::new();
    tmpfs.insert(
        "/tmp".to_string(),
        format!("rw,exec,nosuid,size={}M", spec.tmpfs_size_mb),
    );

    let host_config = HostConfig {
        memory: Some(spec.resources.memory_bytes),
        memory_swap: Some(spec.resources.memory_swap_bytes),
        cpu_quota: Some(spec.resources.cpu_quota),
        cpu_period: Some(spec.resources.cpu_period),
        cpu_shares: Some(spec.resources.cpu_shares),
        blkio_weight: Some(spec.resources.io_weight),
        pids_limit: Some(spec.resources.pids_limit),
        cpuset_cpus: if spec.resources.cpuset_cpus.is_empty() { None } else { Some(spec.resources.cpuset_cpus.clone()) },
        oom_kill_disable: Some(spec.resources.oom_kill_disabled),
        port_bindings: Some(port_bindings),
        mounts: Some(mounts),
        tmpfs: Some(tmpfs),
        cap_drop: Some(crate::spec::DROPPED_CAPABILITIES.iter().map(|s| s.to_string()).collect()),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        readonly_rootfs: Some(true),
        dns: Some(spec.dns.clone()),
        network_mode: Some(spec.network_mode.clone()),
        log_config: Some(bollard::models::HostConfigLogConfig {
            typ: Some("local".to_string()),
            config: Some(HashMap::from([
                ("max-size".to_string(), "5m".to_string()),
                ("max-file".to_string(), "1".to_string()),
                ("compress".to_string(), "false".to_string()),
                ("mode".to_string(), "non-blocking".to_string()),
            ])),
        }),
        ..Default::default()
    };

    let config = Config {
        hostname: Some(spec.hostname.clone()),
        image: Some(spec.image.clone()),
        env: Some(env),
        labels: Some(labels),
        exposed_ports: Some(exposed_ports),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        open_stdin: Some(true),
        tty: Some(true),
        host_config: Some(host_config),
        ..Default::default()
    };

    (config, HostConfig::default())
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image_ref: &str) -> RuntimeResult<BoxStream<'static, RuntimeResult<PullStatus>>> {
        if image_ref.starts_with(LOCAL_IMAGE_MARKER) {
            return Ok(futures_util::stream::empty().boxed());
        }
        let options = CreateImageOptions { from_image: image_ref, ..Default::default() };
        let stream = self.docker.create_image(Some(options), None, None).map(|res| {
            res.map(|info| PullStatus { status: info.status.unwrap_or_default(), progress: info.progress })
                .map_err(|e| RuntimeError::ImagePull(e.to_string()))
        });
        Ok(stream.boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<()> {
        let (config, _) = to_container_config(spec);
        let options = CreateContainerOptions { name: spec.id.clone(), platform: None };
        self.docker
            .create_container(Some(options), config)
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::CreateFailed(e.to_string()))
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(|e| RuntimeError::StartFailed(e.to_string()))
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptions { t: timeout.as_secs() as i64 };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if Self::is_not_found(&e) => Ok(()),
            Err(e) => Err(RuntimeError::StopFailed(e.to_string())),
        }
    }

    async fn kill_container(&self, id: &str, signal: &str) -> RuntimeResult<()> {
        let options = KillContainerOptions { signal };
        match self.docker.kill_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if Self::is_not_found(&e) => Ok(()),
            Err(e) => Err(RuntimeError::StopFailed(e.to_string())),
        }
    }

    async fn remove_container(&self, id: &str, force: bool, volumes: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptions { force, v: volumes, ..Default::default() };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if Self::is_not_found(&e) => Ok(()),
            Err(e) => Err(RuntimeError::Backend(e.to_string())),
        }
    }

    async fn wait_not_running(&self, id: &str) -> RuntimeResult<()> {
        use futures_util::TryStreamExt;
        self.docker
            .wait_container::<String>(id, None)
            .try_for_each(|_| futures_util::future::ready(Ok(())))
            .await
            .map_err(|e| RuntimeError::Backend(e.to_string()))
    }

    async fn attach(&self, id: &str) -> RuntimeResult<AttachStream> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let result = self.docker.attach_container(id, Some(options)).await.map_err(|e| RuntimeError::AttachFailed(e.to_string()))?;

        let output = result
            .output
            .map(|item| {
                item.map(|out| match out {
                    LogOutput::StdOut { message } | LogOutput::StdErr { message } | LogOutput::Console { message } => message,
                    LogOutput::StdIn { message } => message,
                })
                .map_err(|e| std::io::Error::other(e.to_string()))
            })
            .boxed();

        Ok(AttachStream { output, stdin: Box::new(result.input) })
    }

    async fn stats_stream(&self, id: &str) -> RuntimeResult<BoxStream<'static, RuntimeResult<StatsRecord>>> {
        let options = StatsOptions { stream: true, one_shot: false };
        let stream = self.docker.stats(id, Some(options)).map(|res| {
            res.map(decode_stats).map_err(|e| RuntimeError::Backend(e.to_string()))
        });
        Ok(stream.boxed())
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<InspectResult> {
        let result = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| if Self::is_not_found(&e) { RuntimeError::NotFound(id.to_string()) } else { RuntimeError::InspectFailed(e.to_string()) })?;

        let state = result.state.unwrap_or_default();
        Ok(InspectResult {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code.unwrap_or(0),
            oom_killed: state.oom_killed.unwrap_or(false),
            log_path: result.log_path,
        })
    }

    async fn read_logs(&self, id: &str, tail_lines: usize) -> RuntimeResult<Vec<String>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail_lines.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut lines = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RuntimeError::Backend(e.to_string()))?;
            lines.push(String::from_utf8_lossy(&chunk.into_bytes()).into_owned());
        }
        Ok(lines)
    }

    async fn update_resources(&self, id: &str, resources: &ResourceSpec) -> RuntimeResult<()> {
        let update = bollard::models::ResourcesUpdateConfig {
            memory: Some(resources.memory_bytes),
            memory_swap: Some(resources.memory_swap_bytes),
            cpu_quota: Some(resources.cpu_quota),
            cpu_period: Some(resources.cpu_period),
            cpu_shares: Some(resources.cpu_shares),
            blkio_weight: Some(resources.io_weight as i32),
            pids_limit: Some(resources.pids_limit),
            ..Default::default()
        };
        self.docker.update_container(id, update).await.map_err(|e| RuntimeError::Backend(e.to_string()))?;
        Ok(())
    }
}

fn decode_stats(stats: bollard::container::Stats) -> StatsRecord {
    let cpu_delta = stats
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(stats.precpu_stats.cpu_usage.total_usage);
    let system_delta = stats
        .cpu_stats
        .system_cpu_usage
        .unwrap_or(0)
        .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or(0));
    let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(1);

    let memory_usage = stats.memory_stats.usage.unwrap_or(0);
    let total_inactive_file = stats.memory_stats.stats.as_ref().and_then(|s| s.total_inactive_file);
    let inactive_file = stats.memory_stats.stats.as_ref().and_then(|s| s.inactive_file);

    let (rx_bytes, tx_bytes) = stats
        .networks
        .map(|nets| {
            nets.values().fold((0u64, 0u64), |(rx, tx), iface| {
                (rx + iface.rx_bytes, tx + iface.tx_bytes)
            })
        })
        .unwrap_or((0, 0));

    StatsRecord { cpu_delta, system_delta, online_cpus, memory_usage, total_inactive_file, inactive_file, rx_bytes, tx_bytes }
}
