// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-adjacent shapes passed to and read from [`crate::ContainerRuntime`]
//! (spec.md §4.D, §6).

use std::collections::BTreeMap;

/// Capabilities dropped on every server container (spec.md §6).
pub const DROPPED_CAPABILITIES: &[&str] = &[
    "SETPCAP",
    "MKNOD",
    "AUDIT_WRITE",
    "NET_RAW",
    "DAC_OVERRIDE",
    "FOWNER",
    "FSETID",
    "NET_BIND_SERVICE",
    "SYS_CHROOT",
    "SETFCAP",
];

pub const LABEL_SERVICE: &str = "Service";
pub const LABEL_SERVICE_VALUE: &str = "Pterodactyl";
pub const LABEL_CONTAINER_TYPE: &str = "ContainerType";
pub const LABEL_CONTAINER_TYPE_VALUE: &str = "server_process";

#[derive(Debug, Clone)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone)]
pub struct BindMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub memory_bytes: i64,
    pub memory_swap_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub cpu_shares: i64,
    pub io_weight: u16,
    pub pids_limit: i64,
    pub cpuset_cpus: String,
    pub oom_kill_disabled: bool,
}

/// Everything `createContainer` needs to reproduce the wire constants in
/// spec.md §6: fixed labels, dropped capabilities, `no-new-privileges`,
/// read-only rootfs, the `local` log driver, and a sized `/tmp` tmpfs.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub id: String,
    pub image: String,
    pub hostname: String,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub mounts: Vec<BindMount>,
    pub tmpfs_size_mb: u64,
    pub resources: ResourceSpec,
    pub network_mode: String,
    pub dns: Vec<String>,
}

/// Decoded container runtime stats tick, ahead of the CPU/memory derivation
/// `Environment` performs in spec.md §4.E.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsRecord {
    pub cpu_delta: u64,
    pub system_delta: u64,
    pub online_cpus: u32,
    pub memory_usage: u64,
    pub total_inactive_file: Option<u64>,
    pub inactive_file: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct InspectResult {
    pub running: bool,
    pub exit_code: i64,
    pub oom_killed: bool,
    pub log_path: Option<String>,
}

/// Streamed image-pull progress.
#[derive(Debug, Clone)]
pub struct PullStatus {
    pub status: String,
    pub progress: Option<String>,
}
