// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource limits and network allocation (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-server resource limits. Negative values carry the meanings spec.md
/// spells out per field (`swapMiB == -1` unlimited, `cpuPercent == 0`
/// unlimited, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub memory_mib: i64,
    pub swap_mib: i64,
    pub cpu_percent: u32,
    pub io_weight: u16,
    pub disk_mib: i64,
    #[serde(default)]
    pub cpu_pinning: String,
    #[serde(default)]
    pub oom_kill_disabled: bool,
    pub pid_limit: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_mib: 0,
            swap_mib: 0,
            cpu_percent: 0,
            io_weight: 500,
            disk_mib: 0,
            cpu_pinning: String::new(),
            oom_kill_disabled: false,
            pid_limit: 0,
        }
    }
}

/// Overhead multiplier applied to `memoryMiB` to derive the hard runtime
/// ceiling (spec.md §3). Larger reservations get a smaller overhead because
/// the absolute headroom a JVM/game-engine heap needs does not scale
/// linearly with reservation size.
fn overhead_multiplier(memory_mib: i64) -> f64 {
    if memory_mib <= 2048 {
        1.15
    } else if memory_mib <= 4096 {
        1.10
    } else {
        1.05
    }
}

/// Derive the **hard** memory ceiling passed to the container runtime.
///
/// `memoryMiB == 0` means unlimited reservation, so the bounded limit is
/// also `0` (no cap at the runtime level) — spec.md §8 boundary behavior.
pub fn bounded_memory_bytes(memory_mib: i64) -> i64 {
    if memory_mib <= 0 {
        return 0;
    }
    (memory_mib as f64 * overhead_multiplier(memory_mib) * 1_000_000.0) as i64
}

/// Total swap ceiling (memory + swap) passed to the runtime.
///
/// `swap_mib == -1` means unlimited swap (spec.md §8); any non-negative
/// value is added on top of the bounded memory limit.
pub fn swap_total_bytes(memory_mib: i64, swap_mib: i64) -> i64 {
    if swap_mib < 0 {
        return -1;
    }
    swap_mib * 1_000_000 + bounded_memory_bytes(memory_mib)
}

/// Network allocation: a default `ip:port` plus any additional mappings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub default_ip: String,
    pub default_port: u16,
    /// ip -> ports, each exported as both TCP and UDP bindings.
    #[serde(default)]
    pub mappings: BTreeMap<String, Vec<u32>>,
}

impl Allocation {
    /// All valid `(ip, port)` pairs the runtime should bind, including the
    /// default. Port `0` and `65536` are silently dropped (spec.md §8).
    pub fn bindings(&self) -> Vec<(String, u16)> {
        let mut out = Vec::new();
        if (1..=65535).contains(&(self.default_port as u32)) {
            out.push((self.default_ip.clone(), self.default_port));
        }
        for (ip, ports) in &self.mappings {
            for &port in ports {
                if (1..=65535).contains(&port) {
                    out.push((ip.clone(), port as u16));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_zero_is_unbounded() {
        assert_eq!(bounded_memory_bytes(0), 0);
    }

    #[test]
    fn small_reservation_gets_largest_overhead() {
        assert_eq!(bounded_memory_bytes(1024), (1024.0 * 1.15 * 1_000_000.0) as i64);
    }

    #[test]
    fn mid_reservation_gets_mid_overhead() {
        assert_eq!(bounded_memory_bytes(3000), (3000.0 * 1.10 * 1_000_000.0) as i64);
    }

    #[test]
    fn large_reservation_gets_smallest_overhead() {
        assert_eq!(bounded_memory_bytes(8192), (8192.0 * 1.05 * 1_000_000.0) as i64);
    }

    #[test]
    fn swap_unlimited_passthrough() {
        assert_eq!(swap_total_bytes(1024, -1), -1);
    }

    #[test]
    fn swap_adds_to_bounded_memory() {
        let expected = 512 * 1_000_000 + bounded_memory_bytes(1024);
        assert_eq!(swap_total_bytes(1024, 512), expected);
    }

    #[test]
    fn bindings_drop_port_zero_and_65536() {
        let mut mappings = BTreeMap::new();
        mappings.insert("10.0.0.5".to_string(), vec![0, 25565, 65536]);
        let alloc = Allocation { default_ip: "10.0.0.5".into(), default_port: 25565, mappings };
        let bindings = alloc.bindings();
        assert_eq!(bindings.iter().filter(|(_, p)| *p == 25565).count(), 2);
        assert!(bindings.iter().all(|(_, p)| *p != 0));
    }

    #[test]
    fn default_port_zero_is_dropped_from_bindings() {
        let alloc = Allocation { default_ip: "10.0.0.5".into(), default_port: 0, mappings: BTreeMap::new() };
        assert!(alloc.bindings().is_empty());
    }
}
