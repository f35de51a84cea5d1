// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Last-known resource telemetry snapshot (spec.md §3, §4.E).

use serde::{Deserialize, Serialize};

/// Point-in-time resource telemetry for a server's container, as decoded
/// from a runtime stats record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    pub cpu_absolute: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub uptime_ms: u64,
}

impl ResourceSnapshot {
    /// Absolute CPU percentage from the two runtime-reported deltas, per
    /// spec.md §4.E: `(cpuDelta/systemDelta) * onlineCpus * 100`, rounded to
    /// 3 decimals, clamped to 0 when either delta is non-positive.
    pub fn cpu_absolute_from_deltas(cpu_delta: u64, system_delta: u64, online_cpus: u32) -> f64 {
        if cpu_delta == 0 || system_delta == 0 {
            return 0.0;
        }
        let raw = (cpu_delta as f64 / system_delta as f64) * online_cpus as f64 * 100.0;
        (raw * 1000.0).round() / 1000.0
    }

    /// Working-set memory per spec.md §4.E: `usage - total_inactive_file`,
    /// falling back to `usage - inactive_file` when the cgroup does not
    /// report the aggregate field.
    pub fn memory_from_usage(usage: u64, total_inactive_file: Option<u64>, inactive_file: Option<u64>) -> u64 {
        let inactive = total_inactive_file.or(inactive_file).unwrap_or(0);
        usage.saturating_sub(inactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_absolute_clamps_on_nonpositive_delta() {
        assert_eq!(ResourceSnapshot::cpu_absolute_from_deltas(0, 1000, 4), 0.0);
        assert_eq!(ResourceSnapshot::cpu_absolute_from_deltas(100, 0, 4), 0.0);
    }

    #[test]
    fn cpu_absolute_rounds_to_three_decimals() {
        let pct = ResourceSnapshot::cpu_absolute_from_deltas(1, 3, 1);
        assert_eq!(pct, 33.333);
    }

    #[test]
    fn memory_prefers_total_inactive_file() {
        assert_eq!(ResourceSnapshot::memory_from_usage(1000, Some(200), Some(999)), 800);
    }

    #[test]
    fn memory_falls_back_to_inactive_file() {
        assert_eq!(ResourceSnapshot::memory_from_usage(1000, None, Some(300)), 700);
    }

    #[test]
    fn memory_saturates_instead_of_underflow() {
        assert_eq!(ResourceSnapshot::memory_from_usage(100, Some(500), None), 0);
    }
}
