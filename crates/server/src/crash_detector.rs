// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auto-restart on unexpected exit (spec.md §4.F). Only an exit observed
//! while `procState == running` counts as a crash — an exit during
//! `stopping` is an intentional shutdown and must never trigger a restart.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use wings_core::ProcState;

#[derive(Debug, Clone, Copy)]
pub struct CrashDetectorConfig {
    pub enabled: bool,
    /// Crashes observed within `window` exceeding this count disable
    /// further auto-restart until the operator intervenes.
    pub max_crashes_in_window: u32,
    pub window: Duration,
    /// Minimum spacing between two restart attempts, regardless of the
    /// crash count.
    pub cooldown: Duration,
}

impl Default for CrashDetectorConfig {
    fn default() -> Self {
        Self { enabled: true, max_crashes_in_window: 2, window: Duration::from_secs(60), cooldown: Duration::from_secs(10) }
    }
}

/// Tracks recent crash timestamps for one server. Stateless between
/// restarts is wrong by design: the whole point is remembering how often
/// this server has crashed recently.
pub struct CrashDetector {
    config: CrashDetectorConfig,
    crash_times: Mutex<VecDeque<Instant>>,
    last_restart_attempt: Mutex<Option<Instant>>,
}

impl CrashDetector {
    pub fn new(config: CrashDetectorConfig) -> Self {
        Self { config, crash_times: Mutex::new(VecDeque::new()), last_restart_attempt: Mutex::new(None) }
    }

    /// Call when the container is observed to have exited. `state_at_exit`
    /// is the `procState` value immediately before the exit was noticed.
    /// Returns `true` if the caller should issue a `start()`.
    pub fn should_restart(&self, state_at_exit: ProcState) -> bool {
        if !self.config.enabled || state_at_exit != ProcState::Running {
            return false;
        }

        let now = Instant::now();
        let mut times = self.crash_times.lock();
        while let Some(&front) = times.front() {
            if now.duration_since(front) > self.config.window {
                times.pop_front();
            } else {
                break;
            }
        }
        times.push_back(now);
        if times.len() as u32 > self.config.max_crashes_in_window {
            return false;
        }
        drop(times);

        let mut last = self.last_restart_attempt.lock();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.config.cooldown {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Clears crash history, e.g. after an operator-initiated start.
    pub fn reset(&self) {
        self.crash_times.lock().clear();
        *self.last_restart_attempt.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CrashDetectorConfig {
        CrashDetectorConfig { enabled: true, max_crashes_in_window: 2, window: Duration::from_secs(60), cooldown: Duration::from_millis(0) }
    }

    #[test]
    fn ignores_exit_while_stopping() {
        let detector = CrashDetector::new(config());
        assert!(!detector.should_restart(ProcState::Stopping));
    }

    #[test]
    fn restarts_on_crash_while_running() {
        let detector = CrashDetector::new(config());
        assert!(detector.should_restart(ProcState::Running));
    }

    #[test]
    fn stops_restarting_after_too_many_crashes_in_window() {
        let detector = CrashDetector::new(config());
        assert!(detector.should_restart(ProcState::Running));
        assert!(detector.should_restart(ProcState::Running));
        assert!(!detector.should_restart(ProcState::Running));
    }

    #[test]
    fn disabled_detector_never_restarts() {
        let mut cfg = config();
        cfg.enabled = false;
        let detector = CrashDetector::new(cfg);
        assert!(!detector.should_restart(ProcState::Running));
    }

    #[test]
    fn reset_clears_crash_history() {
        let detector = CrashDetector::new(config());
        detector.should_restart(ProcState::Running);
        detector.should_restart(ProcState::Running);
        detector.reset();
        assert!(detector.should_restart(ProcState::Running));
    }
}
