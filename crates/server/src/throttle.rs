// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling-window console output throttle (spec.md §4.F): a server that
//! floods its console is warned, then force-stopped if it keeps flooding.
//! The violation count resets whenever the server re-enters `starting`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub lines_per_interval: u32,
    pub bytes_per_interval: u64,
    pub interval: Duration,
    /// Number of intervals the server is allowed to exceed the limits
    /// before `observe` returns [`ThrottleAction::ForceStop`].
    pub warnings_before_stop: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            lines_per_interval: 2000,
            bytes_per_interval: 512 * 1024,
            interval: Duration::from_secs(10),
            warnings_before_stop: 3,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ThrottleAction {
    Ok,
    Warn(u32),
    ForceStop,
}

struct Window {
    started_at: Instant,
    lines: u32,
    bytes: u64,
}

impl Window {
    fn fresh() -> Self {
        Self { started_at: Instant::now(), lines: 0, bytes: 0 }
    }
}

/// One instance per [`crate::Environment`]. Cheap to hold across restarts;
/// call [`ConsoleThrottle::reset`] on every `starting` transition.
pub struct ConsoleThrottle {
    config: ThrottleConfig,
    window: Mutex<Window>,
    violations: AtomicU32,
}

impl ConsoleThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config, window: Mutex::new(Window::fresh()), violations: AtomicU32::new(0) }
    }

    /// Feed one console line. The window rolls over once `interval` has
    /// elapsed since it was last reset; exceeding either limit inside a
    /// single window counts as one violation, not one per line.
    pub fn observe(&self, line: &str) -> ThrottleAction {
        let mut window = self.window.lock();
        if window.started_at.elapsed() >= self.config.interval {
            *window = Window::fresh();
        }
        window.lines += 1;
        window.bytes += line.len() as u64;

        if window.lines > self.config.lines_per_interval || window.bytes > self.config.bytes_per_interval {
            *window = Window::fresh();
            let count = self.violations.fetch_add(1, Ordering::AcqRel) + 1;
            if count >= self.config.warnings_before_stop {
                ThrottleAction::ForceStop
            } else {
                ThrottleAction::Warn(count)
            }
        } else {
            ThrottleAction::Ok
        }
    }

    pub fn reset(&self) {
        self.violations.store(0, Ordering::Release);
        *self.window.lock() = Window::fresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig { lines_per_interval: 2, bytes_per_interval: 1024, interval: Duration::from_secs(60), warnings_before_stop: 2 }
    }

    #[test]
    fn stays_ok_under_the_line_limit() {
        let throttle = ConsoleThrottle::new(config());
        assert_eq!(throttle.observe("a"), ThrottleAction::Ok);
        assert_eq!(throttle.observe("b"), ThrottleAction::Ok);
    }

    #[test]
    fn warns_then_force_stops_on_repeated_violation() {
        let throttle = ConsoleThrottle::new(config());
        throttle.observe("a");
        throttle.observe("b");
        assert_eq!(throttle.observe("c"), ThrottleAction::Warn(1));
        throttle.observe("a");
        throttle.observe("b");
        assert_eq!(throttle.observe("c"), ThrottleAction::ForceStop);
    }

    #[test]
    fn reset_clears_violation_count() {
        let throttle = ConsoleThrottle::new(config());
        throttle.observe("a");
        throttle.observe("b");
        throttle.observe("c");
        throttle.reset();
        throttle.observe("a");
        throttle.observe("b");
        assert_eq!(throttle.observe("c"), ThrottleAction::Warn(1));
    }

    #[test]
    fn byte_limit_triggers_independently_of_line_count() {
        let throttle = ConsoleThrottle::new(config());
        let long_line = "x".repeat(2000);
        assert_eq!(throttle.observe(&long_line), ThrottleAction::Warn(1));
    }
}
