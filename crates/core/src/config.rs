// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-server mutable configuration (spec.md §3).

use crate::Limits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a graceful stop is issued (spec.md §3's `stop` descriptor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StopAction {
    /// Write `value\n` to the attached stdin.
    Command(String),
    /// Send the named signal directly (`kill`, no graceful window).
    Signal(String),
    /// Use the runtime's native stop primitive with a grace period.
    Stop,
}

impl Default for StopAction {
    fn default() -> Self {
        StopAction::Signal("SIGTERM".to_string())
    }
}

/// Wraps [`StopAction`] so config documents can carry it under a named
/// field without every caller re-deriving the enum's serde shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopConfig {
    #[serde(flatten)]
    pub action: StopAction,
}

impl StopConfig {
    pub fn command(value: impl Into<String>) -> Self {
        Self { action: StopAction::Command(value.into()) }
    }

    pub fn signal(value: impl Into<String>) -> Self {
        Self { action: StopAction::Signal(value.into()) }
    }

    pub fn native() -> Self {
        Self { action: StopAction::Stop }
    }
}

/// Startup detection: console lines are matched against `done` until one
/// hits, at which point the server transitions `starting -> running`
/// (spec.md §4.E).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartupConfig {
    /// The raw command template the image's entrypoint script invokes to
    /// launch the server process (read back as the `STARTUP` env var,
    /// spec.md §6); not itself parsed or executed by the daemon.
    #[serde(default)]
    pub invocation: String,
    pub done: Vec<String>,
    #[serde(default)]
    pub strip_ansi: bool,
}

impl StartupConfig {
    /// Strip ANSI SGR/cursor escape sequences if configured, then test the
    /// line against every `done` pattern. A pattern matches if it appears
    /// anywhere in the (possibly stripped) line — spec.md describes these as
    /// substring "match patterns", not regexes.
    pub fn matches(&self, line: &str) -> bool {
        let candidate = if self.strip_ansi { strip_ansi(line) } else { line.to_string() };
        self.done.iter().any(|pattern| candidate.contains(pattern.as_str()))
    }
}

/// Minimal ANSI CSI-sequence stripper (`ESC [ ... <final byte>`), sufficient
/// for the SGR color codes game server launchers emit around their ready
/// banner.
fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Mutable per-server configuration (spec.md §3's `config` field).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub image: String,
    pub limits: Limits,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    pub stop: StopConfig,
    pub startup: StartupConfig,
}

/// A bind mount from the host into the container (extra mounts beyond the
/// server's own data directory, spec.md §4.D `createContainer`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountConfig {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_matches_plain_substring() {
        let cfg = StartupConfig { invocation: String::new(), done: vec!["Done (".to_string()], strip_ansi: false };
        assert!(cfg.matches("[12:00:00] Done (3.241s)!"));
        assert!(!cfg.matches("still loading"));
    }

    #[test]
    fn startup_strips_ansi_before_matching() {
        let cfg = StartupConfig { invocation: String::new(), done: vec!["Done (".to_string()], strip_ansi: true };
        let colored = "\u{1b}[32mDone (\u{1b}[0m3.2s)!";
        assert!(cfg.matches(colored));
    }

    #[test]
    fn startup_without_strip_fails_on_embedded_escapes() {
        let cfg = StartupConfig { invocation: String::new(), done: vec!["Done (3.2s)".to_string()], strip_ansi: false };
        let colored = "\u{1b}[32mDone (\u{1b}[0m3.2s)!";
        assert!(!cfg.matches(colored));
    }

    #[test]
    fn stop_action_defaults_to_sigterm() {
        assert_eq!(StopAction::default(), StopAction::Signal("SIGTERM".to_string()));
    }

    #[test]
    fn stop_config_constructors() {
        assert_eq!(StopConfig::command("stop").action, StopAction::Command("stop".to_string()));
        assert_eq!(StopConfig::native().action, StopAction::Stop);
    }
}
