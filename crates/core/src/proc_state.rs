// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server process state machine (spec.md §3, §4.E).

use serde::{Deserialize, Serialize};

/// The lifecycle state of a server's container.
///
/// Invariant (spec.md §3): transitions are `offline -> starting -> running
/// -> stopping -> offline`; `starting -> offline` and `running -> stopping
/// -> offline` are the only exit paths. Any detected container exit forces
/// `-> stopping -> offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcState {
    Offline,
    Starting,
    Running,
    Stopping,
}

crate::simple_display! {
    ProcState {
        Offline => "offline",
        Starting => "starting",
        Running => "running",
        Stopping => "stopping",
    }
}

impl Default for ProcState {
    fn default() -> Self {
        ProcState::Offline
    }
}

/// Raised when code attempts a transition the state machine does not allow.
/// Production callers should treat this as a bug: the `Environment` only
/// ever requests transitions its own logic has already validated are legal
/// for the current state (spec.md §4.E).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ProcState,
    pub to: ProcState,
}

impl ProcState {
    /// Returns true if `self -> next` is a legal single-step transition.
    pub fn can_transition_to(self, next: ProcState) -> bool {
        use ProcState::*;
        matches!(
            (self, next),
            (Offline, Starting)
                | (Starting, Running)
                | (Starting, Offline)
                | (Running, Stopping)
                | (Stopping, Offline)
        )
    }

    /// Validate and return the next state, or a [`TransitionError`] if the
    /// move is illegal. Self-transitions (`next == self`) are always
    /// accepted as a no-op, matching spec.md's "only when the value
    /// actually changed" wording for the `StateChange` event.
    pub fn transition(self, next: ProcState) -> Result<ProcState, TransitionError> {
        if next == self || self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcState::*;

    #[test]
    fn legal_happy_path() {
        let mut state = Offline;
        for next in [Starting, Running, Stopping, Offline] {
            state = state.transition(next).unwrap();
        }
        assert_eq!(state, Offline);
    }

    #[test]
    fn starting_can_exit_directly_to_offline() {
        assert_eq!(Starting.transition(Offline), Ok(Offline));
    }

    #[test]
    fn running_cannot_skip_to_offline() {
        assert_eq!(Running.transition(Offline), Err(TransitionError { from: Running, to: Offline }));
    }

    #[test]
    fn self_transition_is_always_a_no_op() {
        for s in [Offline, Starting, Running, Stopping] {
            assert_eq!(s.transition(s), Ok(s));
        }
    }

    #[test]
    fn offline_cannot_jump_to_running() {
        assert!(Offline.transition(Running).is_err());
    }
}
