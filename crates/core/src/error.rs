// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared error-reporting shapes (spec.md §7).
//!
//! Each crate defines its own `thiserror` error enum for its boundary
//! (`SandboxError`, `RuntimeError`, `EnvironmentError`, ...). This module
//! only holds the cross-cutting correlation/redaction wrapper the websocket
//! layer applies before a message reaches a client.

use std::fmt;
use uuid::Uuid;

/// Coarse classification used only for the handful of places that need to
/// branch on "is this benign" without matching every concrete error enum
/// (e.g. whether to log at `warn` vs `error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    PathResolution,
    Quota,
    NotFound,
    Timeout,
    Throttle,
    Authorization,
    Cancelled,
    Fatal,
}

/// Wraps any displayable error with a correlation UUID, per spec.md §7:
/// "Every such error generates a UUID for correlation."
///
/// `Display` yields the redacted form (`message` only); [`CorrelatedError::full`]
/// yields `message (id=<uuid>): <source>` for callers whose token carries
/// `admin.websocket.errors`.
#[derive(Debug, Clone)]
pub struct CorrelatedError {
    pub id: Uuid,
    pub kind: ErrorKind,
    message: String,
    detail: String,
}

impl CorrelatedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self { id: Uuid::new_v4(), kind, message: message.into(), detail: detail.to_string() }
    }

    /// The message a client without elevated permissions should see.
    pub fn redacted(&self) -> String {
        format!("{} (id={})", self.message, self.id)
    }

    /// The message a client with `admin.websocket.errors` should see.
    pub fn full(&self) -> String {
        format!("{} (id={}): {}", self.message, self.id, self.detail)
    }

    pub fn message_for(&self, admin: bool) -> String {
        if admin {
            self.full()
        } else {
            self.redacted()
        }
    }
}

impl fmt::Display for CorrelatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_hides_detail() {
        let err = CorrelatedError::new(ErrorKind::Validation, "bad input", "field 'port' out of range");
        let redacted = err.redacted();
        assert!(!redacted.contains("port"));
        assert!(redacted.contains(&err.id.to_string()));
    }

    #[test]
    fn full_includes_detail_and_same_id() {
        let err = CorrelatedError::new(ErrorKind::Validation, "bad input", "field 'port' out of range");
        let full = err.full();
        assert!(full.contains("port"));
        assert!(full.contains(&err.id.to_string()));
    }

    #[test]
    fn message_for_switches_on_admin_flag() {
        let err = CorrelatedError::new(ErrorKind::Quota, "disk full", "used=900 limit=1024");
        assert_eq!(err.message_for(false), err.redacted());
        assert_eq!(err.message_for(true), err.full());
    }
}
