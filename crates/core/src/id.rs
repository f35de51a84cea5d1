// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server identifiers.
//!
//! A `ServerId` is the opaque stable identifier the panel uses to name a
//! server (spec.md §3). Backed by a UUID, but stored as a `SmolStr` so
//! copies stay cheap in hot paths (event fan-out, HashMap keys) without an
//! allocation for the common case.

use smol_str::SmolStr;
use std::fmt;
use uuid::Uuid;

/// Opaque, stable identifier for a server. 1:1 with a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ServerId(SmolStr);

impl ServerId {
    /// Generate a new random server id.
    pub fn new() -> Self {
        Self(SmolStr::new(Uuid::new_v4().to_string()))
    }

    /// Wrap an existing id string (panel-assigned or loaded from disk).
    pub fn from_string(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// First 8 characters, for log lines and container name suffixes.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for ServerId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl std::borrow::Borrow<str> for ServerId {
    fn borrow(&self) -> &str {
        self.0.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string() {
        let id = ServerId::new();
        let parsed = ServerId::from_string(id.as_str());
        assert_eq!(id, parsed);
    }

    #[test]
    fn short_never_panics_on_tiny_ids() {
        let id = ServerId::from_string("ab");
        assert_eq!(id.short(), "ab");
    }

    #[test]
    fn display_matches_as_str() {
        let id = ServerId::from_string("srv-1234");
        assert_eq!(id.to_string(), id.as_str());
    }
}
