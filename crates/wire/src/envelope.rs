// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The websocket wire format: `{event: string, args: [string]}` (spec.md §6).

use serde::{Deserialize, Serialize};

/// Raw frame as it crosses the wire, before it is parsed into an
/// [`crate::Inbound`] or produced from an [`crate::Outbound`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsEnvelope {
    pub event: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl WsEnvelope {
    pub fn new(event: impl Into<String>, args: Vec<String>) -> Self {
        Self { event: event.into(), args }
    }

    pub fn no_args(event: impl Into<String>) -> Self {
        Self::new(event, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let env = WsEnvelope::new("status", vec!["running".to_string()]);
        let json = serde_json::to_string(&env).unwrap();
        let back: WsEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn args_defaults_to_empty_when_omitted() {
        let env: WsEnvelope = serde_json::from_str(r#"{"event":"send-stats"}"#).unwrap();
        assert_eq!(env.args, Vec::<String>::new());
    }
}
