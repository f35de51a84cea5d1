// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound websocket events a [`WebsocketHandler`] accepts (spec.md §4.G):
//! `authenticate, set-state, send-command, send-stats, send-logs`.
//!
//! [`WebsocketHandler`]: https://docs.rs/wings-daemon (see `wings_daemon::websocket`)

use crate::WsEnvelope;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four power actions a `set-state` frame may request. `Terminate` and
/// `Kill` both map to the forced-stop path (`Environment::terminate`); they
/// are kept distinct here because the HTTP power route (spec.md §6)
/// exposes both names and a client may send either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerActionKind {
    Start,
    Stop,
    Restart,
    Terminate,
    Kill,
}

impl PowerActionKind {
    /// Permission string required to issue this action (spec.md §4.G).
    pub fn required_permission(self) -> &'static str {
        match self {
            PowerActionKind::Start => "control.start",
            PowerActionKind::Stop => "control.stop",
            PowerActionKind::Restart => "control.restart",
            PowerActionKind::Terminate | PowerActionKind::Kill => "control.stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Authenticate { token: String },
    SetState { action: PowerActionKind },
    SendCommand { command: String },
    SendStats,
    SendLogs,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
    #[error("{event} requires an argument")]
    MissingArg { event: &'static str },
    #[error("{event} received an unrecognized action {arg:?}")]
    BadAction { event: &'static str, arg: String },
}

impl Inbound {
    pub fn parse(envelope: &WsEnvelope) -> Result<Self, ParseError> {
        match envelope.event.as_str() {
            "authenticate" => {
                let token = envelope
                    .args
                    .first()
                    .cloned()
                    .ok_or(ParseError::MissingArg { event: "authenticate" })?;
                Ok(Inbound::Authenticate { token })
            }
            "set-state" => {
                let arg = envelope
                    .args
                    .first()
                    .ok_or(ParseError::MissingArg { event: "set-state" })?;
                let action = match arg.as_str() {
                    "start" => PowerActionKind::Start,
                    "stop" => PowerActionKind::Stop,
                    "restart" => PowerActionKind::Restart,
                    "terminate" => PowerActionKind::Terminate,
                    "kill" => PowerActionKind::Kill,
                    other => {
                        return Err(ParseError::BadAction { event: "set-state", arg: other.to_string() })
                    }
                };
                Ok(Inbound::SetState { action })
            }
            "send-command" => {
                let command = envelope
                    .args
                    .first()
                    .cloned()
                    .ok_or(ParseError::MissingArg { event: "send-command" })?;
                Ok(Inbound::SendCommand { command })
            }
            "send-stats" => Ok(Inbound::SendStats),
            "send-logs" => Ok(Inbound::SendLogs),
            other => Err(ParseError::UnknownEvent(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_authenticate() {
        let env = WsEnvelope::new("authenticate", vec!["tok".to_string()]);
        assert_eq!(Inbound::parse(&env).unwrap(), Inbound::Authenticate { token: "tok".to_string() });
    }

    #[test]
    fn parses_set_state_restart() {
        let env = WsEnvelope::new("set-state", vec!["restart".to_string()]);
        assert_eq!(
            Inbound::parse(&env).unwrap(),
            Inbound::SetState { action: PowerActionKind::Restart }
        );
    }

    #[test]
    fn rejects_unknown_action() {
        let env = WsEnvelope::new("set-state", vec!["reboot".to_string()]);
        assert!(matches!(Inbound::parse(&env), Err(ParseError::BadAction { .. })));
    }

    #[test]
    fn rejects_unknown_event() {
        let env = WsEnvelope::no_args("dance");
        assert!(matches!(Inbound::parse(&env), Err(ParseError::UnknownEvent(_))));
    }

    #[test]
    fn send_stats_and_send_logs_take_no_args() {
        assert_eq!(Inbound::parse(&WsEnvelope::no_args("send-stats")).unwrap(), Inbound::SendStats);
        assert_eq!(Inbound::parse(&WsEnvelope::no_args("send-logs")).unwrap(), Inbound::SendLogs);
    }
}
