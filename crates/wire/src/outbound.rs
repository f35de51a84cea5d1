// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound websocket events (spec.md §6): the full event-name list
//! alongside [`wings_core::Event`], which only covers the subset produced
//! by the bus. The handshake/authorization frames (`auth success`,
//! `jwt error`, `token expiring`, `token expired`, `error`) are connection
//! lifecycle signals the [`WebsocketHandler`] itself originates, not bus
//! events.
//!
//! [`WebsocketHandler`]: https://docs.rs/wings-daemon (see `wings_daemon::websocket`)

use crate::WsEnvelope;
use wings_core::Event;

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    AuthSuccess,
    JwtError(String),
    TokenExpiring,
    TokenExpired,
    Error { message: String, id: String },
    Bus(Event),
}

impl From<Event> for Outbound {
    fn from(event: Event) -> Self {
        Outbound::Bus(event)
    }
}

impl Outbound {
    pub fn to_envelope(&self) -> WsEnvelope {
        match self {
            Outbound::AuthSuccess => WsEnvelope::no_args("auth success"),
            Outbound::JwtError(msg) => WsEnvelope::new("jwt error", vec![msg.clone()]),
            Outbound::TokenExpiring => WsEnvelope::no_args("token expiring"),
            Outbound::TokenExpired => WsEnvelope::no_args("token expired"),
            Outbound::Error { message, id } => {
                WsEnvelope::new("error", vec![message.clone(), id.clone()])
            }
            Outbound::Bus(event) => bus_event_envelope(event),
        }
    }
}

fn bus_event_envelope(event: &Event) -> WsEnvelope {
    let topic = event.topic();
    match event {
        Event::StateChange(state) => WsEnvelope::new(topic, vec![state.to_string()]),
        Event::ConsoleOutput(line) => WsEnvelope::new(topic, vec![line.clone()]),
        Event::Resources(snapshot) => {
            let json = serde_json::to_string(snapshot).unwrap_or_default();
            WsEnvelope::new(topic, vec![json])
        }
        Event::InstallOutput(line) => WsEnvelope::new(topic, vec![line.clone()]),
        Event::InstallStarted => WsEnvelope::no_args(topic),
        Event::InstallCompleted { successful } => {
            WsEnvelope::new(topic, vec![successful.to_string()])
        }
        Event::DaemonMessage(line) => WsEnvelope::new(topic, vec![line.clone()]),
        Event::BackupCompleted { backup_id, successful } => {
            WsEnvelope::new(topic, vec![backup_id.clone(), successful.to_string()])
        }
        Event::BackupRestoreCompleted { backup_id } => {
            WsEnvelope::new(topic, vec![backup_id.clone()])
        }
        Event::TransferLogs { suffix, line } => {
            WsEnvelope::new(topic, vec![suffix.clone(), line.clone()])
        }
        Event::TransferStatus { suffix, successful } => {
            WsEnvelope::new(topic, vec![suffix.clone(), successful.to_string()])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wings_core::ProcState;

    #[test]
    fn state_change_carries_state_name_as_single_arg() {
        let env = Outbound::Bus(Event::StateChange(ProcState::Running)).to_envelope();
        assert_eq!(env.event, "status");
        assert_eq!(env.args, vec!["running".to_string()]);
    }

    #[test]
    fn install_started_has_no_args() {
        let env = Outbound::Bus(Event::InstallStarted).to_envelope();
        assert_eq!(env.event, "install started");
        assert!(env.args.is_empty());
    }

    #[test]
    fn error_carries_message_and_correlation_id() {
        let env = Outbound::Error { message: "disk full".to_string(), id: "abc-123".to_string() }
            .to_envelope();
        assert_eq!(env.args, vec!["disk full".to_string(), "abc-123".to_string()]);
    }
}
