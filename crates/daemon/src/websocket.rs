// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection websocket protocol state machine (spec.md §4.G).
//!
//! Owns nothing about the transport: [`OutboundSink`] is the seam a real
//! `tokio-tungstenite` read/write loop plugs into (spec.md Non-goals exclude
//! HTTP routing and the upgrade handshake itself), the same boundary
//! [`crate::token::TokenVerifier`] draws around JWT signature checking.

use crate::token::{TokenError, TokenPayload, TokenVerifier};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use wings_core::{Clock, EventBus, SubscriberHandle};
use wings_server::{PowerAction, Server};
use wings_wire::{Inbound, Outbound, ParseError, PowerActionKind, WsEnvelope};

/// Permission required to subscribe to (or receive frames carrying) the
/// given bus topic, beyond plain authentication. `None` means any
/// authenticated connection may receive it.
fn topic_permission(topic: &str) -> Option<&'static str> {
    match topic {
        "install output" | "install started" | "install completed" => Some("admin.websocket.install"),
        "backup completed" | "backup restore completed" => Some("backup.read"),
        "transfer logs" | "transfer status" => Some("admin.websocket.transfer"),
        _ => None,
    }
}

const ALL_TOPICS: &[&str] = &[
    "status",
    "console output",
    "stats",
    "daemon message",
    "install output",
    "install started",
    "install completed",
    "backup completed",
    "backup restore completed",
    "transfer logs",
    "transfer status",
];

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("connection closed")]
    Closed,
}

/// Abstraction over "write one frame to this websocket connection", so the
/// protocol state machine below is testable without a real socket.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, envelope: WsEnvelope) -> Result<(), SinkError>;
}

/// Per-connection handler: authenticates once, then filters bus events by
/// the authenticated token's permissions before forwarding them.
pub struct WebsocketHandler<R: wings_runtime::ContainerRuntime, V: TokenVerifier, C: Clock, S: OutboundSink> {
    server: Arc<Server<R>>,
    bus: EventBus,
    verifier: Arc<V>,
    clock: C,
    sink: Arc<S>,
    auth: Option<TokenPayload>,
    subscription: Option<SubscriberHandle>,
    expiring_sent: bool,
    expired_sent: bool,
}

impl<R: wings_runtime::ContainerRuntime, V: TokenVerifier, C: Clock, S: OutboundSink> WebsocketHandler<R, V, C, S> {
    pub fn new(server: Arc<Server<R>>, bus: EventBus, verifier: Arc<V>, clock: C, sink: Arc<S>) -> Self {
        Self { server, bus, verifier, clock, sink, auth: None, subscription: None, expiring_sent: false, expired_sent: false }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }

    /// Dispatches one client frame. `authenticate` is accepted at any time
    /// (a token refresh re-authenticates in place); every other event
    /// requires a prior successful `authenticate`.
    pub async fn handle_envelope(&mut self, envelope: &WsEnvelope) -> Result<(), SinkError> {
        let inbound = match Inbound::parse(envelope) {
            Ok(inbound) => inbound,
            Err(err) => return self.send_parse_error(err).await,
        };

        match inbound {
            Inbound::Authenticate { token } => self.authenticate(&token).await,
            other if self.auth.is_none() => {
                self.sink.send(Outbound::Error { message: "not authenticated".to_string(), id: "unauthenticated".to_string() }.to_envelope()).await?;
                let _ = other;
                Ok(())
            }
            Inbound::SetState { action } => self.set_state(action).await,
            Inbound::SendCommand { command } => self.send_command(&command).await,
            Inbound::SendStats => Ok(()),
            Inbound::SendLogs => self.send_logs().await,
        }
    }

    async fn send_parse_error(&self, err: ParseError) -> Result<(), SinkError> {
        self.sink.send(Outbound::Error { message: err.to_string(), id: "bad frame".to_string() }.to_envelope()).await
    }

    async fn authenticate(&mut self, token: &str) -> Result<(), SinkError> {
        let payload = match self.verifier.verify(token) {
            Ok(payload) => payload,
            Err(TokenError::Expired) => return self.sink.send(Outbound::TokenExpired.to_envelope()).await,
            Err(TokenError::Invalid) => return self.sink.send(Outbound::JwtError("invalid token".to_string()).to_envelope()).await,
        };
        if payload.server_id != *self.server.id() {
            return self.sink.send(Outbound::JwtError("token is not valid for this server".to_string()).to_envelope()).await;
        }

        let topics: Vec<&'static str> = ALL_TOPICS
            .iter()
            .copied()
            .filter(|topic| topic_permission(topic).map(|perm| payload.has_permission(perm)).unwrap_or(true))
            .collect();
        if let Some(old) = self.subscription.take() {
            self.bus.unsubscribe(&old);
        }
        self.subscription = Some(self.bus.subscribe(topics));
        self.expiring_sent = false;
        self.expired_sent = false;
        self.auth = Some(payload);
        self.sink.send(Outbound::AuthSuccess.to_envelope()).await?;

        let state = self.server.environment().proc_state();
        self.sink.send(Outbound::Bus(wings_core::Event::StateChange(state)).to_envelope()).await?;
        if state == wings_core::ProcState::Offline && !self.server.is_installing() && !self.server.is_transferring() {
            self.sink.send(Outbound::Bus(wings_core::Event::Resources(wings_core::ResourceSnapshot::default())).to_envelope()).await?;
        }
        Ok(())
    }

    async fn set_state(&self, action: PowerActionKind) -> Result<(), SinkError> {
        let Some(auth) = &self.auth else { return Ok(()) };
        if !auth.has_permission(action.required_permission()) {
            return self.sink.send(Outbound::Error { message: "missing permission".to_string(), id: "forbidden".to_string() }.to_envelope()).await;
        }
        let internal = match action {
            PowerActionKind::Start => PowerAction::Start,
            PowerActionKind::Stop => PowerAction::Stop,
            PowerActionKind::Restart => PowerAction::Restart,
            PowerActionKind::Terminate | PowerActionKind::Kill => PowerAction::Kill,
        };
        if let Err(err) = self.server.power_action(internal).await {
            self.sink.send(Outbound::Error { message: err.to_string(), id: "power action failed".to_string() }.to_envelope()).await?;
        }
        Ok(())
    }

    async fn send_command(&self, command: &str) -> Result<(), SinkError> {
        let Some(auth) = &self.auth else { return Ok(()) };
        if !auth.has_permission("control.console") {
            return self.sink.send(Outbound::Error { message: "missing permission".to_string(), id: "forbidden".to_string() }.to_envelope()).await;
        }
        if let Err(err) = self.server.send_command(command).await {
            self.sink.send(Outbound::Error { message: err.to_string(), id: "send command failed".to_string() }.to_envelope()).await?;
        }
        Ok(())
    }

    async fn send_logs(&self) -> Result<(), SinkError> {
        if self.server.environment().proc_state() != wings_core::ProcState::Running {
            return self.sink.send(Outbound::Error { message: "server is not running".to_string(), id: "not running".to_string() }.to_envelope()).await;
        }
        let lines = match self.server.environment().read_logs(200).await {
            Ok(lines) => lines,
            Err(err) => {
                return self.sink.send(Outbound::Error { message: err.to_string(), id: "read logs failed".to_string() }.to_envelope()).await;
            }
        };
        for line in lines {
            self.sink.send(Outbound::Bus(wings_core::Event::ConsoleOutput(line)).to_envelope()).await?;
        }
        Ok(())
    }

    /// Forwards one already-filtered bus event to the client. Callers drive
    /// this from the connection's read-loop-adjacent task, feeding events
    /// pulled off the [`SubscriberHandle`] returned by `authenticate`.
    pub async fn forward_bus_event(&self, payload: wings_core::Event) -> Result<(), SinkError> {
        self.sink.send(Outbound::Bus(payload).to_envelope()).await
    }

    /// Call on a periodic (e.g. 30s) ticker; emits `token expiring` once
    /// inside the last 60s and `token expired` once after expiry (spec.md
    /// §4.G).
    pub async fn check_token_expiry(&mut self) -> Result<(), SinkError> {
        let Some(auth) = &self.auth else { return Ok(()) };
        let now_secs = self.clock.epoch_ms() / 1000;
        if auth.is_expired(now_secs) {
            if !self.expired_sent {
                self.expired_sent = true;
                self.sink.send(Outbound::TokenExpired.to_envelope()).await?;
            }
            return Ok(());
        }
        if let Some(remaining) = auth.seconds_remaining(now_secs) {
            if remaining <= 60 && !self.expiring_sent {
                self.expiring_sent = true;
                self.sink.send(Outbound::TokenExpiring.to_envelope()).await?;
            }
        }
        Ok(())
    }
}

pub const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(30);
