// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! wings-daemon: the node-side control daemon. Binds a [`wings_storage::ServerRegistry`]
//! of configured servers to live [`wings_server::Server`] instances over a
//! Docker-backed [`wings_runtime::ContainerRuntime`], and exposes them
//! through the per-connection [`websocket::WebsocketHandler`] protocol and
//! [`transfer::TransferCoordinator`].

pub mod config;
pub mod error;
pub mod logging;
pub mod reconcile;
pub mod token;
pub mod transfer;
pub mod websocket;

pub use config::DaemonConfig;
pub use error::{LifecycleError, LifecycleResult};
pub use reconcile::reconcile;
pub use token::{TokenError, TokenPayload, TokenVerifier};
pub use transfer::{TransferCoordinator, TransferError, TransferTransport};
pub use websocket::{OutboundSink, SinkError, WebsocketHandler};
