// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON bodies for the inbound HTTP routes listed in spec.md §6. Routing
//! and auth are out of scope (§1); these types are the wire shapes a future
//! HTTP layer would deserialize into.

use crate::PowerActionKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerActionBody {
    Start,
    Stop,
    Restart,
    Terminate,
    Kill,
}

impl From<PowerActionBody> for PowerActionKind {
    fn from(body: PowerActionBody) -> Self {
        match body {
            PowerActionBody::Start => PowerActionKind::Start,
            PowerActionBody::Stop => PowerActionKind::Stop,
            PowerActionBody::Restart => PowerActionKind::Restart,
            PowerActionBody::Terminate => PowerActionKind::Terminate,
            PowerActionBody::Kill => PowerActionKind::Kill,
        }
    }
}

/// `POST /api/servers/{id}/power`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerRequest {
    pub action: PowerActionBody,
}

/// `POST /api/servers/{id}/commands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandsRequest {
    pub commands: Vec<String>,
}

/// One `{from, to}` pair in a `PUT /api/servers/{id}/files/rename` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameEntry {
    pub from: String,
    pub to: String,
}

/// `PUT /api/servers/{id}/files/rename`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub root: String,
    pub files: Vec<RenameEntry>,
}

/// The destination node's own identity, embedded in a `TransferRequest` so
/// the source daemon knows where to stream the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTarget {
    pub id: String,
}

/// `POST /api/servers/{id}/transfer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub url: String,
    pub token: String,
    pub server: TransferTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_request_parses_from_json() {
        let req: PowerRequest = serde_json::from_str(r#"{"action":"restart"}"#).unwrap();
        assert_eq!(req.action, PowerActionBody::Restart);
    }

    #[test]
    fn rename_request_parses_file_list() {
        let json = r#"{"root":"/","files":[{"from":"a.txt","to":"b.txt"}]}"#;
        let req: RenameRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.files[0].from, "a.txt");
    }
}
