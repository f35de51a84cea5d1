// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event payloads carried over the [`crate::EventBus`] (spec.md §4.G topic
//! list).

use crate::{ProcState, ResourceSnapshot};
use serde::{Deserialize, Serialize};

/// A single bus payload. The topic a given variant is published under is
/// fixed by [`Event::topic`]; `WebsocketHandler`-style subscribers register
/// interest by topic name, not by variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "args")]
pub enum Event {
    StateChange(ProcState),
    ConsoleOutput(String),
    Resources(ResourceSnapshot),
    InstallOutput(String),
    InstallStarted,
    InstallCompleted { successful: bool },
    DaemonMessage(String),
    BackupCompleted { backup_id: String, successful: bool },
    BackupRestoreCompleted { backup_id: String },
    /// `suffix` carries whatever followed the `:` in the publish topic
    /// (e.g. the transfer/backup uuid), so subscribers can disambiguate
    /// concurrent transfers without separate topics.
    TransferLogs { suffix: String, line: String },
    TransferStatus { suffix: String, successful: bool },
}

impl Event {
    /// The subscription-key prefix this event is published under. Matches
    /// the topic list WebsocketHandler registers on successful `authenticate`.
    pub fn topic(&self) -> &'static str {
        match self {
            Event::StateChange(_) => "status",
            Event::ConsoleOutput(_) => "console output",
            Event::Resources(_) => "stats",
            Event::InstallOutput(_) => "install output",
            Event::InstallStarted => "install started",
            Event::InstallCompleted { .. } => "install completed",
            Event::DaemonMessage(_) => "daemon message",
            Event::BackupCompleted { .. } => "backup completed",
            Event::BackupRestoreCompleted { .. } => "backup restore completed",
            Event::TransferLogs { .. } => "transfer logs",
            Event::TransferStatus { .. } => "transfer status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_stable_per_variant() {
        assert_eq!(Event::StateChange(ProcState::Running).topic(), "status");
        assert_eq!(
            Event::TransferLogs { suffix: "abc".into(), line: "x".into() }.topic(),
            "transfer logs"
        );
    }
}
