// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::ValueEnum;
use serde::Serialize;
use wings_core::ProcState;

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;

#[derive(Clone, Copy, Debug, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Serialize)]
pub struct ServerRow {
    pub id: String,
    pub image: String,
    pub state: String,
}

pub fn state_label(state: ProcState) -> &'static str {
    match state {
        ProcState::Offline => "offline",
        ProcState::Starting => "starting",
        ProcState::Running => "running",
        ProcState::Stopping => "stopping",
    }
}

pub fn print_server_table(rows: &[ServerRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows).unwrap_or_default());
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("{}", crate::color::muted("no servers configured"));
                return;
            }
            println!("{}", crate::color::header("SERVER ID  IMAGE  STATE"));
            for row in rows {
                println!(
                    "{}  {}  {}",
                    crate::color::literal(&row.id),
                    crate::color::context(&row.image),
                    crate::color::muted(&row.state)
                );
            }
        }
    }
}

pub fn print_log_line(line: &str) {
    println!("{line}");
}
